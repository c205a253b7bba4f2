use crate::error::{PlayerError, Result};
use crate::playback::{PlaybackState, WorkerCommand};
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Aborts the task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Owns the single playback worker task
///
/// Dropping the guard aborts the worker, so replacing the controller's guard
/// can never leave a second worker running.
pub struct WorkerGuard {
    handle: Option<JoinHandle<Result<PlaybackState>>>,
    commands: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerGuard {
    pub fn new(
        handle: JoinHandle<Result<PlaybackState>>,
        commands: mpsc::UnboundedSender<WorkerCommand>,
    ) -> Self {
        Self {
            handle: Some(handle),
            commands,
        }
    }

    /// Spawn `run` as the worker, supervised
    ///
    /// If `run` panics, `recover` runs before the worker counts as finished.
    /// Aborting the guard aborts `run` as well.
    pub fn spawn<F, R>(run: F, commands: mpsc::UnboundedSender<WorkerCommand>, recover: R) -> Self
    where
        F: Future<Output = Result<PlaybackState>> + Send + 'static,
        R: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut task = AbortOnDrop(tokio::spawn(run));
            match (&mut task.0).await {
                Ok(result) => result,
                Err(e) => {
                    error!("Playback worker crashed: {}", e);
                    recover.await;
                    Err(PlayerError::WorkerFailed(e.to_string()))
                }
            }
        });
        Self::new(handle, commands)
    }

    /// Worker task has not finished yet
    pub fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Deliver a command; false if the worker is gone
    pub fn send(&self, command: WorkerCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Wait up to `timeout` for the worker to finish on its own
    ///
    /// Returns the final state, or `None` if it did not finish in time (the
    /// worker keeps running) or ended abnormally.
    pub async fn join_timeout(&mut self, timeout: Duration) -> Option<PlaybackState> {
        let handle = self.handle.as_mut()?;
        let result = tokio::time::timeout(timeout, handle).await;
        match result {
            Ok(joined) => {
                self.handle = None;
                match joined {
                    Ok(Ok(state)) => Some(state),
                    Ok(Err(e)) => {
                        warn!("Playback worker failed: {}", e);
                        None
                    }
                    Err(e) => {
                        debug!("Playback worker did not complete: {}", e);
                        None
                    }
                }
            }
            Err(_) => None,
        }
    }

    /// Forcibly terminate the worker and wait until it is gone
    ///
    /// Once this returns the worker's future has been dropped, releasing
    /// any output it held.
    pub async fn terminate(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            match handle.await {
                Ok(_) => debug!("Playback worker finished before it was terminated"),
                Err(e) if e.is_cancelled() => debug!("Playback worker terminated"),
                Err(e) => warn!("Playback worker ended abnormally: {}", e),
            }
        }
    }
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
