pub mod controller;
pub mod scheduler;
pub mod worker;

pub use controller::PlaybackController;
pub use worker::WorkerGuard;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Slowest and fastest supported playback speed
pub const MIN_SPEED: f64 = 0.1;
pub const MAX_SPEED: f64 = 10.0;

/// Clamp a requested speed into the supported range
pub fn clamp_speed(speed: f64) -> f64 {
    if speed.is_nan() {
        return 1.0;
    }
    speed.max(MIN_SPEED).min(MAX_SPEED)
}

/// Playback state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PlaybackState {
    Stopped,
    Playing,
    /// Pause requested, not yet acknowledged by the worker
    Pausing,
    Paused,
    /// Stop requested, not yet acknowledged by the worker
    Stopping,
    /// Ran off the end of the song
    Played,
}

impl PlaybackState {
    /// Playback clock is advancing
    pub fn is_running(self) -> bool {
        matches!(self, Self::Playing | Self::Pausing | Self::Stopping)
    }

    /// The worker has finished in this state
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Stopped | Self::Played)
    }
}

/// Snapshot of a playback session
///
/// `playback_time` is the song position (seconds) at `input_time`; while
/// running the position advances at `speed` from there.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackStatus {
    pub state: PlaybackState,
    /// Wall-clock time the current `play()` started
    pub started_at: Option<DateTime<Utc>>,
    /// Song position at `input_time`
    pub playback_time: f64,
    /// When playback last (re)started advancing
    pub input_time: Option<Instant>,
    pub speed: f64,
    /// Next event to deliver
    pub event_index: usize,
}

impl Default for PlaybackStatus {
    fn default() -> Self {
        Self {
            state: PlaybackState::Stopped,
            started_at: None,
            playback_time: 0.0,
            input_time: None,
            speed: 1.0,
            event_index: 0,
        }
    }
}

impl PlaybackStatus {
    /// Song position now: advancing while running, frozen otherwise
    pub fn position_at(&self, now: Instant) -> f64 {
        match self.input_time {
            Some(anchor) if self.state.is_running() => {
                self.playback_time + now.saturating_duration_since(anchor).as_secs_f64() * self.speed
            }
            _ => self.playback_time,
        }
    }
}

/// Status record shared between controller and worker
///
/// Readers take cheap snapshots; writers swap in a modified copy.
#[derive(Clone)]
pub struct SharedStatus {
    inner: Arc<ArcSwap<PlaybackStatus>>,
}

impl SharedStatus {
    pub fn new(status: PlaybackStatus) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(status)),
        }
    }

    pub fn snapshot(&self) -> PlaybackStatus {
        PlaybackStatus::clone(&self.inner.load())
    }

    pub fn state(&self) -> PlaybackState {
        self.inner.load().state
    }

    pub fn replace(&self, status: PlaybackStatus) {
        self.inner.store(Arc::new(status));
    }

    /// Apply `f` to a copy of the current status and publish it atomically
    pub fn update<F: Fn(&mut PlaybackStatus)>(&self, f: F) {
        self.inner.rcu(|current| {
            let mut next = PlaybackStatus::clone(current);
            f(&mut next);
            next
        });
    }
}

impl Default for SharedStatus {
    fn default() -> Self {
        Self::new(PlaybackStatus::default())
    }
}

/// Commands sent from the controller to the worker
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WorkerCommand {
    Pause,
    Resume,
    Stop,
    SetSpeed(f64),
}

/// Notifications published by the worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlaybackEvent {
    StateChanged { state: PlaybackState, position: f64 },
    Progress { position: f64, event_index: usize },
}

/// Timing parameters of the playback engine
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Interval between progress updates while waiting for the next event
    pub poll_interval: Duration,
    /// How long `stop()` waits for the worker before terminating it
    pub stop_timeout: Duration,
    /// Bucket width used when indexing loaded songs
    pub bucket_size: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            stop_timeout: Duration::from_millis(1000),
            bucket_size: crate::index::DEFAULT_BUCKET_SIZE,
        }
    }
}
