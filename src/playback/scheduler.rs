//! Playback worker: delivers events to the output at their due time
//!
//! The clock is kept as an anchor (`Instant`) plus the song position at that
//! anchor. Pausing, resuming and speed changes re-anchor it, so the next
//! event's due time is always `anchor + (offset - position) / speed`.

use crate::core::Song;
use crate::error::{PlayerError, Result};
use crate::hardware::SharedSink;
use crate::index::{SeekPoint, TimestampIndex};
use crate::playback::{clamp_speed, PlaybackEvent, PlaybackState, SharedStatus, WorkerCommand};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Everything a worker needs for one playback run
pub struct Scheduler {
    pub song: Arc<Song>,
    pub index: Arc<TimestampIndex>,
    pub start: SeekPoint,
    pub speed: f64,
    pub sink: SharedSink,
    pub status: SharedStatus,
    pub commands: mpsc::UnboundedReceiver<WorkerCommand>,
    pub events: broadcast::Sender<PlaybackEvent>,
    pub poll_interval: Duration,
}

/// Outcome of waiting for the next event
enum Flow {
    Deliver,
    Stop,
    OutOfRange,
}

/// Running clock of one playback run
struct Clock {
    anchor: Instant,
    base: f64,
    speed: f64,
}

impl Clock {
    fn position(&self, now: Instant) -> f64 {
        self.base + now.saturating_duration_since(self.anchor).as_secs_f64() * self.speed
    }

    /// When the event at `offset` is due; `None` past the clock's range
    fn due(&self, offset: f64) -> Option<Instant> {
        let wait = ((offset - self.base) / self.speed).max(0.0);
        Duration::try_from_secs_f64(wait)
            .ok()
            .and_then(|wait| self.anchor.checked_add(wait))
    }

    /// Restart the clock at `now` from `position`
    fn reanchor(&mut self, now: Instant, position: f64) {
        self.anchor = now;
        self.base = position;
    }
}

impl Scheduler {
    /// Run to completion, stop, or failure
    ///
    /// The output is silenced on entry and again on every exit path, since a
    /// run that ends mid-note would otherwise leave keys held.
    pub async fn run(mut self) -> Result<PlaybackState> {
        let result = self.play().await;

        if let Err(e) = &result {
            error!("Playback failed: {}", e);
            self.status.update(|s| s.state = PlaybackState::Stopped);
            self.publish_state(PlaybackState::Stopped, self.status.snapshot().playback_time);
        }

        if let Err(e) = self.sink.lock().await.reset().await {
            warn!("Failed to silence output after playback: {}", e);
        }

        result
    }

    async fn play(&mut self) -> Result<PlaybackState> {
        self.sink.lock().await.reset().await?;

        let song = self.song.clone();
        let index = self.index.clone();
        let events = song.events();
        let start_index = self.start.start_index.min(events.len());

        let now = Instant::now();
        let mut clock = Clock {
            anchor: now,
            base: self.start.position,
            speed: clamp_speed(self.speed),
        };
        let speed = clock.speed;
        let base = clock.base;
        self.status.update(|s| {
            s.state = PlaybackState::Playing;
            s.input_time = Some(now);
            s.playback_time = base;
            s.speed = speed;
            s.event_index = start_index;
        });
        self.publish_state(PlaybackState::Playing, base);
        info!(
            "Playing {} from {:.2}s (event {}) at {:.2}x",
            song.info.title, base, start_index, speed
        );

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        for (i, event) in events.iter().enumerate().skip(start_index) {
            let offset = index.offset(i);
            match self.wait_until_due(i, offset, &mut clock, &mut ticker).await {
                Flow::Deliver => {}
                Flow::Stop => {
                    let position = clock.position(Instant::now()).min(offset);
                    self.finish(PlaybackState::Stopped, position, i);
                    return Ok(PlaybackState::Stopped);
                }
                Flow::OutOfRange => {
                    let now = Instant::now();
                    let position = clock.position(now).min(offset);
                    self.status.update(|s| {
                        s.playback_time = position;
                        s.input_time = Some(now);
                        s.event_index = i;
                    });
                    return Err(PlayerError::Timing(format!(
                        "event {} at {}s cannot be scheduled",
                        i, offset
                    )));
                }
            }

            if let Some(bytes) = event.wire_bytes() {
                self.sink.lock().await.send(bytes).await?;
            }

            let next = i + 1;
            self.status.update(|s| s.event_index = next);
        }

        self.finish(PlaybackState::Played, index.total_duration, events.len());
        info!("Finished playing {}", song.info.title);
        Ok(PlaybackState::Played)
    }

    /// Wait for event `next` to become due while handling commands
    async fn wait_until_due(
        &mut self,
        next: usize,
        offset: f64,
        clock: &mut Clock,
        ticker: &mut Interval,
    ) -> Flow {
        loop {
            let Some(due) = clock.due(offset) else {
                return Flow::OutOfRange;
            };
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(WorkerCommand::Pause) => {
                        if !self.pause(next, offset, clock).await {
                            return Flow::Stop;
                        }
                    }
                    Some(WorkerCommand::Resume) => {}
                    Some(WorkerCommand::SetSpeed(speed)) => self.set_speed(speed, offset, clock),
                    Some(WorkerCommand::Stop) | None => return Flow::Stop,
                },
                _ = tokio::time::sleep_until(due) => return Flow::Deliver,
                _ = ticker.tick() => {
                    let position = clock.position(Instant::now()).min(offset);
                    let _ = self.events.send(PlaybackEvent::Progress { position, event_index: next });
                }
            }
        }
    }

    /// Hold playback until resumed; false if a stop arrived instead
    async fn pause(&mut self, next: usize, offset: f64, clock: &mut Clock) -> bool {
        let position = clock.position(Instant::now()).min(offset);
        self.status.update(|s| {
            s.state = PlaybackState::Paused;
            s.playback_time = position;
            s.event_index = next;
        });
        self.publish_state(PlaybackState::Paused, position);
        info!("Paused at {:.2}s", position);

        loop {
            match self.commands.recv().await {
                Some(WorkerCommand::Resume) => {
                    let now = Instant::now();
                    clock.reanchor(now, position);
                    self.status.update(|s| {
                        s.state = PlaybackState::Playing;
                        s.input_time = Some(now);
                        s.playback_time = position;
                    });
                    self.publish_state(PlaybackState::Playing, position);
                    info!("Resumed at {:.2}s", position);
                    return true;
                }
                Some(WorkerCommand::SetSpeed(speed)) => {
                    clock.speed = clamp_speed(speed);
                    let speed = clock.speed;
                    self.status.update(|s| s.speed = speed);
                }
                Some(WorkerCommand::Pause) => {}
                Some(WorkerCommand::Stop) | None => {
                    clock.reanchor(Instant::now(), position);
                    return false;
                }
            }
        }
    }

    fn set_speed(&mut self, speed: f64, offset: f64, clock: &mut Clock) {
        let now = Instant::now();
        let position = clock.position(now).min(offset);
        clock.reanchor(now, position);
        clock.speed = clamp_speed(speed);

        let speed = clock.speed;
        self.status.update(|s| {
            s.speed = speed;
            s.input_time = Some(now);
            s.playback_time = position;
        });
        debug!("Speed changed to {:.2}x at {:.2}s", speed, position);
    }

    fn finish(&self, state: PlaybackState, position: f64, event_index: usize) {
        self.status.update(|s| {
            s.state = state;
            s.playback_time = position;
            s.event_index = event_index;
        });
        self.publish_state(state, position);
    }

    fn publish_state(&self, state: PlaybackState, position: f64) {
        let _ = self.events.send(PlaybackEvent::StateChanged { state, position });
    }
}
