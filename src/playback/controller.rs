use crate::core::Song;
use crate::error::{PlayerError, Result};
use crate::hardware::SharedSink;
use crate::index::{resolve, SeekPoint, TimestampIndex};
use crate::playback::scheduler::Scheduler;
use crate::playback::{
    clamp_speed, PlaybackConfig, PlaybackEvent, PlaybackState, PlaybackStatus, SharedStatus,
    WorkerCommand, WorkerGuard,
};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const EVENT_CAPACITY: usize = 256;

/// Song plus the index built for it
struct LoadedSong {
    song: Arc<Song>,
    index: Arc<TimestampIndex>,
}

/// Playback controller for a player instrument
///
/// Owns the loaded song, the selected output and at most one playback
/// worker. Pause, resume, stop and speed changes are forwarded to the
/// worker as commands; position queries read the shared status snapshot.
pub struct PlaybackController {
    loaded: Option<LoadedSong>,
    sink: Option<SharedSink>,
    status: SharedStatus,
    worker: Option<WorkerGuard>,
    events: broadcast::Sender<PlaybackEvent>,
    config: PlaybackConfig,
}

impl PlaybackController {
    pub fn new(config: PlaybackConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            loaded: None,
            sink: None,
            status: SharedStatus::default(),
            worker: None,
            events,
            config,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Load a song, stopping whatever is playing
    pub async fn load_song(&mut self, song: Song, index: TimestampIndex) {
        self.stop().await;
        info!(
            "Loaded {} ({} events, {:.1}s)",
            song.info.title,
            song.events().len(),
            index.total_duration
        );
        self.loaded = Some(LoadedSong {
            song: Arc::new(song),
            index: Arc::new(index),
        });
        self.status.replace(PlaybackStatus::default());
    }

    /// Forget the loaded song; status returns to stopped at zero
    pub async fn unload(&mut self) {
        self.stop().await;
        self.loaded = None;
        self.status.replace(PlaybackStatus::default());
    }

    pub fn song(&self) -> Option<&Song> {
        self.loaded.as_ref().map(|l| l.song.as_ref())
    }

    /// Switch to another output, stopping playback on the old one
    pub async fn set_output(&mut self, sink: SharedSink) {
        if self.is_worker_alive() {
            self.stop().await;
        }
        info!("Output set to {}", sink.lock().await.name());
        self.sink = Some(sink);
    }

    /// Start playback at `fraction` of the song, or at event `start_index`
    ///
    /// Any live worker is terminated first, so at most one worker exists.
    pub async fn play(&mut self, fraction: f64, speed: f64, start_index: Option<u64>) -> Result<()> {
        let loaded = self.loaded.as_ref().ok_or(PlayerError::NoSongLoaded)?;
        let sink = self.sink.clone().ok_or(PlayerError::NoOutputSelected)?;
        if loaded.song.is_empty() || loaded.index.is_empty() {
            return Err(PlayerError::EmptySong);
        }
        let song = loaded.song.clone();
        let index = loaded.index.clone();

        if let Some(mut prior) = self.worker.take() {
            if prior.is_alive() {
                debug!("Replacing running playback worker");
            }
            prior.terminate().await;
            self.silence().await;
        }

        let start = match start_index {
            Some(event) => {
                SeekPoint::at_event(&index, usize::try_from(event).unwrap_or(usize::MAX))
            }
            None => resolve(&index, fraction, index.total_duration),
        };
        let speed = clamp_speed(speed);

        self.status.replace(PlaybackStatus {
            state: PlaybackState::Playing,
            started_at: Some(Utc::now()),
            playback_time: start.position,
            input_time: Some(Instant::now()),
            speed,
            event_index: start.start_index,
        });

        let (commands, receiver) = mpsc::unbounded_channel();
        let scheduler = Scheduler {
            song,
            index,
            start,
            speed,
            sink,
            status: self.status.clone(),
            commands: receiver,
            events: self.events.clone(),
            poll_interval: self.config.poll_interval,
        };
        let recover = recover_crashed(
            self.status.clone(),
            scheduler.sink.clone(),
            self.events.clone(),
        );
        self.worker = Some(WorkerGuard::spawn(scheduler.run(), commands, recover));
        Ok(())
    }

    /// Ask the worker to pause; no-op unless playing
    pub fn pause(&self) {
        if self.state() != PlaybackState::Playing || !self.is_worker_alive() {
            return;
        }
        self.status.update(|s| {
            if s.state == PlaybackState::Playing {
                s.state = PlaybackState::Pausing;
            }
        });
        self.send(WorkerCommand::Pause);
    }

    /// Ask the worker to continue; no-op unless paused
    pub fn resume(&self) {
        if matches!(
            self.state(),
            PlaybackState::Paused | PlaybackState::Pausing
        ) {
            self.send(WorkerCommand::Resume);
        }
    }

    /// Stop playback and wait for the worker to finish
    ///
    /// A worker that does not stop within `stop_timeout` is terminated. The
    /// output is silenced on every path.
    pub async fn stop(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            if worker.is_alive() {
                let now = Instant::now();
                self.status.update(|s| {
                    if !s.state.is_finished() {
                        s.playback_time = s.position_at(now);
                        s.input_time = Some(now);
                        s.state = PlaybackState::Stopping;
                    }
                });
                worker.send(WorkerCommand::Stop);
            }

            match worker.join_timeout(self.config.stop_timeout).await {
                Some(state) => debug!("Playback worker finished as {:?}", state),
                None if worker.is_alive() => {
                    warn!(
                        "Playback worker did not stop within {:?}, terminating it",
                        self.config.stop_timeout
                    );
                    worker.terminate().await;
                }
                None => {}
            }
        }

        self.silence().await;

        let now = Instant::now();
        self.status.update(|s| {
            if s.state != PlaybackState::Stopped {
                s.playback_time = s.position_at(now);
                s.state = PlaybackState::Stopped;
            }
        });
        let position = self.status.snapshot().playback_time;
        let _ = self.events.send(PlaybackEvent::StateChanged {
            state: PlaybackState::Stopped,
            position,
        });
    }

    /// Change speed; takes effect from the next event
    pub fn set_speed(&self, speed: f64) {
        let speed = clamp_speed(speed);
        if !self.send(WorkerCommand::SetSpeed(speed)) {
            self.status.update(|s| s.speed = speed);
        }
    }

    /// Song position a seek to `fraction` would start from
    pub fn seek(&self, fraction: f64) -> f64 {
        match &self.loaded {
            Some(loaded) => resolve(&loaded.index, fraction, loaded.index.total_duration).position,
            None => 0.0,
        }
    }

    /// Current song position in seconds
    pub fn get_playback_time(&self) -> f64 {
        let position = self.status_snapshot().position_at(Instant::now());
        match &self.loaded {
            Some(loaded) => position.min(loaded.index.total_duration),
            None => position,
        }
    }

    pub fn status_snapshot(&self) -> PlaybackStatus {
        self.settle_orphaned_status();
        self.status.snapshot()
    }

    pub fn state(&self) -> PlaybackState {
        self.settle_orphaned_status();
        self.status.state()
    }

    /// A status left running with no worker behind it is frozen as stopped
    fn settle_orphaned_status(&self) {
        if self.status.state().is_finished() || self.is_worker_alive() {
            return;
        }
        let now = Instant::now();
        self.status.update(|s| {
            if !s.state.is_finished() {
                s.playback_time = s.position_at(now);
                s.state = PlaybackState::Stopped;
            }
        });
    }

    /// Receive state changes and progress updates
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Playback length of the loaded song in seconds
    pub fn duration(&self) -> f64 {
        self.loaded
            .as_ref()
            .map(|l| l.index.total_duration)
            .unwrap_or(0.0)
    }

    pub fn is_worker_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| w.is_alive())
    }

    fn send(&self, command: WorkerCommand) -> bool {
        self.worker.as_ref().is_some_and(|w| w.send(command))
    }

    async fn silence(&self) {
        if let Some(sink) = &self.sink {
            if let Err(e) = sink.lock().await.reset().await {
                warn!("Failed to silence output: {}", e);
            }
        }
    }
}

/// Cleanup for a worker that crashed: freeze the status and silence the output
async fn recover_crashed(
    status: SharedStatus,
    sink: SharedSink,
    events: broadcast::Sender<PlaybackEvent>,
) {
    let now = Instant::now();
    status.update(|s| {
        if !s.state.is_finished() {
            s.playback_time = s.position_at(now);
            s.state = PlaybackState::Stopped;
        }
    });
    if let Err(e) = sink.lock().await.reset().await {
        warn!("Failed to silence output after worker crash: {}", e);
    }
    let _ = events.send(PlaybackEvent::StateChanged {
        state: PlaybackState::Stopped,
        position: status.snapshot().playback_time,
    });
}

impl Default for PlaybackController {
    fn default() -> Self {
        Self::new(PlaybackConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PerformanceEvent;
    use crate::hardware::{shared, MockLog, MockSink, OutputSink};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// `count` notes, each `spacing` seconds after the previous one
    fn evenly_spaced(count: usize, spacing: f64) -> (Song, TimestampIndex) {
        let events: Vec<_> = (0..count)
            .map(|i| PerformanceEvent::note_on(spacing, 0, i as u8, 64))
            .collect();
        let index = TimestampIndex::build(&events);
        (Song::new("spaced.mid", events), index)
    }

    async fn controller(count: usize, spacing: f64, sink: MockSink) -> PlaybackController {
        let mut controller = PlaybackController::default();
        let (song, index) = evenly_spaced(count, spacing);
        controller.load_song(song, index).await;
        controller.set_output(shared(sink)).await;
        controller
    }

    async fn wait_until_finished(controller: &PlaybackController) {
        while !controller.state().is_finished() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn keys(log: &Arc<Mutex<MockLog>>) -> Vec<u8> {
        log.lock().unwrap().messages().iter().map(|m| m[1]).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_play_requires_song_output_and_events() {
        let mut controller = PlaybackController::default();
        assert!(matches!(
            controller.play(0.0, 1.0, None).await,
            Err(PlayerError::NoSongLoaded)
        ));

        let (song, index) = evenly_spaced(3, 1.0);
        controller.load_song(song, index).await;
        assert!(matches!(
            controller.play(0.0, 1.0, None).await,
            Err(PlayerError::NoOutputSelected)
        ));

        let empty = Song::new("empty.mid", Vec::new());
        let index = TimestampIndex::build(empty.events());
        controller.load_song(empty, index).await;
        controller.set_output(shared(MockSink::new("mock"))).await;
        assert!(matches!(
            controller.play(0.0, 1.0, None).await,
            Err(PlayerError::EmptySong)
        ));
        assert!(!controller.is_worker_alive());
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_scales_wall_time() {
        for (speed, expected) in [(1.0, 10.0), (2.0, 5.0)] {
            let sink = MockSink::new("mock");
            let log = sink.log();
            let mut controller = controller(10, 1.0, sink).await;

            let started = Instant::now();
            controller.play(0.0, speed, None).await.unwrap();
            wait_until_finished(&controller).await;

            assert_eq!(controller.state(), PlaybackState::Played);
            let log = log.lock().unwrap();
            assert_eq!(log.sent.len(), 10);
            let last = log.sent[9].0.duration_since(started).as_secs_f64();
            assert!((last - expected).abs() <= 0.05, "speed {} took {}", speed, last);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_resume_round_trip() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let mut controller = controller(10, 1.0, sink).await;
        let started = Instant::now();

        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2500)).await;
        controller.pause();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(controller.state(), PlaybackState::Paused);
        let paused_at = controller.get_playback_time();
        assert!((paused_at - 2.5).abs() < 0.05);
        assert_eq!(keys(&log), vec![0, 1]);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(keys(&log), vec![0, 1]);
        assert_eq!(controller.get_playback_time(), paused_at);

        controller.resume();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(controller.state(), PlaybackState::Playing);
        assert!((controller.get_playback_time() - paused_at).abs() < 0.01);

        wait_until_finished(&controller).await;
        assert_eq!(keys(&log), (0..10).collect::<Vec<u8>>());

        // third note was due at 3.0s, half a second of song after the pause
        let log = log.lock().unwrap();
        let third = log.sent[2].0.duration_since(started).as_secs_f64();
        assert!((third - 8.01).abs() < 0.05, "third note at {}", third);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_resume_are_noops_when_idle() {
        let controller = controller(3, 1.0, MockSink::new("mock")).await;
        controller.pause();
        assert_eq!(controller.state(), PlaybackState::Stopped);
        controller.resume();
        assert_eq!(controller.state(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_play_replaces_worker() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let mut controller = controller(5, 1.0, sink).await;

        controller.play(0.0, 1.0, None).await.unwrap();
        controller.play(0.0, 1.0, None).await.unwrap();
        assert!(controller.is_worker_alive());

        wait_until_finished(&controller).await;
        assert_eq!(keys(&log), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seek_half_of_long_song() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let mut controller = controller(100, 1.0, sink).await;
        assert!((controller.duration() - 100.0).abs() < 1e-9);
        assert!((controller.seek(0.5) - 50.0).abs() < 1e-9);
        assert_eq!(controller.state(), PlaybackState::Stopped);

        controller.play(0.5, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        controller.stop().await;

        // offsets are 1.0..=100.0, so note 49 sits at 50.0s
        assert_eq!(keys(&log), vec![49, 50]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_index_overrides_fraction() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let mut controller = controller(10, 1.0, sink).await;

        controller.play(0.9, 1.0, Some(7)).await.unwrap();
        wait_until_finished(&controller).await;
        assert_eq!(keys(&log), vec![7, 8, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_freezes_playback_time() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let mut controller = controller(10, 1.0, sink).await;

        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        controller.stop().await;

        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert!(!controller.is_worker_alive());
        let stopped_at = controller.get_playback_time();
        assert!((stopped_at - 3.5).abs() < 0.05);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(controller.get_playback_time(), stopped_at);
        assert_eq!(keys(&log), vec![0, 1, 2]);
        // worker entry and exit, then the controller's own reset
        assert_eq!(log.lock().unwrap().resets, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_terminates_unresponsive_worker() {
        let mut sink = MockSink::new("stuck");
        sink.set_send_delay(Duration::from_secs(3600));
        let log = sink.log();
        let mut controller = controller(3, 0.5, sink).await;

        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let requested = Instant::now();
        controller.stop().await;
        let waited = requested.elapsed();

        assert!(waited >= controller.config().stop_timeout);
        assert!(waited < Duration::from_secs(2));
        assert_eq!(controller.state(), PlaybackState::Stopped);
        assert!(!controller.is_worker_alive());

        let log = log.lock().unwrap();
        assert!(log.sent.is_empty());
        // worker entry reset, then the reset after termination
        assert_eq!(log.resets, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_speed_change_while_playing() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let mut controller = controller(4, 1.0, sink).await;
        let started = Instant::now();

        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        controller.set_speed(2.0);
        wait_until_finished(&controller).await;

        assert_eq!(controller.status_snapshot().speed, 2.0);
        let log = log.lock().unwrap();
        let last = log.sent[3].0.duration_since(started).as_secs_f64();
        assert!((last - 2.75).abs() < 0.05, "last note at {}", last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unschedulable_event_ends_in_stopped() {
        let sink = MockSink::new("mock");
        let log = sink.log();
        let events = vec![
            PerformanceEvent::note_on(0.0, 0, 60, 64),
            PerformanceEvent::note_off(1e300, 0, 60),
        ];
        let index = TimestampIndex::build(&events);
        let mut controller = PlaybackController::default();
        controller.load_song(Song::new("far.csv", events), index).await;
        controller.set_output(shared(sink)).await;

        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert!(!controller.is_worker_alive());
        assert_eq!(controller.state(), PlaybackState::Stopped);
        let position = controller.get_playback_time();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.get_playback_time(), position);

        let log = log.lock().unwrap();
        assert_eq!(log.sent.len(), 1);
        assert_eq!(log.resets, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_worker_is_cleaned_up() {
        struct Exploding(Arc<AtomicUsize>);

        #[async_trait]
        impl OutputSink for Exploding {
            fn name(&self) -> &str {
                "exploding"
            }

            async fn send(&mut self, _message: &[u8]) -> Result<()> {
                panic!("output driver crashed");
            }

            async fn reset(&mut self) -> Result<()> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let resets = Arc::new(AtomicUsize::new(0));
        let mut controller = PlaybackController::default();
        let (song, index) = evenly_spaced(3, 1.0);
        controller.load_song(song, index).await;
        controller.set_output(shared(Exploding(resets.clone()))).await;
        let mut events = controller.subscribe();

        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert!(!controller.is_worker_alive());
        assert_eq!(controller.state(), PlaybackState::Stopped);
        // worker entry reset, then the one after the crash
        assert_eq!(resets.load(Ordering::SeqCst), 2);

        let mut last_state = None;
        while let Ok(event) = events.try_recv() {
            if let PlaybackEvent::StateChanged { state, .. } = event {
                last_state = Some(state);
            }
        }
        assert_eq!(last_state, Some(PlaybackState::Stopped));

        let position = controller.get_playback_time();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(controller.get_playback_time(), position);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_without_worker_settles_to_stopped() {
        let controller = controller(3, 1.0, MockSink::new("mock")).await;
        controller.status.update(|s| {
            s.state = PlaybackState::Playing;
            s.input_time = Some(Instant::now());
        });

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snapshot = controller.status_snapshot();
        assert_eq!(snapshot.state, PlaybackState::Stopped);
        assert!((snapshot.playback_time - 2.0).abs() < 1e-9);
        controller.pause();
        assert_eq!(controller.state(), PlaybackState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unload_resets_status() {
        let mut controller = controller(5, 1.0, MockSink::new("mock")).await;
        controller.play(0.0, 1.0, None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(2200)).await;

        controller.unload().await;
        assert!(controller.song().is_none());
        assert_eq!(controller.status_snapshot(), PlaybackStatus::default());
        assert_eq!(controller.duration(), 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_state_changes() {
        let mut controller = controller(2, 0.5, MockSink::new("mock")).await;
        let mut events = controller.subscribe();

        controller.play(0.0, 1.0, None).await.unwrap();
        wait_until_finished(&controller).await;

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let PlaybackEvent::StateChanged { state, .. } = event {
                states.push(state);
            }
        }
        assert_eq!(states.first(), Some(&PlaybackState::Playing));
        assert_eq!(states.last(), Some(&PlaybackState::Played));
    }
}
