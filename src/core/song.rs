use crate::core::event::{EventKind, PerformanceEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Tempo assumed by MIDI files until the first tempo event
pub const DEFAULT_BPM: u32 = 120;

/// Descriptive metadata for a loaded performance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongInfo {
    /// Display title (file name without directories)
    pub title: String,

    /// Where the song was loaded from
    pub location: PathBuf,

    /// Length in seconds at the recorded tempo
    pub length: f64,

    /// Tempo of the recording (first tempo event)
    pub bpm: u32,

    /// Tempo the user wants to hear instead
    pub user_bpm: Option<u32>,

    /// Rating, 0..=5
    pub stars: u8,
}

/// A performance: metadata plus its immutable event sequence
#[derive(Debug, Clone)]
pub struct Song {
    pub info: SongInfo,
    events: Vec<PerformanceEvent>,
}

impl Song {
    /// Build a song from events loaded from `location`
    pub fn new<P: AsRef<Path>>(location: P, events: Vec<PerformanceEvent>) -> Self {
        let location = location.as_ref().to_path_buf();
        let title = location
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let length = events.iter().map(|e| e.delta_time).sum();
        let bpm = events
            .iter()
            .find_map(|e| match e.kind {
                EventKind::Tempo(micros) if micros > 0 => {
                    Some((60_000_000.0 / micros as f64).round() as u32)
                }
                _ => None,
            })
            .unwrap_or(DEFAULT_BPM);

        Self {
            info: SongInfo {
                title,
                location,
                length,
                bpm,
                user_bpm: None,
                stars: 0,
            },
            events,
        }
    }

    pub fn events(&self) -> &[PerformanceEvent] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Number of events that reach the instrument
    pub fn playable_count(&self) -> usize {
        self.events.iter().filter(|e| !e.is_meta()).count()
    }

    /// Multiplier applied to every delta so the song plays at `user_bpm`
    pub fn tempo_scale(&self) -> f64 {
        match self.info.user_bpm {
            Some(user) if user > 0 && self.info.bpm > 0 => self.info.bpm as f64 / user as f64,
            _ => 1.0,
        }
    }

    /// Length in seconds once the user tempo is applied
    pub fn scaled_length(&self) -> f64 {
        self.info.length * self.tempo_scale()
    }

    pub fn set_user_bpm(&mut self, bpm: Option<u32>) {
        self.info.user_bpm = bpm.filter(|b| *b > 0);
    }

    /// Set the rating; values above 5 are rejected and leave it unchanged
    pub fn set_stars(&mut self, stars: u8) -> bool {
        if stars > 5 {
            warn!("Rejected rating {} for {}: must be 0..=5", stars, self.info.title);
            return false;
        }
        self.info.stars = stars;
        true
    }
}
