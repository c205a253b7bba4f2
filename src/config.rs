//! Persisted player settings
//!
//! Stored as JSON under the user's config directory. A missing or unreadable
//! file yields the defaults; command-line flags override individual fields.

use crate::error::Result;
use crate::hardware::serial_midi::MIDI_BAUD_RATE;
use crate::index::DEFAULT_BUCKET_SIZE;
use crate::playback::{clamp_speed, PlaybackConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Output port used when none is named
    pub default_port: Option<String>,
    pub baud_rate: u32,
    pub default_speed: f64,
    /// Index bucket width in seconds
    pub bucket_size: f64,
    pub poll_interval_ms: u64,
    pub stop_timeout_ms: u64,
    /// Offer the discarding "null" port alongside serial ports
    pub virtual_port: bool,
    /// Directory scanned for the playlist
    pub songs_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_port: None,
            baud_rate: MIDI_BAUD_RATE,
            default_speed: 1.0,
            bucket_size: DEFAULT_BUCKET_SIZE,
            poll_interval_ms: 100,
            stop_timeout_ms: 1000,
            virtual_port: false,
            songs_dir: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("pianola").join("settings.json"))
    }

    /// Load from the default location, falling back to defaults
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match fs::read_to_string(path)
            .map_err(Into::into)
            .and_then(|contents| Self::parse(&contents))
        {
            Ok(settings) => {
                debug!("Loaded settings from {}", path.display());
                settings
            }
            Err(e) => {
                warn!("Ignoring unreadable settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    fn parse(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    pub fn save(&self) -> Result<()> {
        match Self::config_path() {
            Some(path) => self.save_to(&path),
            None => Ok(()),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Engine timing derived from these settings
    pub fn playback_config(&self) -> PlaybackConfig {
        PlaybackConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
            stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            bucket_size: if self.bucket_size > 0.0 {
                self.bucket_size
            } else {
                DEFAULT_BUCKET_SIZE
            },
        }
    }

    pub fn speed(&self) -> f64 {
        clamp_speed(self.default_speed)
    }
}
