//! Performance playback engine for player instruments
//!
//! Loads recorded performances (Standard MIDI Files or CSV event lists),
//! indexes them by time so playback can start anywhere, and delivers their
//! events to an instrument on a background worker that can be paused,
//! resumed, stopped and sped up while it runs.

pub mod config;
pub mod core;
pub mod error;
pub mod hardware;
pub mod index;
pub mod input;
pub mod playback;
pub mod playlist;

pub use config::Settings;
pub use error::{PlayerError, Result};
pub use playback::{PlaybackController, PlaybackEvent, PlaybackState, PlaybackStatus};
pub use playlist::Playlist;
