//! Error types for pianola
//!
//! Transport errors are kept distinguishable so callers can tell "nothing is
//! plugged in" apart from "you asked for a port that isn't there".

use thiserror::Error;

/// Main error type for the player
#[derive(Error, Debug)]
pub enum PlayerError {
    /// No output transports exist at all
    #[error("No output ports available")]
    NoTransports,

    /// A named transport does not match any available one
    #[error("Output port not found: {0}")]
    InvalidTransport(String),

    /// Playback requested before a song was loaded
    #[error("No song loaded")]
    NoSongLoaded,

    /// Playback requested before an output was selected
    #[error("No output selected")]
    NoOutputSelected,

    /// The loaded song has no events
    #[error("Song contains no events")]
    EmptySong,

    /// Output sink failures (write errors, closed ports)
    #[error("Output error: {0}")]
    Sink(String),

    /// An event lies too far in the future to schedule
    #[error("Timing error: {0}")]
    Timing(String),

    /// The playback worker crashed
    #[error("Playback worker failed: {0}")]
    WorkerFailed(String),

    /// Malformed performance file
    #[error("Parse error: {0}")]
    Parse(String),

    /// File content not recognised by any loader
    #[error("Unknown input format: {0}")]
    UnknownFormat(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding of settings or stored indexes
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// CSV event list errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

/// Convenience Result type using PlayerError
pub type Result<T> = std::result::Result<T, PlayerError>;
