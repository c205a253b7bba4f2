pub mod event;
pub mod song;

pub use event::{EventKind, PerformanceEvent};
pub use song::{Song, SongInfo};
