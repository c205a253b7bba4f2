//! On-disk cache for timestamp indexes
//!
//! The index is stored as JSON next to the song (`<song>.index.json`) so it
//! can be reused across restarts.

use crate::core::PerformanceEvent;
use crate::error::Result;
use crate::index::TimestampIndex;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Path of the stored index for a song file
pub fn index_path(song_path: &Path) -> PathBuf {
    let mut name = song_path.as_os_str().to_os_string();
    name.push(".index.json");
    PathBuf::from(name)
}

/// Write an index as JSON
pub fn save(path: &Path, index: &TimestampIndex) -> Result<()> {
    let json = serde_json::to_string(index)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Read an index written by [`save`]
pub fn load(path: &Path) -> Result<TimestampIndex> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Reuse the stored index when it matches the song, otherwise rebuild it
///
/// Saving the rebuilt index is best-effort; failures are only logged.
pub fn load_or_build(
    song_path: &Path,
    events: &[PerformanceEvent],
    tempo_scale: f64,
    bucket_size: f64,
) -> TimestampIndex {
    let path = index_path(song_path);

    match load(&path) {
        Ok(index)
            if index.event_count() == events.len()
                && index.bucket_size == bucket_size
                && index.tempo_scale == tempo_scale =>
        {
            debug!("Using stored index {}", path.display());
            return index;
        }
        Ok(_) => debug!("Stored index {} is stale, rebuilding", path.display()),
        Err(e) => debug!("No usable stored index at {}: {}", path.display(), e),
    }

    let index = TimestampIndex::build_with(events, tempo_scale, bucket_size);
    if let Err(e) = save(&path, &index) {
        warn!("Failed to store index {}: {}", path.display(), e);
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events() -> Vec<PerformanceEvent> {
        vec![
            PerformanceEvent::note_on(0.0, 0, 60, 64),
            PerformanceEvent::note_off(0.75, 0, 60),
            PerformanceEvent::note_on(1.25, 0, 64, 64),
        ]
    }

    #[test]
    fn test_index_path() {
        assert_eq!(
            index_path(Path::new("/songs/a.mid")),
            PathBuf::from("/songs/a.mid.index.json")
        );
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("a.mid");
        let built = load_or_build(&song, &events(), 1.0, 0.5);

        assert!(index_path(&song).exists());
        let stored = load(&index_path(&song)).unwrap();
        assert_eq!(stored, built);
    }

    #[test]
    fn test_stale_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        let song = dir.path().join("a.mid");
        load_or_build(&song, &events(), 1.0, 0.5);

        let rescaled = load_or_build(&song, &events(), 2.0, 0.5);
        assert_eq!(rescaled.tempo_scale, 2.0);
        assert!((rescaled.total_duration - 4.0).abs() < 1e-9);
        assert_eq!(load(&index_path(&song)).unwrap(), rescaled);
    }
}
