use crate::index::builder::{bucket_key, IndexEntry, TimestampIndex};
use tracing::debug;

/// How a seek target was matched against the index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekPrecision {
    /// The nearest bucket was recorded
    Exact,
    /// Matched after coarser rounding
    Coarse,
    /// Fell back to the closest earlier bucket
    Nearest,
    /// Nothing matched, playing from the top
    Start,
    /// Nothing to seek in (empty song or zero duration)
    Empty,
}

/// Where playback begins after a seek
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeekPoint {
    /// First event to deliver
    pub start_index: usize,
    /// Seconds between the bucket's first event and `position`
    pub residual: f64,
    /// Absolute song time playback starts from
    pub position: f64,
    pub precision: SeekPrecision,
}

impl SeekPoint {
    /// Beginning of the song
    pub fn start(precision: SeekPrecision) -> Self {
        Self {
            start_index: 0,
            residual: 0.0,
            position: 0.0,
            precision,
        }
    }

    /// Start exactly at event `index`, clamped to the event count
    pub fn at_event(index: &TimestampIndex, event: usize) -> Self {
        let start_index = event.min(index.event_count());
        Self {
            start_index,
            residual: 0.0,
            position: if start_index == 0 { 0.0 } else { index.offset(start_index) },
            precision: SeekPrecision::Exact,
        }
    }

    /// Nothing is left to deliver from this point
    pub fn is_nothing_to_play(&self) -> bool {
        self.precision == SeekPrecision::Empty
    }
}

/// Resolve a fractional position to a start event and offset
///
/// Seek precision is best-effort: a missing bucket is retried with coarser
/// rounding, then with the closest earlier bucket, and finally the song start.
pub fn resolve(index: &TimestampIndex, fraction: f64, total_duration: f64) -> SeekPoint {
    let fraction = if fraction.is_nan() { 0.0 } else { fraction.clamp(0.0, 1.0) };
    if total_duration <= 0.0 || index.is_empty() {
        return SeekPoint::start(SeekPrecision::Empty);
    }

    let target = fraction * total_duration;
    let size = index.bucket_size;

    let candidates = [
        ((target / size).round() as u64, SeekPrecision::Exact),
        (bucket_key(target, size), SeekPrecision::Coarse),
        (bucket_key(target.round(), size), SeekPrecision::Coarse),
    ];

    for (key, precision) in candidates {
        if let Some(entry) = index.entry(key) {
            return point_from_entry(index, entry, target, precision);
        }
        debug!("Seek key miss for {:.3}s (bucket {})", target, key);
    }

    if let Some((key, entry)) = index.entry_at_or_before(bucket_key(target, size)) {
        debug!("Seek to {:.3}s using earlier bucket {}", target, key);
        return point_from_entry(index, entry, target, SeekPrecision::Nearest);
    }

    debug!("Seek to {:.3}s unresolved, starting from the top", target);
    SeekPoint::start(SeekPrecision::Start)
}

fn point_from_entry(
    index: &TimestampIndex,
    entry: &IndexEntry,
    target: f64,
    precision: SeekPrecision,
) -> SeekPoint {
    let position = target.max(entry.elapsed);
    let offsets = index.offsets();

    // events inside the bucket that precede the target are skipped
    let mut start_index = entry.event_count.min(offsets.len());
    while start_index < offsets.len() && offsets[start_index] < position - 1e-9 {
        start_index += 1;
    }

    SeekPoint {
        start_index,
        residual: (position - entry.elapsed).max(0.0),
        position,
        precision,
    }
}
