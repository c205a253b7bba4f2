use crate::core::PerformanceEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default bucket width in seconds
pub const DEFAULT_BUCKET_SIZE: f64 = 0.5;

/// First event recorded in a bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Index of the first event whose elapsed time falls in the bucket
    pub event_count: usize,
    /// Elapsed seconds of that event
    pub elapsed: f64,
}

/// Precomputed elapsed-time lookup for one song
///
/// `offsets[i]` is the absolute time of event `i` (tempo scale applied).
/// `buckets` maps `floor(elapsed / bucket_size)` to the first event at or
/// after that bucket's start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampIndex {
    pub bucket_size: f64,
    pub tempo_scale: f64,
    pub total_duration: f64,
    offsets: Vec<f64>,
    buckets: BTreeMap<u64, IndexEntry>,
}

impl TimestampIndex {
    /// Build with the default bucket and no tempo override
    pub fn build(events: &[PerformanceEvent]) -> Self {
        Self::build_with(events, 1.0, DEFAULT_BUCKET_SIZE)
    }

    /// Integrate relative deltas into absolute offsets
    ///
    /// `tempo_scale` multiplies every delta (original BPM / user BPM).
    pub fn build_with(events: &[PerformanceEvent], tempo_scale: f64, bucket_size: f64) -> Self {
        let bucket_size = if bucket_size > 0.0 { bucket_size } else { DEFAULT_BUCKET_SIZE };
        let tempo_scale = if tempo_scale > 0.0 { tempo_scale } else { 1.0 };

        let mut offsets = Vec::with_capacity(events.len());
        let mut buckets = BTreeMap::new();
        let mut elapsed = 0.0;

        for (i, event) in events.iter().enumerate() {
            elapsed += event.delta_time * tempo_scale;
            offsets.push(elapsed);

            buckets
                .entry(bucket_key(elapsed, bucket_size))
                .or_insert(IndexEntry { event_count: i, elapsed });
        }

        if buckets.is_empty() {
            buckets.insert(0, IndexEntry { event_count: 0, elapsed: 0.0 });
        }

        Self {
            bucket_size,
            tempo_scale,
            total_duration: elapsed,
            offsets,
            buckets,
        }
    }

    /// Number of events the index was built from
    pub fn event_count(&self) -> usize {
        self.offsets.len()
    }

    /// True when there is nothing to play
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    /// Absolute time of event `index`, or the total duration past the end
    pub fn offset(&self, index: usize) -> f64 {
        self.offsets.get(index).copied().unwrap_or(self.total_duration)
    }

    pub fn offsets(&self) -> &[f64] {
        &self.offsets
    }

    pub fn entry(&self, key: u64) -> Option<&IndexEntry> {
        self.buckets.get(&key)
    }

    /// Closest recorded bucket at or before `key`
    pub fn entry_at_or_before(&self, key: u64) -> Option<(u64, &IndexEntry)> {
        self.buckets.range(..=key).next_back().map(|(k, e)| (*k, e))
    }

    pub fn buckets(&self) -> impl Iterator<Item = (u64, &IndexEntry)> {
        self.buckets.iter().map(|(k, e)| (*k, e))
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

/// Bucket number holding `elapsed`
pub fn bucket_key(elapsed: f64, bucket_size: f64) -> u64 {
    (elapsed.max(0.0) / bucket_size + 1e-9).floor() as u64
}
