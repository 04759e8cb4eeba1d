use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::models::{DotColor, TimingRecord, dot_color};

/// One locally recorded measurement that has not reached the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedTimingEntry {
    #[serde(default)]
    pub name: Option<String>,
    pub planned_duration_minutes: u32,
    /// Wall-clock start in unix milliseconds.
    pub started_at: i64,
    /// Wall-clock end in unix milliseconds.
    pub ended_at: i64,
    pub dot_color: DotColor,
}

impl CachedTimingEntry {
    /// Builds an entry from a raw start/stop measurement, flooring the
    /// duration to whole seconds and classifying the dot color.
    pub fn from_measurement(
        name: Option<String>,
        planned_duration_minutes: u32,
        started_at: i64,
        ended_at: i64,
    ) -> Self {
        let duration = (ended_at - started_at).div_euclid(1000);
        Self {
            name,
            planned_duration_minutes,
            started_at,
            ended_at,
            dot_color: dot_color(planned_duration_minutes, duration),
        }
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.ended_at - self.started_at).div_euclid(1000)
    }

    pub fn from_record(record: &TimingRecord) -> Self {
        let started_at = record.start_timestamp_ms();
        Self {
            name: record.name.clone(),
            planned_duration_minutes: record.planned_duration_minutes,
            started_at,
            ended_at: started_at + record.actual_duration_seconds * 1000,
            dot_color: record.dot_color,
        }
    }
}

/// All cached entries for one agenda segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CachedSegmentTiming {
    pub segment_id: String,
    pub segment_type: String,
    pub entries: Vec<CachedTimingEntry>,
    /// True when the segment was seeded from server records. A hydrated
    /// segment keeps its (possibly empty) key so that `merge_on_load` never
    /// re-seeds a segment the user explicitly cleared.
    #[serde(default)]
    pub hydrated: bool,
}

/// Per-meeting timing cache keyed by segment id. Presence of a key is the
/// hydration flag: an absent key means "never touched", an empty hydrated
/// entry list means "explicitly cleared, pending push".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct TimingCache {
    segments: HashMap<String, CachedSegmentTiming>,
}

impl TimingCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a segment from server records. No-op when the segment key is
    /// already present, so repeated loads never clobber local edits.
    /// Returns true when the segment was seeded.
    pub fn merge_on_load(
        &mut self,
        segment_id: &str,
        segment_type: &str,
        server_records: &[TimingRecord],
    ) -> bool {
        if self.segments.contains_key(segment_id) {
            return false;
        }
        self.segments.insert(
            segment_id.to_string(),
            CachedSegmentTiming {
                segment_id: segment_id.to_string(),
                segment_type: segment_type.to_string(),
                entries: server_records
                    .iter()
                    .map(CachedTimingEntry::from_record)
                    .collect(),
                hydrated: true,
            },
        );
        true
    }

    pub fn append_entry(&mut self, segment_id: &str, segment_type: &str, entry: CachedTimingEntry) {
        let segment = self
            .segments
            .entry(segment_id.to_string())
            .or_insert_with(|| CachedSegmentTiming {
                segment_id: segment_id.to_string(),
                segment_type: segment_type.to_string(),
                entries: Vec::new(),
                hydrated: false,
            });
        segment.entries.push(entry);
    }

    /// Removes one entry by index. When the last entry of a non-hydrated
    /// segment is removed the key itself is dropped; a hydrated segment
    /// keeps its empty list so the clear can be pushed to the server.
    pub fn remove_entry(&mut self, segment_id: &str, index: usize) -> Option<CachedTimingEntry> {
        let segment = self.segments.get_mut(segment_id)?;
        if index >= segment.entries.len() {
            return None;
        }
        let removed = segment.entries.remove(index);
        if segment.entries.is_empty() && !segment.hydrated {
            self.segments.remove(segment_id);
        }
        Some(removed)
    }

    pub fn drop_segment(&mut self, segment_id: &str) -> Option<CachedSegmentTiming> {
        self.segments.remove(segment_id)
    }

    pub fn has_segment(&self, segment_id: &str) -> bool {
        self.segments.contains_key(segment_id)
    }

    pub fn entries_for(&self, segment_id: &str) -> &[CachedTimingEntry] {
        self.segments
            .get(segment_id)
            .map(|segment| segment.entries.as_slice())
            .unwrap_or(&[])
    }

    pub fn segments(&self) -> impl Iterator<Item = &CachedSegmentTiming> {
        self.segments.values()
    }

    pub fn segment_ids(&self) -> Vec<String> {
        self.segments.keys().cloned().collect()
    }

    pub fn unsaved_count(&self) -> usize {
        self.segments
            .values()
            .map(|segment| segment.entries.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}
