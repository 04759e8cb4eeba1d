use std::collections::HashMap;

use crate::domain::models::{DotColor, TimingRecord};

/// Fixed report ordering of the dot colors, best outcome groups first.
fn status_rank(color: DotColor) -> u8 {
    match color {
        DotColor::Gray => 0,
        DotColor::Green => 1,
        DotColor::Yellow => 2,
        DotColor::Red => 3,
        DotColor::Bell => 4,
    }
}

/// Sorts records by dot color group (gray, green, yellow, red, bell), and
/// within a group by how close the actual duration landed to the plan.
pub fn sort_by_status(records: &[TimingRecord]) -> Vec<TimingRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(|record| {
        let distance = (record.actual_duration_seconds - record.planned_seconds()).abs();
        (status_rank(record.dot_color), distance)
    });
    sorted
}

/// Sorts records by actual start time ascending. Records without a
/// parseable start time sort first, as if started at epoch 0.
pub fn sort_chronological(records: &[TimingRecord]) -> Vec<TimingRecord> {
    let mut sorted = records.to_vec();
    sorted.sort_by_key(TimingRecord::start_timestamp_ms);
    sorted
}

/// Counts records per dot color. Every color is present in the result,
/// defaulting to zero.
pub fn count_by_color(records: &[TimingRecord]) -> HashMap<DotColor, usize> {
    let mut counts: HashMap<DotColor, usize> =
        DotColor::ALL.iter().map(|color| (*color, 0)).collect();
    for record in records {
        if let Some(count) = counts.get_mut(&record.dot_color) {
            *count += 1;
        }
    }
    counts
}
