use chrono::DateTime;
use serde::{Deserialize, Serialize};

/// Segment type whose speakers are timed individually with a fixed plan.
pub const TABLE_TOPICS_SEGMENT_TYPE: &str = "Table Topic Session";

/// Fixed planned duration for each Table Topics speaker, in minutes.
pub const TABLE_TOPICS_SPEAKER_MINUTES: u32 = 2;

/// Seconds past the red card before the bell rings.
pub const OVERTIME_GRACE_SECONDS: i64 = 30;

/// Five-way classification of a completed timing against its plan.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DotColor {
    Gray,
    Green,
    Yellow,
    Red,
    Bell,
}

impl DotColor {
    pub const ALL: [DotColor; 5] = [
        DotColor::Gray,
        DotColor::Green,
        DotColor::Yellow,
        DotColor::Red,
        DotColor::Bell,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gray => "gray",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Bell => "bell",
        }
    }

    pub fn status_label(self) -> &'static str {
        match self {
            Self::Gray => "Too Short",
            Self::Green => "Under Used",
            Self::Yellow => "Perfect",
            Self::Red => "Over",
            Self::Bell => "Way Over",
        }
    }
}

/// Live countdown zone while a timer is running. `Overtime` is the bell
/// condition; it maps onto [`DotColor::Bell`] once the timing is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownZone {
    Gray,
    Green,
    Yellow,
    Red,
    Overtime,
}

impl CountdownZone {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gray => "gray",
            Self::Green => "green",
            Self::Yellow => "yellow",
            Self::Red => "red",
            Self::Overtime => "overtime",
        }
    }
}

/// Card signal thresholds in seconds elapsed. Thresholds may be negative for
/// very short planned durations; a negative threshold means that zone is
/// entered immediately and callers must not clamp it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CardTimes {
    pub green: i64,
    pub yellow: i64,
    pub red: i64,
}

/// Card signal times for a planned duration, per Toastmasters convention.
pub fn card_times(planned_minutes: u32) -> CardTimes {
    let planned = i64::from(planned_minutes) * 60;

    if planned_minutes <= 3 {
        CardTimes {
            green: planned - 60,
            yellow: planned - 30,
            red: planned,
        }
    } else if planned_minutes <= 10 {
        CardTimes {
            green: planned - 120,
            yellow: planned - 60,
            red: planned,
        }
    } else {
        CardTimes {
            green: planned - 300,
            yellow: planned - 120,
            red: planned,
        }
    }
}

/// Current countdown zone for an elapsed time against a plan.
pub fn countdown_zone(planned_minutes: u32, elapsed_seconds: i64) -> CountdownZone {
    let cards = card_times(planned_minutes);

    if elapsed_seconds < cards.green {
        CountdownZone::Gray
    } else if elapsed_seconds < cards.yellow {
        CountdownZone::Green
    } else if elapsed_seconds < cards.red {
        CountdownZone::Yellow
    } else if elapsed_seconds < cards.red + OVERTIME_GRACE_SECONDS {
        CountdownZone::Red
    } else {
        CountdownZone::Overtime
    }
}

/// Dot color for a completed timing. Same threshold table as
/// [`countdown_zone`], with the overtime zone collapsing to `Bell`.
pub fn dot_color(planned_minutes: u32, actual_seconds: i64) -> DotColor {
    match countdown_zone(planned_minutes, actual_seconds) {
        CountdownZone::Gray => DotColor::Gray,
        CountdownZone::Green => DotColor::Green,
        CountdownZone::Yellow => DotColor::Yellow,
        CountdownZone::Red => DotColor::Red,
        CountdownZone::Overtime => DotColor::Bell,
    }
}

/// One completed timing measurement, as stored by the record store.
/// Immutable once persisted; deletion is gated on the `can_control` flag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimingRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub meeting_id: String,
    pub segment_id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub planned_duration_minutes: u32,
    pub actual_start_time: String,
    pub actual_end_time: String,
    pub actual_duration_seconds: i64,
    pub dot_color: DotColor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl TimingRecord {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.meeting_id, "timing.meeting_id")?;
        validate_non_empty(&self.segment_id, "timing.segment_id")?;
        if self.actual_duration_seconds < 0 {
            return Err("timing.actual_duration_seconds must be >= 0".to_string());
        }
        if let (Some(start), Some(end)) = (
            parse_rfc3339_millis(&self.actual_start_time),
            parse_rfc3339_millis(&self.actual_end_time),
        ) {
            if end < start {
                return Err(
                    "timing.actual_end_time must be >= timing.actual_start_time".to_string()
                );
            }
        }
        Ok(())
    }

    pub fn planned_seconds(&self) -> i64 {
        i64::from(self.planned_duration_minutes) * 60
    }

    /// Start timestamp in milliseconds; records without a parseable start
    /// time sort as if at epoch 0.
    pub fn start_timestamp_ms(&self) -> i64 {
        parse_rfc3339_millis(&self.actual_start_time).unwrap_or(0)
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn parse_rfc3339_millis(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.timestamp_millis())
}

/// Formats seconds as mm:ss, e.g. "05:30". Negative values render as 00:00.
pub fn format_duration(seconds: i64) -> String {
    let seconds = seconds.max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Formats the offset from plan with a sign, e.g. "+ 01:30" or "- 00:45".
pub fn format_relative_duration(actual_seconds: i64, planned_minutes: u32) -> String {
    let diff = actual_seconds - i64::from(planned_minutes) * 60;
    let sign = if diff >= 0 { '+' } else { '-' };
    format!("{sign} {}", format_duration(diff.abs()))
}

/// Formats an RFC3339 timestamp as HH:MM:SS in its own offset.
pub fn format_clock_time(rfc3339: &str) -> Option<String> {
    DateTime::parse_from_rfc3339(rfc3339)
        .ok()
        .map(|parsed| parsed.format("%H:%M:%S").to_string())
}

/// Tooltip line for a persisted record, e.g. "20:12:05 - 20:19:01 (06m48s)".
pub fn timing_tooltip(record: &TimingRecord) -> String {
    let start =
        format_clock_time(&record.actual_start_time).unwrap_or_else(|| "--:--:--".to_string());
    let end = format_clock_time(&record.actual_end_time).unwrap_or_else(|| "--:--:--".to_string());
    let seconds = record.actual_duration_seconds.max(0);
    format!("{start} - {end} ({:02}m{:02}s)", seconds / 60, seconds % 60)
}
