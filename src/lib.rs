//! Meeting segment timing engine for Toastmasters-style meetings.
//!
//! The crate tracks one running stage timer per process, classifies each
//! measurement against the card-signal thresholds for its planned duration,
//! buffers unsaved measurements in a TTL-bound local cache, and reconciles
//! that cache with a remote record store.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::bootstrap::{BootstrapResult, bootstrap_workspace};
pub use application::commands::{
    AppState, LoadTimingsResult, SaveTimingsResult, SessionResponse, StartTimerResponse,
    StopTimerResponse, TimerSnapshotResponse, cached_entries_impl, close_meeting_impl,
    default_record_store_client, delete_timing_impl, discard_cached_entry_impl,
    hydrate_segment_impl, load_timings_impl, open_meeting_impl, save_cached_entry_impl,
    save_timings_impl, start_timer_impl, stop_timer_impl, timer_snapshot_impl,
    unsaved_count_impl,
};
pub use application::timing_sync::{PushResult, RetryPolicy, TimingSyncService};
pub use domain::cache::{CachedSegmentTiming, CachedTimingEntry, TimingCache};
pub use domain::models::{
    CardTimes, CountdownZone, DotColor, TimingRecord, card_times, countdown_zone, dot_color,
};
pub use domain::report::{count_by_color, sort_by_status, sort_chronological};
pub use domain::segments::{SegmentTypeConfig, segment_type_config};
pub use infrastructure::error::InfraError;
pub use infrastructure::record_store_client::{RecordStoreClient, ReqwestRecordStoreClient};
