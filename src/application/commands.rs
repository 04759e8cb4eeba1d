use crate::application::bootstrap::bootstrap_workspace;
use crate::application::timing_sync::{NowProvider, TimingSyncService};
use crate::domain::cache::{CachedTimingEntry, TimingCache};
use crate::domain::models::{DotColor, TimingRecord, card_times, countdown_zone};
use crate::domain::segments::requires_speaker_name;
use crate::infrastructure::config::{read_api_base_url, read_cache_ttl_hours};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store_client::{RecordStoreClient, ReqwestRecordStoreClient};
use crate::infrastructure::timing_cache::{
    PersistedRunningTimer, SqliteTimingCacheRepository, TimingCacheRepository,
};
use chrono::Utc;
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

pub struct AppState {
    config_dir: PathBuf,
    database_path: PathBuf,
    logs_dir: PathBuf,
    cache_repository: Arc<SqliteTimingCacheRepository>,
    runtime: Mutex<RuntimeState>,
    log_guard: Mutex<()>,
    now_provider: NowProvider,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_now_provider(workspace_root, Arc::new(Utc::now))
    }

    pub fn with_now_provider(
        workspace_root: PathBuf,
        now_provider: NowProvider,
    ) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let config_dir = workspace_root.join("config");
        let logs_dir = workspace_root.join("logs");

        let ttl_hours = read_cache_ttl_hours(&config_dir)?;
        let cache_repository = Arc::new(SqliteTimingCacheRepository::new(
            &bootstrap.database_path,
            ttl_hours,
        ));

        let state = Self {
            config_dir,
            database_path: bootstrap.database_path,
            logs_dir,
            cache_repository,
            runtime: Mutex::new(RuntimeState::default()),
            log_guard: Mutex::new(()),
            now_provider,
        };

        // Expired caches are swept once per application start; afterwards
        // expiry is only checked per meeting at load time.
        match state.cache_repository.sweep_expired((state.now_provider)()) {
            Ok(swept) if swept > 0 => {
                state.log_info("startup", &format!("swept {swept} expired timing caches"));
            }
            Ok(_) => {}
            Err(error) => state.log_error("startup", &format!("cache sweep failed: {error}")),
        }

        Ok(state)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn database_path(&self) -> &Path {
        &self.database_path
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn now_millis(&self) -> i64 {
        (self.now_provider)().timestamp_millis()
    }
}

#[derive(Debug, Default)]
struct RuntimeState {
    session: Option<MeetingSession>,
}

#[derive(Debug, Clone)]
struct MeetingSession {
    meeting_id: String,
    /// None until the record store has been queried for this meeting.
    /// The server enforces the permission either way; a known false lets
    /// the engine reject control operations without a round trip.
    can_control: Option<bool>,
    cache: TimingCache,
    running: Option<RunningTimer>,
}

#[derive(Debug, Clone)]
struct RunningTimer {
    segment_id: String,
    segment_type: String,
    started_at_ms: i64,
    speaker_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionResponse {
    pub meeting_id: String,
    pub unsaved_count: usize,
    pub running_segment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StartTimerResponse {
    pub segment_id: String,
    pub started_at_ms: i64,
    pub speaker_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerSnapshotResponse {
    pub is_running: bool,
    pub segment_id: Option<String>,
    pub speaker_name: Option<String>,
    pub elapsed_seconds: i64,
    pub zone: String,
    pub green_at: i64,
    pub yellow_at: i64,
    pub red_at: i64,
    /// Seconds until the red card, clamped at zero once past it.
    pub remaining_seconds: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct StopTimerResponse {
    pub segment_id: String,
    pub duration_seconds: i64,
    pub dot_color: DotColor,
    pub unsaved_count: usize,
}

#[derive(Debug, Clone)]
pub struct LoadTimingsResult {
    pub can_control: bool,
    pub timings: Vec<TimingRecord>,
}

#[derive(Debug, Clone)]
pub struct SaveTimingsResult {
    pub pushed_segments: Vec<String>,
    pub created: Vec<TimingRecord>,
}

/// Opens a session for one meeting, replacing any previous session. The
/// cached timings (when present and fresh) and a running timer persisted
/// for the same meeting are restored; a timer for another meeting is left
/// alone so that meeting can still reclaim it.
pub fn open_meeting_impl(state: &AppState, meeting_id: String) -> Result<SessionResponse, InfraError> {
    let meeting_id = meeting_id.trim().to_string();
    if meeting_id.is_empty() {
        return Err(InfraError::InvalidInput(
            "meeting_id must not be empty".to_string(),
        ));
    }

    let now = (state.now_provider)();
    let cache = match state.cache_repository.load(&meeting_id, now) {
        Ok(Some(cache)) => cache,
        Ok(None) => TimingCache::new(),
        Err(error) => {
            state.log_error(
                "open_meeting",
                &format!("cache load failed for meeting_id={meeting_id}: {error}"),
            );
            TimingCache::new()
        }
    };

    let running = match state.cache_repository.load_running_timer() {
        Ok(Some(persisted)) if persisted.meeting_id == meeting_id => Some(RunningTimer {
            segment_id: persisted.segment_id,
            segment_type: persisted.segment_type,
            started_at_ms: persisted.started_at,
            speaker_name: persisted.speaker_name,
        }),
        Ok(_) => None,
        Err(error) => {
            state.log_error(
                "open_meeting",
                &format!("running timer load failed: {error}"),
            );
            None
        }
    };

    let session = MeetingSession {
        meeting_id: meeting_id.clone(),
        can_control: None,
        cache,
        running,
    };
    let response = SessionResponse {
        meeting_id: meeting_id.clone(),
        unsaved_count: session.cache.unsaved_count(),
        running_segment_id: session
            .running
            .as_ref()
            .map(|running| running.segment_id.clone()),
    };

    let mut runtime = lock_runtime(state)?;
    runtime.session = Some(session);
    drop(runtime);

    state.log_info("open_meeting", &format!("opened meeting_id={meeting_id}"));
    Ok(response)
}

/// Persists the session cache and drops the session. The persisted running
/// timer is kept so a restart can resume it.
pub fn close_meeting_impl(state: &AppState) -> Result<bool, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let Some(session) = runtime.session.take() else {
        return Ok(false);
    };
    drop(runtime);

    persist_cache_best_effort(state, "close_meeting", &session.meeting_id, &session.cache);
    state.log_info(
        "close_meeting",
        &format!("closed meeting_id={}", session.meeting_id),
    );
    Ok(true)
}

/// Starts the single running timer. Rejected while another timer runs, when
/// control is known to be denied, or when the segment type requires a
/// speaker name and none was given. On rejection the running state is
/// unchanged.
pub fn start_timer_impl(
    state: &AppState,
    segment_id: String,
    segment_type: String,
    speaker_name: Option<String>,
) -> Result<StartTimerResponse, InfraError> {
    let segment_id = segment_id.trim().to_string();
    if segment_id.is_empty() {
        return Err(InfraError::InvalidInput(
            "segment_id must not be empty".to_string(),
        ));
    }
    let speaker_name = speaker_name
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned);
    if requires_speaker_name(&segment_type) && speaker_name.is_none() {
        return Err(InfraError::InvalidInput(format!(
            "speaker name is required for segment type '{}'",
            segment_type.trim()
        )));
    }

    let started_at_ms = state.now_millis();
    let (meeting_id, running) = {
        let mut runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_mut()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        if session.can_control == Some(false) {
            return Err(InfraError::InvalidInput(
                "timing control is not permitted for this meeting".to_string(),
            ));
        }
        if session.running.is_some() {
            return Err(InfraError::InvalidInput(
                "a timer is already running".to_string(),
            ));
        }

        let running = RunningTimer {
            segment_id: segment_id.clone(),
            segment_type: segment_type.trim().to_string(),
            started_at_ms,
            speaker_name,
        };
        session.running = Some(running.clone());
        (session.meeting_id.clone(), running)
    };

    let persisted = PersistedRunningTimer {
        meeting_id,
        segment_id: running.segment_id.clone(),
        segment_type: running.segment_type.clone(),
        started_at: running.started_at_ms,
        speaker_name: running.speaker_name.clone(),
    };
    if let Err(error) = state.cache_repository.save_running_timer(&persisted) {
        state.log_error(
            "start_timer",
            &format!("running timer persist failed: {error}"),
        );
    }

    state.log_info(
        "start_timer",
        &format!("started segment_id={}", running.segment_id),
    );
    Ok(StartTimerResponse {
        segment_id: running.segment_id,
        started_at_ms: running.started_at_ms,
        speaker_name: running.speaker_name,
    })
}

/// Side-effect-free view of the running timer against a planned duration.
/// The caller decides the sampling cadence.
pub fn timer_snapshot_impl(
    state: &AppState,
    planned_minutes: u32,
) -> Result<TimerSnapshotResponse, InfraError> {
    let now_ms = state.now_millis();
    let runtime = lock_runtime(state)?;
    let running = runtime
        .session
        .as_ref()
        .and_then(|session| session.running.as_ref());

    let cards = card_times(planned_minutes);
    let (is_running, segment_id, speaker_name, elapsed) = match running {
        Some(running) => (
            true,
            Some(running.segment_id.clone()),
            running.speaker_name.clone(),
            (now_ms - running.started_at_ms).div_euclid(1000),
        ),
        None => (false, None, None, 0),
    };

    Ok(TimerSnapshotResponse {
        is_running,
        segment_id,
        speaker_name,
        elapsed_seconds: elapsed,
        zone: countdown_zone(planned_minutes, elapsed).as_str().to_string(),
        green_at: cards.green,
        yellow_at: cards.yellow,
        red_at: cards.red,
        remaining_seconds: (cards.red - elapsed).max(0),
    })
}

/// Stops the running timer, records the measurement in the cache, and
/// returns to idle. Rejected while idle; no record is produced then.
pub fn stop_timer_impl(
    state: &AppState,
    planned_duration_minutes: u32,
) -> Result<StopTimerResponse, InfraError> {
    let ended_at_ms = state.now_millis();
    let (meeting_id, cache, response) = {
        let mut runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_mut()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        let running = session
            .running
            .take()
            .ok_or_else(|| InfraError::InvalidInput("no timer is running".to_string()))?;

        let entry = CachedTimingEntry::from_measurement(
            running.speaker_name,
            planned_duration_minutes,
            running.started_at_ms,
            ended_at_ms,
        );
        let response = StopTimerResponse {
            segment_id: running.segment_id.clone(),
            duration_seconds: entry.duration_seconds(),
            dot_color: entry.dot_color,
            unsaved_count: 0,
        };
        session
            .cache
            .append_entry(&running.segment_id, &running.segment_type, entry);
        (
            session.meeting_id.clone(),
            session.cache.clone(),
            StopTimerResponse {
                unsaved_count: session.cache.unsaved_count(),
                ..response
            },
        )
    };

    persist_cache_best_effort(state, "stop_timer", &meeting_id, &cache);
    if let Err(error) = state.cache_repository.clear_running_timer() {
        state.log_error(
            "stop_timer",
            &format!("running timer clear failed: {error}"),
        );
    }

    state.log_info(
        "stop_timer",
        &format!(
            "stopped segment_id={} duration={}s color={}",
            response.segment_id,
            response.duration_seconds,
            response.dot_color.as_str()
        ),
    );
    Ok(response)
}

/// Seeds one segment's cache from server records. A segment already present
/// in the cache (including an explicitly-emptied one) is left untouched.
/// Returns true when the segment was seeded.
pub fn hydrate_segment_impl(
    state: &AppState,
    segment_id: &str,
    segment_type: &str,
    server_records: &[TimingRecord],
) -> Result<bool, InfraError> {
    let (meeting_id, cache, seeded) = {
        let mut runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_mut()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        let seeded = session
            .cache
            .merge_on_load(segment_id, segment_type, server_records);
        (session.meeting_id.clone(), session.cache.clone(), seeded)
    };

    if seeded {
        persist_cache_best_effort(state, "hydrate_segment", &meeting_id, &cache);
    }
    Ok(seeded)
}

/// Removes one cached entry by index. Returns false for an unknown segment
/// or out-of-range index.
pub fn discard_cached_entry_impl(
    state: &AppState,
    segment_id: &str,
    index: usize,
) -> Result<bool, InfraError> {
    let (meeting_id, cache, removed) = {
        let mut runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_mut()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        let removed = session.cache.remove_entry(segment_id, index).is_some();
        (session.meeting_id.clone(), session.cache.clone(), removed)
    };

    if removed {
        persist_cache_best_effort(state, "discard_cached_entry", &meeting_id, &cache);
    }
    Ok(removed)
}

pub fn cached_entries_impl(
    state: &AppState,
    segment_id: &str,
) -> Result<Vec<CachedTimingEntry>, InfraError> {
    let runtime = lock_runtime(state)?;
    let session = runtime
        .session
        .as_ref()
        .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
    Ok(session.cache.entries_for(segment_id).to_vec())
}

pub fn unsaved_count_impl(state: &AppState) -> Result<usize, InfraError> {
    let runtime = lock_runtime(state)?;
    let session = runtime
        .session
        .as_ref()
        .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
    Ok(session.cache.unsaved_count())
}

/// Fetches the meeting's records from the record store and remembers the
/// returned control flag on the session.
pub async fn load_timings_impl<C: RecordStoreClient>(
    state: &AppState,
    client: Arc<C>,
    access_token: Option<&str>,
) -> Result<LoadTimingsResult, InfraError> {
    let meeting_id = current_meeting_id(state)?;
    let sync = timing_sync_service(state, client);
    let response = sync.fetch_timings(access_token, &meeting_id).await?;

    {
        let mut runtime = lock_runtime(state)?;
        if let Some(session) = runtime
            .session
            .as_mut()
            .filter(|session| session.meeting_id == meeting_id)
        {
            session.can_control = Some(response.can_control);
        }
    }

    state.log_info(
        "load_timings",
        &format!(
            "loaded {} records for meeting_id={meeting_id} can_control={}",
            response.timings.len(),
            response.can_control
        ),
    );
    Ok(LoadTimingsResult {
        can_control: response.can_control,
        timings: response.timings,
    })
}

/// Pushes every cached segment to the record store. On success the pushed
/// keys leave the cache; on failure the cache is untouched so the data can
/// be retried.
pub async fn save_timings_impl<C: RecordStoreClient>(
    state: &AppState,
    client: Arc<C>,
    access_token: Option<&str>,
) -> Result<SaveTimingsResult, InfraError> {
    let (meeting_id, mut cache) = {
        let runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_ref()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        if session.can_control == Some(false) {
            return Err(InfraError::InvalidInput(
                "timing control is not permitted for this meeting".to_string(),
            ));
        }
        (session.meeting_id.clone(), session.cache.clone())
    };

    let snapshot = cache.clone();
    let sync = timing_sync_service(state, client);
    let result = sync.push_all(access_token, &meeting_id, &mut cache).await?;

    // Measurements recorded while the push was in flight exist only in the
    // live session cache, so the drained clone must not replace it. Remove
    // exactly the pushed entries from the live cache and re-persist, which
    // also supersedes the stale snapshot row written inside the push.
    let merged = {
        let mut runtime = lock_runtime(state)?;
        runtime
            .session
            .as_mut()
            .filter(|session| session.meeting_id == meeting_id)
            .map(|session| {
                for segment in snapshot.segments() {
                    for entry in &segment.entries {
                        if let Some(position) = session
                            .cache
                            .entries_for(&segment.segment_id)
                            .iter()
                            .position(|cached| cached == entry)
                        {
                            session.cache.remove_entry(&segment.segment_id, position);
                        }
                    }
                    // The server now holds the pushed state for this segment.
                    // An emptied key would push a clear later, so it only
                    // survives when new entries arrived mid-push.
                    if session.cache.has_segment(&segment.segment_id)
                        && session.cache.entries_for(&segment.segment_id).is_empty()
                    {
                        session.cache.drop_segment(&segment.segment_id);
                    }
                }
                session.cache.clone()
            })
    };
    if let Some(cache) = merged {
        persist_cache_best_effort(state, "save_timings", &meeting_id, &cache);
    }

    state.log_info(
        "save_timings",
        &format!(
            "pushed {} segments for meeting_id={meeting_id}",
            result.pushed_segments.len()
        ),
    );
    Ok(SaveTimingsResult {
        pushed_segments: result.pushed_segments,
        created: result.created,
    })
}

/// Pushes one cached entry as a single record, for saving a segment card
/// without draining the whole cache. On success the entry leaves the cache;
/// a segment fully saved this way drops its key so a later batch push
/// cannot clear the records it just created.
pub async fn save_cached_entry_impl<C: RecordStoreClient>(
    state: &AppState,
    client: Arc<C>,
    access_token: Option<&str>,
    segment_id: &str,
    index: usize,
) -> Result<TimingRecord, InfraError> {
    let (meeting_id, entry) = {
        let runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_ref()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        if session.can_control == Some(false) {
            return Err(InfraError::InvalidInput(
                "timing control is not permitted for this meeting".to_string(),
            ));
        }
        let entry = session
            .cache
            .entries_for(segment_id)
            .get(index)
            .cloned()
            .ok_or_else(|| {
                InfraError::InvalidInput(format!(
                    "no cached entry at index {index} for segment_id={segment_id}"
                ))
            })?;
        (session.meeting_id.clone(), entry)
    };

    let sync = timing_sync_service(state, client);
    let record = sync
        .push_entry(access_token, &meeting_id, segment_id, &entry)
        .await?;

    let merged = {
        let mut runtime = lock_runtime(state)?;
        runtime
            .session
            .as_mut()
            .filter(|session| session.meeting_id == meeting_id)
            .map(|session| {
                // Look the entry up again; other removals may have shifted
                // the index while the create was in flight.
                if let Some(position) = session
                    .cache
                    .entries_for(segment_id)
                    .iter()
                    .position(|cached| cached == &entry)
                {
                    session.cache.remove_entry(segment_id, position);
                }
                if session.cache.has_segment(segment_id)
                    && session.cache.entries_for(segment_id).is_empty()
                {
                    session.cache.drop_segment(segment_id);
                }
                session.cache.clone()
            })
    };
    if let Some(cache) = merged {
        persist_cache_best_effort(state, "save_cached_entry", &meeting_id, &cache);
    }

    state.log_info(
        "save_cached_entry",
        &format!("saved one timing for segment_id={segment_id} meeting_id={meeting_id}"),
    );
    Ok(record)
}

/// Deletes one persisted record on the record store. Cached entries are not
/// affected; deletion of those goes through `discard_cached_entry_impl`.
pub async fn delete_timing_impl<C: RecordStoreClient>(
    state: &AppState,
    client: Arc<C>,
    access_token: Option<&str>,
    timing_id: &str,
) -> Result<(), InfraError> {
    let timing_id = timing_id.trim();
    if timing_id.is_empty() {
        return Err(InfraError::InvalidInput(
            "timing_id must not be empty".to_string(),
        ));
    }

    let meeting_id = {
        let runtime = lock_runtime(state)?;
        let session = runtime
            .session
            .as_ref()
            .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))?;
        if session.can_control == Some(false) {
            return Err(InfraError::InvalidInput(
                "timing control is not permitted for this meeting".to_string(),
            ));
        }
        session.meeting_id.clone()
    };

    let sync = timing_sync_service(state, client);
    sync.delete_timing(access_token, &meeting_id, timing_id)
        .await?;
    state.log_info(
        "delete_timing",
        &format!("deleted timing_id={timing_id} meeting_id={meeting_id}"),
    );
    Ok(())
}

/// Builds the production record store client from the configured base URL.
pub fn default_record_store_client(
    state: &AppState,
) -> Result<Arc<ReqwestRecordStoreClient>, InfraError> {
    let base_url = read_api_base_url(state.config_dir())?;
    Ok(Arc::new(ReqwestRecordStoreClient::new(&base_url)?))
}

fn timing_sync_service<C: RecordStoreClient>(
    state: &AppState,
    client: Arc<C>,
) -> TimingSyncService<C, SqliteTimingCacheRepository> {
    TimingSyncService::new(client, Arc::clone(&state.cache_repository))
        .with_now_provider(Arc::clone(&state.now_provider))
}

fn current_meeting_id(state: &AppState) -> Result<String, InfraError> {
    let runtime = lock_runtime(state)?;
    runtime
        .session
        .as_ref()
        .map(|session| session.meeting_id.clone())
        .ok_or_else(|| InfraError::InvalidInput("no open meeting".to_string()))
}

fn persist_cache_best_effort(state: &AppState, command: &str, meeting_id: &str, cache: &TimingCache) {
    if let Err(error) = state
        .cache_repository
        .save(meeting_id, cache, (state.now_provider)())
    {
        state.log_error(
            command,
            &format!("cache persist failed for meeting_id={meeting_id}: {error}"),
        );
    }
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidInput(format!("runtime lock poisoned: {error}")))
}
