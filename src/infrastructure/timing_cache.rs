use crate::domain::cache::TimingCache;
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Running timer state persisted across restarts. Only one timer exists
/// at a time; a persisted timer is only adopted by a session for the
/// same meeting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedRunningTimer {
    pub meeting_id: String,
    pub segment_id: String,
    pub segment_type: String,
    /// Wall-clock start in unix milliseconds.
    pub started_at: i64,
    #[serde(default)]
    pub speaker_name: Option<String>,
}

pub trait TimingCacheRepository: Send + Sync {
    /// Loads the cache for one meeting. An entry older than the TTL is
    /// treated as absent and removed.
    fn load(&self, meeting_id: &str, now: DateTime<Utc>) -> Result<Option<TimingCache>, InfraError>;

    /// Persists the cache for one meeting. An empty cache removes the row.
    fn save(
        &self,
        meeting_id: &str,
        cache: &TimingCache,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError>;

    fn clear(&self, meeting_id: &str) -> Result<(), InfraError>;

    /// Removes every expired or unreadable cache row. Returns the number
    /// of rows removed. Run once at application start.
    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, InfraError>;

    fn load_running_timer(&self) -> Result<Option<PersistedRunningTimer>, InfraError>;
    fn save_running_timer(&self, timer: &PersistedRunningTimer) -> Result<(), InfraError>;
    fn clear_running_timer(&self) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct SqliteTimingCacheRepository {
    db_path: PathBuf,
    ttl: Duration,
}

impl SqliteTimingCacheRepository {
    pub fn new(db_path: impl AsRef<Path>, ttl_hours: u32) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
            ttl: Duration::hours(i64::from(ttl_hours)),
        }
    }

    fn connect(&self) -> Result<Connection, InfraError> {
        Connection::open(&self.db_path).map_err(InfraError::from)
    }

    fn is_expired(&self, cached_at_raw: &str, now: DateTime<Utc>) -> bool {
        match DateTime::parse_from_rfc3339(cached_at_raw) {
            Ok(cached_at) => now - cached_at.with_timezone(&Utc) > self.ttl,
            // Unreadable timestamps count as expired so the sweep drops them.
            Err(_) => true,
        }
    }
}

impl TimingCacheRepository for SqliteTimingCacheRepository {
    fn load(&self, meeting_id: &str, now: DateTime<Utc>) -> Result<Option<TimingCache>, InfraError> {
        let connection = self.connect()?;
        let row: Option<(String, String)> = connection
            .query_row(
                "SELECT cached_at, payload FROM timing_cache WHERE meeting_id = ?1",
                params![meeting_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((cached_at_raw, payload)) = row else {
            return Ok(None);
        };

        if self.is_expired(&cached_at_raw, now) {
            connection.execute(
                "DELETE FROM timing_cache WHERE meeting_id = ?1",
                params![meeting_id],
            )?;
            return Ok(None);
        }

        let cache: TimingCache = serde_json::from_str(&payload)?;
        Ok(Some(cache))
    }

    fn save(
        &self,
        meeting_id: &str,
        cache: &TimingCache,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let connection = self.connect()?;
        if cache.is_empty() {
            connection.execute(
                "DELETE FROM timing_cache WHERE meeting_id = ?1",
                params![meeting_id],
            )?;
            return Ok(());
        }

        let payload = serde_json::to_string(cache)?;
        connection.execute(
            "INSERT INTO timing_cache (meeting_id, cached_at, payload)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(meeting_id) DO UPDATE SET
               cached_at = excluded.cached_at,
               payload = excluded.payload",
            params![meeting_id, now.to_rfc3339(), payload],
        )?;
        Ok(())
    }

    fn clear(&self, meeting_id: &str) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute(
            "DELETE FROM timing_cache WHERE meeting_id = ?1",
            params![meeting_id],
        )?;
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, InfraError> {
        let connection = self.connect()?;
        let mut statement =
            connection.prepare("SELECT meeting_id, cached_at FROM timing_cache")?;
        let rows = statement.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut expired = Vec::new();
        for row in rows {
            let (meeting_id, cached_at_raw) = row?;
            if self.is_expired(&cached_at_raw, now) {
                expired.push(meeting_id);
            }
        }
        drop(statement);

        for meeting_id in &expired {
            connection.execute(
                "DELETE FROM timing_cache WHERE meeting_id = ?1",
                params![meeting_id],
            )?;
        }
        Ok(expired.len())
    }

    fn load_running_timer(&self) -> Result<Option<PersistedRunningTimer>, InfraError> {
        let connection = self.connect()?;
        let payload: Option<String> = connection
            .query_row(
                "SELECT payload FROM running_timer WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        let timer: PersistedRunningTimer = serde_json::from_str(&payload)?;
        Ok(Some(timer))
    }

    fn save_running_timer(&self, timer: &PersistedRunningTimer) -> Result<(), InfraError> {
        let connection = self.connect()?;
        let payload = serde_json::to_string(timer)?;
        connection.execute(
            "INSERT INTO running_timer (id, payload)
             VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload",
            params![payload],
        )?;
        Ok(())
    }

    fn clear_running_timer(&self) -> Result<(), InfraError> {
        let connection = self.connect()?;
        connection.execute("DELETE FROM running_timer WHERE id = 1", [])?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryTimingCacheRepository {
    ttl: Option<Duration>,
    caches: Mutex<HashMap<String, (DateTime<Utc>, TimingCache)>>,
    running_timer: Mutex<Option<PersistedRunningTimer>>,
}

impl InMemoryTimingCacheRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl_hours(ttl_hours: u32) -> Self {
        Self {
            ttl: Some(Duration::hours(i64::from(ttl_hours))),
            ..Self::default()
        }
    }

    fn is_expired(&self, cached_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => now - cached_at > ttl,
            None => false,
        }
    }
}

impl TimingCacheRepository for InMemoryTimingCacheRepository {
    fn load(&self, meeting_id: &str, now: DateTime<Utc>) -> Result<Option<TimingCache>, InfraError> {
        let mut caches = self
            .caches
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("timing cache lock poisoned: {error}")))?;
        let Some((cached_at, cache)) = caches.get(meeting_id) else {
            return Ok(None);
        };
        if self.is_expired(*cached_at, now) {
            caches.remove(meeting_id);
            return Ok(None);
        }
        Ok(Some(cache.clone()))
    }

    fn save(
        &self,
        meeting_id: &str,
        cache: &TimingCache,
        now: DateTime<Utc>,
    ) -> Result<(), InfraError> {
        let mut caches = self
            .caches
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("timing cache lock poisoned: {error}")))?;
        if cache.is_empty() {
            caches.remove(meeting_id);
        } else {
            caches.insert(meeting_id.to_string(), (now, cache.clone()));
        }
        Ok(())
    }

    fn clear(&self, meeting_id: &str) -> Result<(), InfraError> {
        let mut caches = self
            .caches
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("timing cache lock poisoned: {error}")))?;
        caches.remove(meeting_id);
        Ok(())
    }

    fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize, InfraError> {
        let mut caches = self
            .caches
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("timing cache lock poisoned: {error}")))?;
        let before = caches.len();
        caches.retain(|_, (cached_at, _)| !self.is_expired(*cached_at, now));
        Ok(before - caches.len())
    }

    fn load_running_timer(&self) -> Result<Option<PersistedRunningTimer>, InfraError> {
        let timer = self
            .running_timer
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("running timer lock poisoned: {error}")))?;
        Ok(timer.clone())
    }

    fn save_running_timer(&self, timer: &PersistedRunningTimer) -> Result<(), InfraError> {
        let mut slot = self
            .running_timer
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("running timer lock poisoned: {error}")))?;
        *slot = Some(timer.clone());
        Ok(())
    }

    fn clear_running_timer(&self) -> Result<(), InfraError> {
        let mut slot = self
            .running_timer
            .lock()
            .map_err(|error| InfraError::InvalidInput(format!("running timer lock poisoned: {error}")))?;
        *slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::CachedTimingEntry;
    use crate::infrastructure::storage::initialize_database;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static DB_COUNTER: AtomicUsize = AtomicUsize::new(0);

    struct TempDb {
        path: PathBuf,
    }

    impl TempDb {
        fn new() -> Self {
            let unique = DB_COUNTER.fetch_add(1, Ordering::SeqCst);
            let path = std::env::temp_dir().join(format!(
                "gaveltime-cache-{}-{unique}.sqlite",
                std::process::id()
            ));
            initialize_database(&path).expect("initialize db");
            Self { path }
        }
    }

    impl Drop for TempDb {
        fn drop(&mut self) {
            let _ = fs::remove_file(&self.path);
        }
    }

    fn fixed_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn sample_cache() -> TimingCache {
        let mut cache = TimingCache::new();
        cache.append_entry(
            "seg-1",
            "Table Topic Session",
            CachedTimingEntry::from_measurement(Some("Alice".to_string()), 2, 0, 110_000),
        );
        cache
    }

    fn sample_timer() -> PersistedRunningTimer {
        PersistedRunningTimer {
            meeting_id: "mtg-1".to_string(),
            segment_id: "seg-1".to_string(),
            segment_type: "Table Topic Session".to_string(),
            started_at: 1_700_000_000_000,
            speaker_name: Some("Alice".to_string()),
        }
    }

    #[test]
    fn sqlite_cache_roundtrip() {
        let db = TempDb::new();
        let repository = SqliteTimingCacheRepository::new(&db.path, 24);
        let now = fixed_time("2026-03-04T20:00:00Z");

        let cache = sample_cache();
        repository.save("mtg-1", &cache, now).expect("save cache");
        let loaded = repository
            .load("mtg-1", now + Duration::hours(1))
            .expect("load cache");
        assert_eq!(loaded, Some(cache));
    }

    #[test]
    fn sqlite_cache_expires_after_ttl() {
        let db = TempDb::new();
        let repository = SqliteTimingCacheRepository::new(&db.path, 24);
        let now = fixed_time("2026-03-04T20:00:00Z");

        repository
            .save("mtg-1", &sample_cache(), now)
            .expect("save cache");
        let loaded = repository
            .load("mtg-1", now + Duration::hours(25))
            .expect("load cache");
        assert_eq!(loaded, None);

        // The expired row was removed, not just hidden.
        let loaded_again = repository.load("mtg-1", now).expect("load cache");
        assert_eq!(loaded_again, None);
    }

    #[test]
    fn saving_empty_cache_removes_row() {
        let db = TempDb::new();
        let repository = SqliteTimingCacheRepository::new(&db.path, 24);
        let now = fixed_time("2026-03-04T20:00:00Z");

        repository
            .save("mtg-1", &sample_cache(), now)
            .expect("save cache");
        repository
            .save("mtg-1", &TimingCache::new(), now)
            .expect("save empty cache");
        assert_eq!(repository.load("mtg-1", now).expect("load cache"), None);
    }

    #[test]
    fn sweep_removes_only_expired_meetings() {
        let db = TempDb::new();
        let repository = SqliteTimingCacheRepository::new(&db.path, 24);
        let old = fixed_time("2026-03-01T20:00:00Z");
        let recent = fixed_time("2026-03-04T10:00:00Z");
        let now = fixed_time("2026-03-04T20:00:00Z");

        repository
            .save("mtg-old", &sample_cache(), old)
            .expect("save old cache");
        repository
            .save("mtg-recent", &sample_cache(), recent)
            .expect("save recent cache");

        assert_eq!(repository.sweep_expired(now).expect("sweep"), 1);
        assert!(repository.load("mtg-old", now).expect("load").is_none());
        assert!(repository.load("mtg-recent", now).expect("load").is_some());
    }

    #[test]
    fn sweep_removes_unreadable_timestamps() {
        let db = TempDb::new();
        let repository = SqliteTimingCacheRepository::new(&db.path, 24);
        let connection = Connection::open(&db.path).expect("open db");
        connection
            .execute(
                "INSERT INTO timing_cache (meeting_id, cached_at, payload) VALUES (?1, ?2, ?3)",
                params!["mtg-bad", "garbage", "{}"],
            )
            .expect("insert bad row");

        let now = fixed_time("2026-03-04T20:00:00Z");
        assert_eq!(repository.sweep_expired(now).expect("sweep"), 1);
    }

    #[test]
    fn running_timer_roundtrip() {
        let db = TempDb::new();
        let repository = SqliteTimingCacheRepository::new(&db.path, 24);

        assert_eq!(repository.load_running_timer().expect("load"), None);

        let timer = sample_timer();
        repository.save_running_timer(&timer).expect("save timer");
        assert_eq!(repository.load_running_timer().expect("load"), Some(timer));

        repository.clear_running_timer().expect("clear timer");
        assert_eq!(repository.load_running_timer().expect("load"), None);
    }

    #[test]
    fn in_memory_repository_honors_ttl() {
        let repository = InMemoryTimingCacheRepository::with_ttl_hours(24);
        let now = fixed_time("2026-03-04T20:00:00Z");

        repository
            .save("mtg-1", &sample_cache(), now)
            .expect("save cache");
        assert!(
            repository
                .load("mtg-1", now + Duration::hours(1))
                .expect("load")
                .is_some()
        );
        assert!(
            repository
                .load("mtg-1", now + Duration::hours(25))
                .expect("load")
                .is_none()
        );
    }
}
