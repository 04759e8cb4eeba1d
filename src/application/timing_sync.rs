use crate::domain::cache::{CachedTimingEntry, TimingCache};
use crate::domain::models::TimingRecord;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::record_store_client::{
    RecordStoreClient, SegmentTimingsBatch, TimingBatchAllRequest, TimingBatchItem,
    TimingCreateRequest, TimingsListResponse,
};
use crate::infrastructure::timing_cache::TimingCacheRepository;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::time::{Duration as TokioDuration, sleep};

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PushResult {
    /// Segment ids whose cached entries were accepted by the server.
    pub pushed_segments: Vec<String>,
    /// Records the server now holds for the pushed segments.
    pub created: Vec<TimingRecord>,
}

/// Reconciles the local timing cache with the record store. On a successful
/// push the server becomes authoritative for the pushed segments and their
/// keys leave the cache; on failure the cache is untouched so the data can
/// be retried later.
pub struct TimingSyncService<C, R>
where
    C: RecordStoreClient,
    R: TimingCacheRepository,
{
    record_store_client: Arc<C>,
    cache_repository: Arc<R>,
    retry_policy: RetryPolicy,
    now_provider: NowProvider,
}

impl<C, R> TimingSyncService<C, R>
where
    C: RecordStoreClient,
    R: TimingCacheRepository,
{
    pub fn new(record_store_client: Arc<C>, cache_repository: Arc<R>) -> Self {
        Self {
            record_store_client,
            cache_repository,
            retry_policy: RetryPolicy::default(),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub async fn fetch_timings(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
    ) -> Result<TimingsListResponse, InfraError> {
        self.with_retry(|| {
            let client = Arc::clone(&self.record_store_client);
            let meeting_id = meeting_id.to_string();
            let token = access_token.map(ToOwned::to_owned);
            async move { client.fetch_timings(token.as_deref(), &meeting_id).await }
        })
        .await
    }

    /// Pushes every cached segment to the server in one batch, including
    /// explicitly-emptied segments whose empty list clears the server side.
    /// Pushed segment keys are dropped from `cache` on success and the
    /// local store is updated to match.
    pub async fn push_all(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        cache: &mut TimingCache,
    ) -> Result<PushResult, InfraError> {
        let request = Self::build_batch_request(cache);
        if request.segments.is_empty() {
            return Ok(PushResult {
                pushed_segments: Vec::new(),
                created: Vec::new(),
            });
        }
        let pushed_segments: Vec<String> = request
            .segments
            .iter()
            .map(|segment| segment.segment_id.clone())
            .collect();

        let created = self
            .with_retry(|| {
                let client = Arc::clone(&self.record_store_client);
                let meeting_id = meeting_id.to_string();
                let token = access_token.map(ToOwned::to_owned);
                let request = request.clone();
                async move {
                    client
                        .create_timings_batch_all(token.as_deref(), &meeting_id, &request)
                        .await
                }
            })
            .await?;

        for segment_id in &pushed_segments {
            cache.drop_segment(segment_id);
        }
        self.cache_repository
            .save(meeting_id, cache, (self.now_provider)())?;

        Ok(PushResult {
            pushed_segments,
            created,
        })
    }

    /// Pushes one cached entry as a single create. The caller is
    /// responsible for removing the entry from its cache once the created
    /// record comes back.
    pub async fn push_entry(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        segment_id: &str,
        entry: &CachedTimingEntry,
    ) -> Result<TimingRecord, InfraError> {
        let request = TimingCreateRequest {
            segment_id: segment_id.to_string(),
            name: entry.name.clone(),
            planned_duration_minutes: entry.planned_duration_minutes,
            actual_start_time: millis_to_rfc3339(entry.started_at),
            actual_end_time: millis_to_rfc3339(entry.ended_at),
        };
        self.with_retry(|| {
            let client = Arc::clone(&self.record_store_client);
            let meeting_id = meeting_id.to_string();
            let token = access_token.map(ToOwned::to_owned);
            let request = request.clone();
            async move {
                client
                    .create_timing(token.as_deref(), &meeting_id, &request)
                    .await
            }
        })
        .await
    }

    pub async fn delete_timing(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        timing_id: &str,
    ) -> Result<(), InfraError> {
        self.with_retry(|| {
            let client = Arc::clone(&self.record_store_client);
            let meeting_id = meeting_id.to_string();
            let timing_id = timing_id.to_string();
            let token = access_token.map(ToOwned::to_owned);
            async move {
                client
                    .delete_timing(token.as_deref(), &meeting_id, &timing_id)
                    .await
            }
        })
        .await
    }

    fn build_batch_request(cache: &TimingCache) -> TimingBatchAllRequest {
        let mut segments: Vec<SegmentTimingsBatch> = cache
            .segments()
            .map(|segment| SegmentTimingsBatch {
                segment_id: segment.segment_id.clone(),
                timings: segment
                    .entries
                    .iter()
                    .map(|entry| TimingBatchItem {
                        name: entry.name.clone(),
                        planned_duration_minutes: entry.planned_duration_minutes,
                        actual_start_time: millis_to_rfc3339(entry.started_at),
                        actual_end_time: millis_to_rfc3339(entry.ended_at),
                    })
                    .collect(),
            })
            .collect();
        segments.sort_by(|a, b| a.segment_id.cmp(&b.segment_id));
        TimingBatchAllRequest { segments }
    }

    async fn with_retry<F, Fut, T>(&self, mut operation: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        match error {
            InfraError::Api(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

fn millis_to_rfc3339(millis: i64) -> String {
    DateTime::from_timestamp_millis(millis)
        .unwrap_or(DateTime::UNIX_EPOCH)
        .to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache::CachedTimingEntry;
    use crate::domain::models::{DotColor, TimingRecord, dot_color};
    use crate::infrastructure::record_store_client::{TimingCreateRequest, TimingsListResponse};
    use crate::infrastructure::timing_cache::InMemoryTimingCacheRepository;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    enum FakeBatchResponse {
        Success,
        NetworkError,
        Forbidden,
    }

    #[derive(Debug, Default)]
    struct FakeRecordStoreClient {
        can_control: bool,
        server_records: Mutex<Vec<TimingRecord>>,
        batch_responses: Mutex<VecDeque<FakeBatchResponse>>,
        batch_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl FakeRecordStoreClient {
        fn with_batch_responses(responses: Vec<FakeBatchResponse>) -> Self {
            Self {
                can_control: true,
                batch_responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn record_from_item(meeting_id: &str, segment_id: &str, item: &TimingBatchItem) -> TimingRecord {
            let start = DateTime::parse_from_rfc3339(&item.actual_start_time)
                .expect("valid start")
                .timestamp_millis();
            let end = DateTime::parse_from_rfc3339(&item.actual_end_time)
                .expect("valid end")
                .timestamp_millis();
            let duration = (end - start).div_euclid(1000);
            TimingRecord {
                id: Some(format!("srv-{segment_id}-{start}")),
                meeting_id: meeting_id.to_string(),
                segment_id: segment_id.to_string(),
                name: item.name.clone(),
                planned_duration_minutes: item.planned_duration_minutes,
                actual_start_time: item.actual_start_time.clone(),
                actual_end_time: item.actual_end_time.clone(),
                actual_duration_seconds: duration,
                dot_color: dot_color(item.planned_duration_minutes, duration),
                created_at: None,
                updated_at: None,
            }
        }
    }

    #[async_trait]
    impl RecordStoreClient for FakeRecordStoreClient {
        async fn fetch_timings(
            &self,
            _access_token: Option<&str>,
            _meeting_id: &str,
        ) -> Result<TimingsListResponse, InfraError> {
            self.fetch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TimingsListResponse {
                can_control: self.can_control,
                timings: self
                    .server_records
                    .lock()
                    .expect("server records lock poisoned")
                    .clone(),
            })
        }

        async fn create_timing(
            &self,
            _access_token: Option<&str>,
            meeting_id: &str,
            request: &TimingCreateRequest,
        ) -> Result<TimingRecord, InfraError> {
            let item = TimingBatchItem {
                name: request.name.clone(),
                planned_duration_minutes: request.planned_duration_minutes,
                actual_start_time: request.actual_start_time.clone(),
                actual_end_time: request.actual_end_time.clone(),
            };
            let record = Self::record_from_item(meeting_id, &request.segment_id, &item);
            self.server_records
                .lock()
                .expect("server records lock poisoned")
                .push(record.clone());
            Ok(record)
        }

        async fn create_timings_batch_all(
            &self,
            _access_token: Option<&str>,
            meeting_id: &str,
            request: &TimingBatchAllRequest,
        ) -> Result<Vec<TimingRecord>, InfraError> {
            self.batch_calls.fetch_add(1, Ordering::SeqCst);

            let response = self
                .batch_responses
                .lock()
                .expect("batch response lock poisoned")
                .pop_front()
                .unwrap_or(FakeBatchResponse::Success);

            match response {
                FakeBatchResponse::NetworkError => {
                    return Err(InfraError::Api(
                        "network error while pushing timings".to_string(),
                    ));
                }
                FakeBatchResponse::Forbidden => {
                    return Err(InfraError::Api(
                        "record store api error: http 403".to_string(),
                    ));
                }
                FakeBatchResponse::Success => {}
            }

            let mut records = self
                .server_records
                .lock()
                .expect("server records lock poisoned");
            for segment in &request.segments {
                records.retain(|record| record.segment_id != segment.segment_id);
                for item in &segment.timings {
                    records.push(Self::record_from_item(meeting_id, &segment.segment_id, item));
                }
            }
            Ok(records.clone())
        }

        async fn delete_timing(
            &self,
            _access_token: Option<&str>,
            _meeting_id: &str,
            timing_id: &str,
        ) -> Result<(), InfraError> {
            let mut records = self
                .server_records
                .lock()
                .expect("server records lock poisoned");
            records.retain(|record| record.id.as_deref() != Some(timing_id));
            Ok(())
        }
    }

    fn fixed_time() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-04T20:00:00Z")
            .expect("valid datetime")
            .with_timezone(&Utc)
    }

    fn entry(duration_seconds: i64) -> CachedTimingEntry {
        CachedTimingEntry::from_measurement(
            Some("Alice".to_string()),
            2,
            1_700_000_000_000,
            1_700_000_000_000 + duration_seconds * 1000,
        )
    }

    fn service(
        client: Arc<FakeRecordStoreClient>,
        repository: Arc<InMemoryTimingCacheRepository>,
    ) -> TimingSyncService<FakeRecordStoreClient, InMemoryTimingCacheRepository> {
        TimingSyncService::new(client, repository)
            .with_retry_policy(RetryPolicy {
                max_attempts: 2,
                base_delay_ms: 1,
            })
            .with_now_provider(Arc::new(fixed_time))
    }

    #[tokio::test]
    async fn push_all_drops_pushed_segments_on_success() {
        let client = Arc::new(FakeRecordStoreClient::with_batch_responses(vec![
            FakeBatchResponse::Success,
        ]));
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), Arc::clone(&repository));

        let mut cache = TimingCache::new();
        cache.append_entry("seg-1", "Table Topic Session", entry(110));
        cache.append_entry("seg-2", "Prepared Speech", entry(400));

        let result = sync
            .push_all(Some("token"), "mtg-1", &mut cache)
            .await
            .expect("push succeeds");

        assert_eq!(result.pushed_segments.len(), 2);
        assert_eq!(result.created.len(), 2);
        assert!(cache.is_empty());
        // The local store now reflects the emptied cache.
        assert!(
            repository
                .load("mtg-1", fixed_time())
                .expect("load")
                .is_none()
        );
    }

    #[tokio::test]
    async fn push_all_keeps_cache_on_failure() {
        let client = Arc::new(FakeRecordStoreClient::with_batch_responses(vec![
            FakeBatchResponse::Forbidden,
        ]));
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), repository);

        let mut cache = TimingCache::new();
        cache.append_entry("seg-1", "Table Topic Session", entry(110));

        let error = sync
            .push_all(Some("token"), "mtg-1", &mut cache)
            .await
            .expect_err("push fails");
        assert!(matches!(error, InfraError::Api(_)));
        assert_eq!(cache.entries_for("seg-1").len(), 1);
        // 403 is not a transport error, so there is no second attempt.
        assert_eq!(client.batch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn push_all_retries_transport_errors() {
        let client = Arc::new(FakeRecordStoreClient::with_batch_responses(vec![
            FakeBatchResponse::NetworkError,
            FakeBatchResponse::Success,
        ]));
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), repository);

        let mut cache = TimingCache::new();
        cache.append_entry("seg-1", "Table Topic Session", entry(110));

        let result = sync
            .push_all(Some("token"), "mtg-1", &mut cache)
            .await
            .expect("push succeeds after retry");
        assert_eq!(result.pushed_segments, vec!["seg-1".to_string()]);
        assert_eq!(client.batch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn push_all_sends_empty_segment_to_clear_server() {
        let client = Arc::new(FakeRecordStoreClient::with_batch_responses(vec![
            FakeBatchResponse::Success,
        ]));
        // Server already holds a record the user deleted locally.
        {
            let mut records = client.server_records.lock().expect("seed records");
            records.push(FakeRecordStoreClient::record_from_item(
                "mtg-1",
                "seg-1",
                &TimingBatchItem {
                    name: None,
                    planned_duration_minutes: 2,
                    actual_start_time: "2026-03-04T19:00:00+00:00".to_string(),
                    actual_end_time: "2026-03-04T19:02:00+00:00".to_string(),
                },
            ));
        }
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), repository);

        let mut cache = TimingCache::new();
        cache.merge_on_load("seg-1", "Table Topic Session", &[]);

        let result = sync
            .push_all(Some("token"), "mtg-1", &mut cache)
            .await
            .expect("push succeeds");
        assert_eq!(result.pushed_segments, vec!["seg-1".to_string()]);
        assert!(
            client
                .server_records
                .lock()
                .expect("server records")
                .is_empty()
        );
    }

    #[tokio::test]
    async fn push_all_with_empty_cache_skips_network() {
        let client = Arc::new(FakeRecordStoreClient::with_batch_responses(Vec::new()));
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), repository);

        let mut cache = TimingCache::new();
        let result = sync
            .push_all(Some("token"), "mtg-1", &mut cache)
            .await
            .expect("push succeeds");
        assert!(result.pushed_segments.is_empty());
        assert_eq!(client.batch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fetch_timings_reports_control_flag() {
        let client = Arc::new(FakeRecordStoreClient {
            can_control: false,
            ..FakeRecordStoreClient::default()
        });
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), repository);

        let response = sync
            .fetch_timings(None, "mtg-1")
            .await
            .expect("fetch succeeds");
        assert!(!response.can_control);
        assert!(response.timings.is_empty());
    }

    #[tokio::test]
    async fn push_entry_creates_single_record() {
        let client = Arc::new(FakeRecordStoreClient::with_batch_responses(Vec::new()));
        let repository = Arc::new(InMemoryTimingCacheRepository::new());
        let sync = service(Arc::clone(&client), repository);

        let record = sync
            .push_entry(Some("token"), "mtg-1", "seg-1", &entry(110))
            .await
            .expect("create succeeds");
        assert_eq!(record.segment_id, "seg-1");
        assert_eq!(record.actual_duration_seconds, 110);
        assert_eq!(
            client
                .server_records
                .lock()
                .expect("server records")
                .len(),
            1
        );
    }

    proptest! {
        #[test]
        fn pushed_entries_keep_their_durations(durations in prop::collection::vec(1i64..3600i64, 1..8)) {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let client = Arc::new(FakeRecordStoreClient::with_batch_responses(vec![
                    FakeBatchResponse::Success,
                ]));
                let repository = Arc::new(InMemoryTimingCacheRepository::new());
                let sync = service(Arc::clone(&client), repository);

                let mut cache = TimingCache::new();
                for duration in &durations {
                    cache.append_entry("seg-1", "Table Topic Session", entry(*duration));
                }

                let result = sync
                    .push_all(Some("token"), "mtg-1", &mut cache)
                    .await
                    .expect("push succeeds");

                assert_eq!(result.created.len(), durations.len());
                let mut created: Vec<i64> = result
                    .created
                    .iter()
                    .map(|record| record.actual_duration_seconds)
                    .collect();
                let mut expected = durations.clone();
                created.sort_unstable();
                expected.sort_unstable();
                assert_eq!(created, expected);
                assert!(result.created.iter().all(|record| {
                    record.dot_color == dot_color(2, record.actual_duration_seconds)
                }));
            });
        }
    }

    #[test]
    fn dot_color_of_fake_matches_domain() {
        // Guard for the fake itself: 120s at a 2 min plan is Red.
        let item = TimingBatchItem {
            name: None,
            planned_duration_minutes: 2,
            actual_start_time: "2026-03-04T19:00:00+00:00".to_string(),
            actual_end_time: "2026-03-04T19:02:00+00:00".to_string(),
        };
        let record = FakeRecordStoreClient::record_from_item("mtg-1", "seg-1", &item);
        assert_eq!(record.actual_duration_seconds, 120);
        assert_eq!(record.dot_color, DotColor::Red);
    }
}
