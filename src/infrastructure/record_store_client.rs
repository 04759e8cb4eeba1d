use crate::domain::models::TimingRecord;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

/// GET response for a meeting's timings. `can_control` reports whether the
/// caller may create or delete records for this meeting.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct TimingsListResponse {
    pub can_control: bool,
    pub timings: Vec<TimingRecord>,
}

/// Single-create request. The server derives the floored duration and dot
/// color from the start and end times.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TimingCreateRequest {
    pub segment_id: String,
    pub name: Option<String>,
    pub planned_duration_minutes: u32,
    pub actual_start_time: String,
    pub actual_end_time: String,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimingBatchItem {
    pub name: Option<String>,
    pub planned_duration_minutes: u32,
    pub actual_start_time: String,
    pub actual_end_time: String,
}

/// One segment's replacement set within a batch push. An empty `timings`
/// list clears the segment's records on the server.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SegmentTimingsBatch {
    pub segment_id: String,
    pub timings: Vec<TimingBatchItem>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct TimingBatchAllRequest {
    pub segments: Vec<SegmentTimingsBatch>,
}

#[derive(Debug, serde::Deserialize)]
struct BatchAllResponse {
    success: bool,
    timings: Vec<TimingRecord>,
}

#[derive(Debug, serde::Deserialize)]
struct DeleteResponse {
    success: bool,
}

#[async_trait]
pub trait RecordStoreClient: Send + Sync {
    async fn fetch_timings(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
    ) -> Result<TimingsListResponse, InfraError>;

    async fn create_timing(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        request: &TimingCreateRequest,
    ) -> Result<TimingRecord, InfraError>;

    /// Replaces the records of every listed segment in one call.
    async fn create_timings_batch_all(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        request: &TimingBatchAllRequest,
    ) -> Result<Vec<TimingRecord>, InfraError>;

    async fn delete_timing(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        timing_id: &str,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestRecordStoreClient {
    client: Client,
    base_url: Url,
}

impl ReqwestRecordStoreClient {
    pub fn new(base_url: &str) -> Result<Self, InfraError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| InfraError::Api(format!("invalid record store base url: {error}")))?;
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::InvalidInput(format!(
                "{field} must not be empty"
            )));
        }
        Ok(())
    }

    fn api_http_error(status: reqwest::StatusCode, body: &str) -> InfraError {
        let message = if body.trim().is_empty() {
            format!("record store api error: http {}", status.as_u16())
        } else {
            format!(
                "record store api error: http {}; body={body}",
                status.as_u16()
            )
        };
        InfraError::Api(message)
    }

    fn timings_endpoint(&self, meeting_id: &str) -> Result<Url, InfraError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Api("record store base URL cannot be a base".to_string())
            })?;
            segments.push("meetings");
            segments.push(meeting_id);
            segments.push("timings");
        }
        Ok(url)
    }

    fn batch_all_endpoint(&self, meeting_id: &str) -> Result<Url, InfraError> {
        let mut url = self.timings_endpoint(meeting_id)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Api("timings URL cannot be a base".to_string()))?;
            segments.push("batch-all");
        }
        Ok(url)
    }

    fn timing_endpoint(&self, meeting_id: &str, timing_id: &str) -> Result<Url, InfraError> {
        let mut url = self.timings_endpoint(meeting_id)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| InfraError::Api("timings URL cannot be a base".to_string()))?;
            segments.push(timing_id);
        }
        Ok(url)
    }

    fn with_bearer(
        request: reqwest::RequestBuilder,
        access_token: Option<&str>,
    ) -> reqwest::RequestBuilder {
        match access_token.map(str::trim).filter(|token| !token.is_empty()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RecordStoreClient for ReqwestRecordStoreClient {
    async fn fetch_timings(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
    ) -> Result<TimingsListResponse, InfraError> {
        Self::ensure_non_empty(meeting_id, "meeting id")?;

        let endpoint = self.timings_endpoint(meeting_id)?;
        let response = Self::with_bearer(self.client.get(endpoint), access_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while fetching timings: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Api(format!("failed reading timings response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::Api(format!("invalid timings payload: {error}; body={body}"))
        })
    }

    async fn create_timing(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        request: &TimingCreateRequest,
    ) -> Result<TimingRecord, InfraError> {
        Self::ensure_non_empty(meeting_id, "meeting id")?;
        Self::ensure_non_empty(&request.segment_id, "segment id")?;

        let endpoint = self.timings_endpoint(meeting_id)?;
        let response = Self::with_bearer(self.client.post(endpoint), access_token)
            .json(request)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while creating timing: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Api(format!("failed reading timing create response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }

        serde_json::from_str(&body).map_err(|error| {
            InfraError::Api(format!("invalid timing create payload: {error}; body={body}"))
        })
    }

    async fn create_timings_batch_all(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        request: &TimingBatchAllRequest,
    ) -> Result<Vec<TimingRecord>, InfraError> {
        Self::ensure_non_empty(meeting_id, "meeting id")?;
        for segment in &request.segments {
            Self::ensure_non_empty(&segment.segment_id, "segment id")?;
        }

        let endpoint = self.batch_all_endpoint(meeting_id)?;
        let response = Self::with_bearer(self.client.post(endpoint), access_token)
            .json(request)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while pushing timings: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Api(format!("failed reading batch push response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }

        let parsed: BatchAllResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Api(format!("invalid batch push payload: {error}; body={body}"))
        })?;
        if !parsed.success {
            return Err(InfraError::Api(
                "record store rejected the batch push".to_string(),
            ));
        }
        Ok(parsed.timings)
    }

    async fn delete_timing(
        &self,
        access_token: Option<&str>,
        meeting_id: &str,
        timing_id: &str,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(meeting_id, "meeting id")?;
        Self::ensure_non_empty(timing_id, "timing id")?;

        let endpoint = self.timing_endpoint(meeting_id, timing_id)?;
        let response = Self::with_bearer(self.client.delete(endpoint), access_token)
            .send()
            .await
            .map_err(|error| {
                InfraError::Api(format!("network error while deleting timing: {error}"))
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|error| {
            InfraError::Api(format!("failed reading timing delete response: {error}"))
        })?;

        if !status.is_success() {
            return Err(Self::api_http_error(status, &body));
        }

        let parsed: DeleteResponse = serde_json::from_str(&body).map_err(|error| {
            InfraError::Api(format!("invalid timing delete payload: {error}; body={body}"))
        })?;
        if !parsed.success {
            return Err(InfraError::Api(
                "record store rejected the timing delete".to_string(),
            ));
        }
        Ok(())
    }
}
