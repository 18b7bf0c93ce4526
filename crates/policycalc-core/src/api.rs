//! Compute API client.
//!
//! The PolicyEngine API uses the same `GET` endpoint to submit and to
//! poll a calculation: the first request enqueues the job, later requests
//! report its state. `ComputeApi` is the seam handlers talk through, so
//! tests substitute a scripted implementation.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::meta::CalculationMeta;
use crate::options::EngineConfig;
use crate::report::ReportRecord;
use crate::status::{CalculationStatus, ComputingInfo};

/// Transport-level failure of a single request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode response: {0}")]
    Decode(String),

    #[error("invalid API url: {0}")]
    InvalidUrl(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),
}

/// Wire payload returned by the calculation endpoints.
///
/// Times are in seconds on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: String,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub average_time: Option<f64>,
    #[serde(default)]
    pub queue_position: Option<u32>,
    #[serde(default)]
    pub estimated_time_remaining: Option<f64>,
}

impl ApiResponse {
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            status: "ok".into(),
            result: Some(result),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn computing() -> Self {
        Self {
            status: "computing".into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    #[must_use]
    pub fn with_queue_position(mut self, position: u32) -> Self {
        self.queue_position = Some(position);
        self
    }

    #[must_use]
    pub fn with_average_time(mut self, seconds: f64) -> Self {
        self.average_time = Some(seconds);
        self
    }

    #[must_use]
    pub fn with_estimated_time_remaining(mut self, seconds: f64) -> Self {
        self.estimated_time_remaining = Some(seconds);
        self
    }

    /// Map the wire payload onto the canonical status shape.
    #[must_use]
    pub fn into_status(self) -> CalculationStatus {
        match self.status.to_ascii_lowercase().as_str() {
            "ok" | "complete" | "completed" => CalculationStatus::Ok {
                result: self.result.unwrap_or(Value::Null),
            },
            "error" | "failed" => CalculationStatus::Error {
                error: self
                    .message
                    .unwrap_or_else(|| "Calculation failed".to_string()),
            },
            "pending" | "submitted" => CalculationStatus::Pending,
            "computing" | "queued" | "running" => CalculationStatus::Computing(ComputingInfo {
                progress: self.progress,
                message: self.message,
                estimated_time_remaining: self.estimated_time_remaining.map(seconds_to_ms),
                queue_position: self.queue_position,
                average_time: self.average_time.map(seconds_to_ms),
            }),
            other => CalculationStatus::Error {
                error: format!("Unexpected calculation status: {other}"),
            },
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn seconds_to_ms(seconds: f64) -> u64 {
    (seconds.max(0.0) * 1000.0).round() as u64
}

/// Per-kind submit/poll endpoints and report write-back.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Submit or poll a household calculation under one policy.
    async fn household_impact(
        &self,
        country_id: &str,
        household_id: &str,
        policy_id: &str,
    ) -> Result<ApiResponse, ApiError>;

    /// Submit or poll a society-wide calculation.
    async fn economy_impact(&self, meta: &CalculationMeta) -> Result<ApiResponse, ApiError>;

    /// Write a finished calculation into a stored report.
    async fn update_report(
        &self,
        country_id: &str,
        report_id: &str,
        record: &ReportRecord,
    ) -> Result<(), ApiError>;
}

/// `reqwest`-backed client for the PolicyEngine API.
#[derive(Clone)]
pub struct HttpComputeApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpComputeApi {
    pub fn new(config: &EngineConfig) -> Result<Self, ApiError> {
        let base_url =
            Url::parse(&config.api_url).map_err(|e| ApiError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(config.api_url.clone()));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded.
    pub fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn get_calculation(
        &self,
        url: Url,
        query: &[(&str, &str)],
    ) -> Result<ApiResponse, ApiError> {
        debug!(url = %url, "GET calculation");
        let response = self.client.get(url).query(query).send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            return serde_json::from_str(&text).map_err(|e| ApiError::Decode(e.to_string()));
        }
        // Domain failures come back as non-2xx with a normal error payload.
        if let Ok(body) = serde_json::from_str::<ApiResponse>(&text) {
            if body.status.eq_ignore_ascii_case("error") {
                return Ok(body);
            }
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            body: text,
        })
    }
}

#[async_trait]
impl ComputeApi for HttpComputeApi {
    async fn household_impact(
        &self,
        country_id: &str,
        household_id: &str,
        policy_id: &str,
    ) -> Result<ApiResponse, ApiError> {
        let url = self.endpoint(&[country_id, "household", household_id, "policy", policy_id])?;
        self.get_calculation(url, &[]).await
    }

    async fn economy_impact(&self, meta: &CalculationMeta) -> Result<ApiResponse, ApiError> {
        let policies = meta.policy_ids();
        let url = self.endpoint(&[
            meta.country_id(),
            "economy",
            policies.effective(),
            "over",
            &policies.baseline,
        ])?;
        let region = meta.region().unwrap_or(meta.country_id());
        let mut query = vec![("region", region), ("dataset", meta.population_id())];
        if let Some(period) = meta.time_period() {
            query.push(("time_period", period));
        }
        self.get_calculation(url, &query).await
    }

    async fn update_report(
        &self,
        country_id: &str,
        report_id: &str,
        record: &ReportRecord,
    ) -> Result<(), ApiError> {
        let url = self.endpoint(&[country_id, "report"])?;
        let mut body = serde_json::to_value(record).map_err(|e| ApiError::Decode(e.to_string()))?;
        body["id"] = Value::String(report_id.to_string());

        let response = self.client.patch(url).json(&body).send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ApiError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }
}
