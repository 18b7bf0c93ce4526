//! Engine configuration.
//!
//! Every tuning constant of polling and progress estimation is carried
//! here so deployments can adjust them without code changes. Values are
//! deserialized from JSON with per-field defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_API_URL, DEFAULT_QUEUE_CAP_PERCENT, DEFAULT_REQUEST_TIMEOUT, DEFAULT_RETRY_DELAY,
    DEFAULT_SERVER_WEIGHT, DEFAULT_TRANSPORT_RETRIES, ECONOMY_EXPECTED_DURATION, ECONOMY_PHASES,
    HOUSEHOLD_EXPECTED_DURATION, HOUSEHOLD_PHASES,
};
use crate::meta::CalcKind;

/// One row of a phase table: the message shown while percent is below
/// `below`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseEntry {
    pub below: f64,
    pub message: String,
}

/// Expected duration and phase messages for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressProfile {
    pub expected_duration_ms: u64,
    pub phases: Vec<PhaseEntry>,
}

impl ProgressProfile {
    fn from_table(expected: Duration, table: &[(f64, &str)]) -> Self {
        Self {
            expected_duration_ms: duration_ms(expected),
            phases: table
                .iter()
                .map(|(below, message)| PhaseEntry {
                    below: *below,
                    message: (*message).to_string(),
                })
                .collect(),
        }
    }

    #[must_use]
    pub fn expected_duration(&self) -> Duration {
        Duration::from_millis(self.expected_duration_ms)
    }
}

/// Poll delays for one kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay while the job is pending.
    pub pending_ms: u64,
    /// Delay while the job waits in the server queue.
    pub queued_ms: u64,
    /// First delay while computing.
    pub computing_min_ms: u64,
    /// Upper bound of the computing delay.
    pub computing_max_ms: u64,
    /// Growth of the computing delay per consecutive poll.
    pub backoff_factor: f64,
}

impl PollingConfig {
    /// Delay before the next poll, given the last status and how many
    /// polls of this run already returned `computing`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn delay_for(
        &self,
        status: &crate::status::CalculationStatus,
        computing_polls: u32,
    ) -> Option<Duration> {
        use crate::status::CalculationStatus;

        let ms = match status {
            CalculationStatus::Ok { .. } | CalculationStatus::Error { .. } => return None,
            CalculationStatus::Pending => self.pending_ms,
            CalculationStatus::Computing(info) if info.is_queued_without_estimate() => {
                self.queued_ms
            }
            CalculationStatus::Computing(info) => {
                if let Some(remaining) = info.estimated_time_remaining {
                    (remaining / 10).clamp(self.computing_min_ms, self.computing_max_ms)
                } else {
                    let exponent = computing_polls.min(32) as i32;
                    let grown = self.computing_min_ms as f64 * self.backoff_factor.powi(exponent);
                    (grown as u64).clamp(self.computing_min_ms, self.computing_max_ms)
                }
            }
        };
        Some(Duration::from_millis(ms))
    }
}

/// Settings for one calculation kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KindConfig {
    pub progress: ProgressProfile,
    pub polling: PollingConfig,
}

/// Full engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Compute API base URL.
    pub api_url: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Retries of a failed poll request before surfacing an error.
    pub transport_retries: u32,
    /// Delay between a failed request and its retry.
    pub retry_delay_ms: u64,
    /// Weight of the server-derived percent in the blend, in [0, 1].
    pub server_weight: f64,
    /// Highest percent while only a queue position is known.
    pub queue_cap_percent: f64,
    pub household: KindConfig,
    pub economy: KindConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout_ms: duration_ms(DEFAULT_REQUEST_TIMEOUT),
            transport_retries: DEFAULT_TRANSPORT_RETRIES,
            retry_delay_ms: duration_ms(DEFAULT_RETRY_DELAY),
            server_weight: DEFAULT_SERVER_WEIGHT,
            queue_cap_percent: DEFAULT_QUEUE_CAP_PERCENT,
            household: KindConfig {
                progress: ProgressProfile::from_table(
                    HOUSEHOLD_EXPECTED_DURATION,
                    HOUSEHOLD_PHASES,
                ),
                polling: PollingConfig {
                    pending_ms: 1_000,
                    queued_ms: 1_000,
                    computing_min_ms: 1_000,
                    computing_max_ms: 2_000,
                    backoff_factor: 1.0,
                },
            },
            economy: KindConfig {
                progress: ProgressProfile::from_table(ECONOMY_EXPECTED_DURATION, ECONOMY_PHASES),
                polling: PollingConfig {
                    pending_ms: 1_000,
                    queued_ms: 1_500,
                    computing_min_ms: 2_000,
                    computing_max_ms: 10_000,
                    backoff_factor: 1.5,
                },
            },
        }
    }
}

impl EngineConfig {
    /// Settings for one kind.
    #[must_use]
    pub fn kind(&self, kind: CalcKind) -> &KindConfig {
        match kind {
            CalcKind::Household => &self.household,
            CalcKind::Economy => &self.economy,
        }
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Normalize the configuration, replacing out-of-range values with
    /// defaults.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        let defaults = Self::default();
        if self.api_url.trim().is_empty() {
            self.api_url = defaults.api_url.clone();
        }
        self.api_url = self.api_url.trim_end_matches('/').to_string();
        if self.request_timeout_ms == 0 {
            self.request_timeout_ms = defaults.request_timeout_ms;
        }
        if !(0.0..=1.0).contains(&self.server_weight) || self.server_weight.is_nan() {
            self.server_weight = defaults.server_weight;
        }
        if !(0.0..=100.0).contains(&self.queue_cap_percent) || self.queue_cap_percent.is_nan() {
            self.queue_cap_percent = defaults.queue_cap_percent;
        }
        normalize_kind(&mut self.household, &defaults.household);
        normalize_kind(&mut self.economy, &defaults.economy);
        self
    }
}

fn normalize_kind(kind: &mut KindConfig, defaults: &KindConfig) {
    if kind.progress.expected_duration_ms == 0 {
        kind.progress.expected_duration_ms = defaults.progress.expected_duration_ms;
    }
    kind.progress.phases.retain(|p| p.below.is_finite());
    kind.progress
        .phases
        .sort_by(|a, b| a.below.total_cmp(&b.below));
    if kind.progress.phases.is_empty() {
        kind.progress.phases.clone_from(&defaults.progress.phases);
    }

    let polling = &mut kind.polling;
    if polling.pending_ms == 0 {
        polling.pending_ms = defaults.polling.pending_ms;
    }
    if polling.queued_ms == 0 {
        polling.queued_ms = defaults.polling.queued_ms;
    }
    if polling.computing_min_ms == 0 {
        polling.computing_min_ms = defaults.polling.computing_min_ms;
    }
    if polling.computing_max_ms < polling.computing_min_ms {
        polling.computing_max_ms = polling.computing_min_ms;
    }
    if !polling.backoff_factor.is_finite() || polling.backoff_factor < 1.0 {
        polling.backoff_factor = 1.0;
    }
}

#[allow(clippy::cast_possible_truncation)]
fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}
