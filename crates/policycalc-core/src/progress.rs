//! Synthetic progress estimation.
//!
//! The compute API reports little about a running job: sometimes a queue
//! position, sometimes a remaining-time estimate, often nothing. The
//! estimator turns those sparse hints into a smooth percentage by
//! blending them with an elapsed-time curve, and never lets the reported
//! value go backwards for a given calculation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::cache::CacheKey;
use crate::constants::{COMPLETE_MESSAGE, MAX_IN_FLIGHT_PERCENT};
use crate::meta::CalcKind;
use crate::options::{EngineConfig, PhaseEntry};
use crate::status::{CalculationStatus, ComputingInfo};

/// One progress reading.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSample {
    /// Percent complete in [0, 100]; 100 only once terminal.
    pub percent: f64,
    pub message: String,
    pub queue_position: Option<u32>,
    pub estimated_remaining: Option<Duration>,
    pub terminal: bool,
}

/// Elapsed-time curve: `min(99, elapsed / expected × 100)`.
#[must_use]
pub fn synthetic_percent(elapsed: Duration, expected: Duration) -> f64 {
    if expected.is_zero() {
        return MAX_IN_FLIGHT_PERCENT;
    }
    (elapsed.as_secs_f64() / expected.as_secs_f64() * 100.0).min(MAX_IN_FLIGHT_PERCENT)
}

/// Percent implied by a remaining-time estimate:
/// `100 × (1 − remaining / expected)`, clamped to [0, 100].
#[must_use]
pub fn server_percent(remaining: Duration, expected: Duration) -> f64 {
    if expected.is_zero() {
        return 0.0;
    }
    (100.0 * (1.0 - remaining.as_secs_f64() / expected.as_secs_f64())).clamp(0.0, 100.0)
}

/// Weighted blend of the server-derived and synthetic percents, clamped
/// to [0, 99].
#[must_use]
pub fn blend(server: f64, synthetic: f64, server_weight: f64) -> f64 {
    (server_weight * server + (1.0 - server_weight) * synthetic).clamp(0.0, MAX_IN_FLIGHT_PERCENT)
}

/// Message of the first phase whose bound is strictly above `percent`.
#[must_use]
pub fn phase_message(phases: &[PhaseEntry], percent: f64) -> &str {
    phases
        .iter()
        .find(|p| p.below > percent)
        .or_else(|| phases.last())
        .map_or("", |p| p.message.as_str())
}

fn queue_message(position: u32) -> String {
    format!("In queue (position {position})...")
}

struct Track {
    first_seen: Instant,
    last_percent: f64,
}

/// Per-calculation progress estimator.
///
/// Keeps the first time each calculation was observed and the highest
/// percent reported for it.
pub struct SyntheticProgressEstimator {
    config: Arc<EngineConfig>,
    tracks: Mutex<HashMap<CacheKey, Track>>,
}

impl SyntheticProgressEstimator {
    #[must_use]
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self {
            config,
            tracks: Mutex::new(HashMap::new()),
        }
    }

    /// Estimate for a status observed `elapsed` after the calculation
    /// started, ignoring earlier samples.
    #[must_use]
    pub fn estimate(
        &self,
        kind: CalcKind,
        status: &CalculationStatus,
        elapsed: Duration,
    ) -> ProgressSample {
        let profile = &self.config.kind(kind).progress;
        let expected = profile.expected_duration();
        let idle = ComputingInfo::default();

        let info = match status {
            CalculationStatus::Ok { .. } => {
                return ProgressSample {
                    percent: 100.0,
                    message: COMPLETE_MESSAGE.to_string(),
                    queue_position: None,
                    estimated_remaining: None,
                    terminal: true,
                }
            }
            CalculationStatus::Error { error } => {
                return ProgressSample {
                    percent: 100.0,
                    message: error.clone(),
                    queue_position: None,
                    estimated_remaining: None,
                    terminal: true,
                }
            }
            CalculationStatus::Pending => &idle,
            CalculationStatus::Computing(info) => info,
        };

        let synthetic = synthetic_percent(elapsed, expected);

        if let (Some(position), None) = (info.queue_position, info.estimated_time_remaining) {
            return ProgressSample {
                percent: synthetic.clamp(0.0, self.config.queue_cap_percent),
                message: queue_message(position),
                queue_position: Some(position),
                estimated_remaining: None,
                terminal: false,
            };
        }

        let server = info
            .estimated_remaining()
            .map(|remaining| server_percent(remaining, expected))
            .or_else(|| info.progress.map(|p| p.clamp(0.0, 100.0)));
        let percent = match server {
            Some(server) => blend(server, synthetic, self.config.server_weight),
            None => synthetic,
        };

        ProgressSample {
            percent,
            message: phase_message(&profile.phases, percent).to_string(),
            queue_position: info.queue_position,
            estimated_remaining: info.estimated_remaining(),
            terminal: false,
        }
    }

    /// Estimate at an explicit elapsed time, ratcheted against earlier
    /// samples for the same key.
    pub fn estimate_at(
        &self,
        key: &CacheKey,
        status: &CalculationStatus,
        elapsed: Duration,
    ) -> ProgressSample {
        let mut sample = self.estimate(key.kind, status, elapsed);
        let mut tracks = self.tracks.lock();
        let track = tracks.entry(key.clone()).or_insert_with(|| Track {
            first_seen: Instant::now(),
            last_percent: 0.0,
        });
        if sample.percent < track.last_percent {
            sample.percent = track.last_percent;
        }
        track.last_percent = sample.percent;
        sample
    }

    /// Estimate using the time since `key` was first observed.
    pub fn observe(&self, key: &CacheKey, status: &CalculationStatus) -> ProgressSample {
        let elapsed = self
            .tracks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Track {
                first_seen: Instant::now(),
                last_percent: 0.0,
            })
            .first_seen
            .elapsed();
        self.estimate_at(key, status, elapsed)
    }

    /// Highest percent reported so far for `key`.
    #[must_use]
    pub fn last_percent(&self, key: &CacheKey) -> Option<f64> {
        self.tracks.lock().get(key).map(|t| t.last_percent)
    }

    /// Forget `key`, restarting its clock and ratchet.
    pub fn forget(&self, key: &CacheKey) {
        self.tracks.lock().remove(key);
    }
}
