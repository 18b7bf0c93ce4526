//! Canonical calculation status shape.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Server hints attached to a `computing` status.
///
/// Durations are carried in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputingInfo {
    /// Server-reported progress percentage, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server estimate of the remaining time, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time_remaining: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<u32>,
    /// Typical total duration of this job, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_time: Option<u64>,
}

impl ComputingInfo {
    #[must_use]
    pub fn estimated_remaining(&self) -> Option<Duration> {
        self.estimated_time_remaining.map(Duration::from_millis)
    }

    /// True when the job is waiting in the server queue and no time
    /// estimate is available yet.
    #[must_use]
    pub fn is_queued_without_estimate(&self) -> bool {
        self.queue_position.is_some() && self.estimated_time_remaining.is_none()
    }
}

/// Status of one calculation, tagged on `status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CalculationStatus {
    /// Accepted but not yet picked up.
    Pending,
    /// Running (or queued) on the server.
    Computing(ComputingInfo),
    /// Finished with a result payload.
    Ok { result: Value },
    /// Finished with a failure; the message is shown verbatim.
    Error { error: String },
}

impl CalculationStatus {
    /// A `computing` status with no hints.
    #[must_use]
    pub fn computing() -> Self {
        CalculationStatus::Computing(ComputingInfo::default())
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        CalculationStatus::Error {
            error: message.into(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CalculationStatus::Ok { .. } | CalculationStatus::Error { .. }
        )
    }

    #[must_use]
    pub fn is_computing(&self) -> bool {
        matches!(self, CalculationStatus::Computing(_))
    }

    /// Wire name of the variant.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            CalculationStatus::Pending => "pending",
            CalculationStatus::Computing(_) => "computing",
            CalculationStatus::Ok { .. } => "ok",
            CalculationStatus::Error { .. } => "error",
        }
    }

    /// Whether replacing `self` with `next` would move a finished
    /// calculation back to an in-flight state.
    #[must_use]
    pub fn would_regress_to(&self, next: &CalculationStatus) -> bool {
        self.is_terminal() && !next.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn computing_deserializes_camel_case_hints() {
        let status: CalculationStatus = serde_json::from_value(json!({
            "status": "computing",
            "progress": 12.5,
            "queuePosition": 3,
            "estimatedTimeRemaining": 360000,
            "averageTime": 720000
        }))
        .unwrap();
        let CalculationStatus::Computing(info) = status else {
            panic!("expected computing");
        };
        assert_eq!(info.queue_position, Some(3));
        assert_eq!(info.estimated_remaining(), Some(Duration::from_secs(360)));
        assert_eq!(info.average_time, Some(720_000));
    }

    #[test]
    fn ok_and_error_round_through_tag() {
        let ok = CalculationStatus::Ok {
            result: json!({"budget": {"budgetary_impact": -1.2e9}}),
        };
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["status"], "ok");
        assert_eq!(v["result"]["budget"]["budgetary_impact"], -1.2e9);

        let err = CalculationStatus::error("Invalid parameter value");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v, json!({"status": "error", "error": "Invalid parameter value"}));
    }

    #[test]
    fn pending_serializes_as_bare_tag() {
        let v = serde_json::to_value(CalculationStatus::Pending).unwrap();
        assert_eq!(v, json!({"status": "pending"}));
    }

    #[test]
    fn terminal_classification() {
        assert!(!CalculationStatus::Pending.is_terminal());
        assert!(!CalculationStatus::computing().is_terminal());
        assert!(CalculationStatus::error("x").is_terminal());
        assert!(CalculationStatus::Ok { result: Value::Null }.is_terminal());
    }

    #[test]
    fn regression_only_from_terminal_to_in_flight() {
        let ok = CalculationStatus::Ok { result: Value::Null };
        assert!(ok.would_regress_to(&CalculationStatus::computing()));
        assert!(ok.would_regress_to(&CalculationStatus::Pending));
        assert!(!ok.would_regress_to(&CalculationStatus::error("late")));
        assert!(!CalculationStatus::Pending.would_regress_to(&CalculationStatus::computing()));
    }

    #[test]
    fn queued_without_estimate() {
        let info = ComputingInfo {
            queue_position: Some(3),
            ..ComputingInfo::default()
        };
        assert!(info.is_queued_without_estimate());
        let info = ComputingInfo {
            queue_position: Some(3),
            estimated_time_remaining: Some(1000),
            ..ComputingInfo::default()
        };
        assert!(!info.is_queued_without_estimate());
    }
}
