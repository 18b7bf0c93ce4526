//! Report write-back record.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::status::CalculationStatus;

/// Final state of a report's calculation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Complete,
    Error,
}

/// What gets written into durable report storage when a calculation ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Result payload on success, `{"error": message}` on failure.
    pub output: Value,
    pub status: ReportStatus,
}

impl ReportRecord {
    /// Marshal a terminal status. Returns `None` for in-flight statuses.
    #[must_use]
    pub fn from_terminal(status: &CalculationStatus, label: Option<String>) -> Option<Self> {
        match status {
            CalculationStatus::Ok { result } => Some(Self {
                label,
                output: result.clone(),
                status: ReportStatus::Complete,
            }),
            CalculationStatus::Error { error } => Some(Self {
                label,
                output: serde_json::json!({ "error": error }),
                status: ReportStatus::Error,
            }),
            CalculationStatus::Pending | CalculationStatus::Computing(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn ok_becomes_complete_with_output() {
        let record = ReportRecord::from_terminal(
            &CalculationStatus::Ok {
                result: json!({"poverty": {"change": -0.01}}),
            },
            Some("Reform A".into()),
        )
        .unwrap();
        assert_eq!(record.status, ReportStatus::Complete);
        assert_eq!(record.output["poverty"]["change"], -0.01);
        assert_eq!(record.label.as_deref(), Some("Reform A"));
    }

    #[test]
    fn error_keeps_message_verbatim() {
        let record =
            ReportRecord::from_terminal(&CalculationStatus::error("Parameter out of range"), None)
                .unwrap();
        assert_eq!(record.status, ReportStatus::Error);
        assert_eq!(record.output, json!({"error": "Parameter out of range"}));
        let v = serde_json::to_value(&record).unwrap();
        assert!(v.get("label").is_none());
        assert_eq!(v["status"], "error");
    }

    #[test]
    fn in_flight_statuses_are_not_records() {
        assert!(ReportRecord::from_terminal(&CalculationStatus::Pending, None).is_none());
        assert!(ReportRecord::from_terminal(&CalculationStatus::computing(), None).is_none());
    }
}
