//! Error types shared by the calculation engine.

/// Error type for calculation orchestration.
///
/// Transport failures never appear here: handlers fold them into
/// [`CalculationStatus::Error`](crate::status::CalculationStatus::Error)
/// so pollers have a single terminal error channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalcError {
    /// Unknown calculation kind or other integration mistake.
    #[error("configuration error: {0}")]
    Config(String),

    /// A fresh start was requested with incomplete metadata.
    #[error("invalid calculation metadata: {0}")]
    InvalidMeta(String),

    /// A `computing` calculation was found but its metadata could not be
    /// rebuilt, so polling cannot resume.
    #[error("cannot resume calculation {calc_id}: {reason}")]
    StaleResume {
        /// Calculation that was being resumed.
        calc_id: String,
        /// What was missing.
        reason: String,
    },

    /// The backend reported a domain failure.
    #[error("calculation failed: {0}")]
    Calculation(String),

    /// The caller gave up waiting.
    #[error("calculation timed out after {0}")]
    Timeout(String),

    /// The run was stopped before a terminal status arrived.
    #[error("calculation stopped")]
    Stopped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calc_error_display() {
        let err = CalcError::Config("unknown calculation kind: society".into());
        assert_eq!(
            err.to_string(),
            "configuration error: unknown calculation kind: society"
        );

        let err = CalcError::StaleResume {
            calc_id: "report-7".into(),
            reason: "missing country id".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot resume calculation report-7: missing country id"
        );

        assert_eq!(CalcError::Stopped.to_string(), "calculation stopped");
    }
}
