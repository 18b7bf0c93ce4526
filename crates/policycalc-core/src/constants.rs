//! Default tuning values for polling and progress estimation.

use std::time::Duration;

/// Default compute API base URL.
pub const DEFAULT_API_URL: &str = "https://api.policyengine.org";

/// Expected wall time of a household calculation.
pub const HOUSEHOLD_EXPECTED_DURATION: Duration = Duration::from_millis(45_000);

/// Expected wall time of a society-wide calculation (12 minutes).
pub const ECONOMY_EXPECTED_DURATION: Duration = Duration::from_millis(720_000);

/// Weight of the server-derived percent when blending with the synthetic curve.
pub const DEFAULT_SERVER_WEIGHT: f64 = 0.7;

/// Highest percent reported while a job only has a queue position.
pub const DEFAULT_QUEUE_CAP_PERCENT: f64 = 20.0;

/// Highest percent reported while a job is still in flight.
pub const MAX_IN_FLIGHT_PERCENT: f64 = 99.0;

/// Retries of a failed poll request before it is surfaced as an error.
pub const DEFAULT_TRANSPORT_RETRIES: u32 = 1;

/// Per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Delay between a failed request and its retry.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1_000);

/// Message shown when the compute API cannot be reached.
pub const TRANSPORT_ERROR_MESSAGE: &str = "Unable to reach the calculation service";

/// Progress message once a calculation has finished successfully.
pub const COMPLETE_MESSAGE: &str = "Calculation complete";

/// Buffered cache events per subscriber before it lags.
pub const CACHE_EVENT_CAPACITY: usize = 256;

/// Household phase table: `(upper bound in percent, message)`.
pub const HOUSEHOLD_PHASES: &[(f64, &str)] = &[
    (10.0, "Initializing calculation..."),
    (45.0, "Running policy simulation..."),
    (80.0, "Computing household impacts..."),
    (100.0, "Finalizing results..."),
];

/// Society-wide phase table: `(upper bound in percent, message)`.
pub const ECONOMY_PHASES: &[(f64, &str)] = &[
    (5.0, "Initializing society-wide calculation..."),
    (20.0, "Loading population data..."),
    (80.0, "Simulating baseline/reform scenario..."),
    (90.0, "Computing distributional impacts..."),
    (100.0, "Finalizing results..."),
];

/// Exit codes of the `policycalc` binary.
pub mod exit_codes {
    /// Successful execution.
    pub const SUCCESS: i32 = 0;
    /// The calculation finished with an error.
    pub const ERROR_GENERIC: i32 = 1;
    /// Waiting for the calculation timed out.
    pub const ERROR_TIMEOUT: i32 = 2;
    /// Invalid configuration or calculation metadata.
    pub const ERROR_CONFIG: i32 = 4;
    /// Interrupted by the user (Ctrl+C).
    pub const ERROR_CANCELED: i32 = 130;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_ascending(table: &[(f64, &str)]) {
        for pair in table.windows(2) {
            assert!(pair[0].0 < pair[1].0, "{} !< {}", pair[0].0, pair[1].0);
        }
        assert!((table[table.len() - 1].0 - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn phase_tables_are_ascending_and_cover_100() {
        assert_ascending(HOUSEHOLD_PHASES);
        assert_ascending(ECONOMY_PHASES);
    }

    #[test]
    fn economy_expects_twelve_minutes() {
        assert_eq!(ECONOMY_EXPECTED_DURATION, Duration::from_secs(12 * 60));
    }
}
