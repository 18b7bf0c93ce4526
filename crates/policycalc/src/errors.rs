//! Error handling and exit codes.

use policycalc_core::constants::exit_codes;
use policycalc_core::error::CalcError;

/// Map an orchestration error to the process exit code.
pub fn handle_error(err: &CalcError) -> i32 {
    match err {
        CalcError::Config(_) | CalcError::InvalidMeta(_) | CalcError::StaleResume { .. } => {
            exit_codes::ERROR_CONFIG
        }
        CalcError::Calculation(_) => exit_codes::ERROR_GENERIC,
        CalcError::Timeout(_) => exit_codes::ERROR_TIMEOUT,
        CalcError::Stopped => exit_codes::ERROR_CANCELED,
    }
}

/// Exit code for an error that reached `main`.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<CalcError>()
        .map_or(exit_codes::ERROR_GENERIC, handle_error)
}
