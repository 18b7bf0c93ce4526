//! # policycalc-core
//!
//! Core library of the policycalc calculation engine: the calculation
//! status model, the shared result cache, the compute API client, the
//! per-kind handler strategies and their factory, and the synthetic
//! progress estimator.

pub mod api;
pub mod cache;
pub mod cancel;
pub mod constants;
pub mod economy;
pub mod error;
pub mod handler;
pub mod household;
pub mod meta;
pub mod options;
pub mod progress;
pub mod registry;
pub mod report;
pub mod status;

#[cfg(any(test, feature = "test-util"))]
pub mod scripted;

// Re-exports
pub use api::{ApiError, ApiResponse, ComputeApi, HttpComputeApi};
pub use cache::{CacheEvent, CacheKey, InMemoryCache, ResultCache};
pub use cancel::CancellationToken;
pub use constants::exit_codes;
pub use error::CalcError;
pub use handler::{CalculationHandler, HandlerCore};
pub use meta::{CalcId, CalcKind, CalcStartConfig, CalculationMeta, PolicyIds};
pub use options::EngineConfig;
pub use progress::{ProgressSample, SyntheticProgressEstimator};
pub use registry::CalcStrategyFactory;
pub use report::{ReportRecord, ReportStatus};
pub use status::{CalculationStatus, ComputingInfo};
