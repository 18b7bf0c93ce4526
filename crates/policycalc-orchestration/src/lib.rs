//! # policycalc-orchestration
//!
//! Calculation lifecycle orchestration, result write-back, and
//! multi-simulation progress aggregation.

pub mod aggregator;
pub mod interfaces;
pub mod orchestrator;
pub mod persister;

pub use aggregator::{aggregate, AggregateProgress, OverallStatus, ReportAggregator};
pub use interfaces::{
    ProgressReporter, ReportStore, ReportTarget, ResultPersister, ResultPresenter, SimulationOutcome,
};
pub use orchestrator::{CalcOrchestrator, RunPhase, StartOutcome};
pub use persister::{ApiReportStore, MemoryReportStore, PersistError, ReportResultPersister};
