//! Orchestration interfaces.

use std::time::Duration;

use async_trait::async_trait;

use policycalc_core::meta::{CalcId, CalcStartConfig};
use policycalc_core::report::ReportRecord;
use policycalc_core::status::CalculationStatus;

use crate::aggregator::AggregateProgress;
use crate::persister::PersistError;

/// Trait for reporting aggregate progress to the user.
pub trait ProgressReporter: Send + Sync {
    /// Report a progress update.
    fn report(&self, progress: &AggregateProgress);

    /// Report completion.
    fn complete(&self, progress: &AggregateProgress);
}

/// Trait for presenting results to the user.
pub trait ResultPresenter: Send + Sync {
    /// Present one finished simulation.
    fn present_result(&self, outcome: &SimulationOutcome);

    /// Present the overall outcome of a group of simulations.
    fn present_summary(&self, progress: &AggregateProgress, elapsed: Duration);

    /// Present an error.
    fn present_error(&self, error: &str);
}

/// Final status of one simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationOutcome {
    pub calc_id: CalcId,
    pub label: Option<String>,
    pub status: CalculationStatus,
}

impl SimulationOutcome {
    /// Label if set, else the calc id.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(self.calc_id.as_str())
    }
}

/// Where a finished calculation is written.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReportTarget {
    pub country_id: String,
    pub report_id: String,
}

impl ReportTarget {
    #[must_use]
    pub fn new(country_id: impl Into<String>, report_id: impl Into<String>) -> Self {
        Self {
            country_id: country_id.into(),
            report_id: report_id.into(),
        }
    }

    /// Target of a start request.
    #[must_use]
    pub fn of(config: &CalcStartConfig) -> Self {
        Self::new(config.meta.country_id(), config.report_id.clone())
    }
}

/// Durable storage for report results.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn write(&self, target: &ReportTarget, record: &ReportRecord)
        -> Result<(), PersistError>;
}

/// Writes a terminal status into durable storage.
#[async_trait]
pub trait ResultPersister: Send + Sync {
    async fn persist(
        &self,
        config: &CalcStartConfig,
        status: &CalculationStatus,
    ) -> Result<(), PersistError>;
}
