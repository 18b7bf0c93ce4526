//! CLI progress reporter and result presenter.

use std::time::Duration;

use serde_json::json;

use policycalc_core::status::CalculationStatus;
use policycalc_orchestration::aggregator::{AggregateProgress, OverallStatus};
use policycalc_orchestration::interfaces::{ProgressReporter, ResultPresenter, SimulationOutcome};

use crate::output::{format_duration, format_percent, format_result};
use crate::progress_eta::ProgressDisplay;
use crate::ui;

/// Progress reporter backed by an `indicatif` bar on stderr.
pub struct CLIProgressReporter {
    display: ProgressDisplay,
}

impl CLIProgressReporter {
    /// A hidden reporter draws nothing (quiet or JSON output).
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        Self {
            display: ProgressDisplay::new(hidden),
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.display.elapsed()
    }
}

impl ProgressReporter for CLIProgressReporter {
    fn report(&self, progress: &AggregateProgress) {
        self.display.update(progress);
    }

    fn complete(&self, progress: &AggregateProgress) {
        self.display.finish(progress);
    }
}

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Human-readable sections.
    Text,
    /// Result payloads only.
    Quiet,
    /// One JSON document per simulation.
    Json,
}

/// CLI result presenter.
pub struct CLIResultPresenter {
    mode: OutputMode,
    verbose: bool,
}

impl CLIResultPresenter {
    #[must_use]
    pub fn new(mode: OutputMode, verbose: bool) -> Self {
        Self { mode, verbose }
    }
}

/// JSON document for one simulation.
#[must_use]
pub fn outcome_json(outcome: &SimulationOutcome) -> serde_json::Value {
    let mut doc = serde_json::to_value(&outcome.status).unwrap_or_else(|_| json!({}));
    doc["calcId"] = json!(outcome.calc_id);
    if let Some(label) = &outcome.label {
        doc["label"] = json!(label);
    }
    doc
}

impl ResultPresenter for CLIResultPresenter {
    fn present_result(&self, outcome: &SimulationOutcome) {
        match self.mode {
            OutputMode::Json => println!("{}", outcome_json(outcome)),
            OutputMode::Quiet => {
                if let CalculationStatus::Ok { result } = &outcome.status {
                    println!("{result}");
                }
            }
            OutputMode::Text => {
                ui::print_header(outcome.display_name());
                match &outcome.status {
                    CalculationStatus::Ok { result } => {
                        println!("{}", format_result(result, self.verbose));
                    }
                    CalculationStatus::Error { error } => ui::print_error(error),
                    other => println!("Status: {}", other.label()),
                }
            }
        }
    }

    fn present_summary(&self, progress: &AggregateProgress, elapsed: Duration) {
        if self.mode != OutputMode::Text {
            return;
        }
        let count = progress.members.len();
        let line = format!(
            "{count} simulation(s), {} in {}",
            format_percent(progress.overall_progress),
            format_duration(elapsed)
        );
        match progress.overall_status {
            OverallStatus::Complete => ui::print_success(&line),
            OverallStatus::Error => ui::print_error(&format!(
                "{line}: {}",
                progress.first_error().unwrap_or("calculation failed")
            )),
            OverallStatus::Computing => ui::print_warning(&line),
        }
    }

    fn present_error(&self, error: &str) {
        ui::print_error(error);
    }
}
