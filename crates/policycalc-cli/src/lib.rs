//! # policycalc-cli
//!
//! CLI output, progress display, report files, and shell completion.

pub mod completion;
pub mod output;
pub mod presenter;
pub mod progress_eta;
pub mod ui;

pub use output::JsonFileReportStore;
pub use presenter::{CLIProgressReporter, CLIResultPresenter, OutputMode};
