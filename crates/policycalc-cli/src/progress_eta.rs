//! Progress bar and ETA for running simulations.

use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use policycalc_orchestration::aggregator::{AggregateProgress, OverallStatus};

use crate::output::format_duration;

/// Extrapolates remaining time from overall percent and elapsed time.
pub struct EtaCalculator {
    start_time: Instant,
}

impl EtaCalculator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
        }
    }

    /// Estimated time remaining at `percent` (0..100) after `elapsed`.
    #[must_use]
    pub fn remaining_at(percent: f64, elapsed: Duration) -> Option<Duration> {
        if percent <= 0.0 || percent >= 100.0 {
            return None;
        }
        let total = elapsed.as_secs_f64() * 100.0 / percent;
        let remaining = total - elapsed.as_secs_f64();
        (remaining > 0.0).then(|| Duration::from_secs_f64(remaining))
    }

    /// Estimated time remaining at `percent`, measured from creation.
    #[must_use]
    pub fn update(&self, percent: f64) -> Option<Duration> {
        Self::remaining_at(percent, self.elapsed())
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

impl Default for EtaCalculator {
    fn default() -> Self {
        Self::new()
    }
}

/// Bar over overall percent, with the first member's phase message.
pub struct ProgressDisplay {
    bar: ProgressBar,
    eta: EtaCalculator,
}

impl ProgressDisplay {
    /// Create a bar drawn to stderr, or a hidden one.
    #[must_use]
    pub fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr())
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self {
            bar,
            eta: EtaCalculator::new(),
        }
    }

    /// Render an aggregate.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn update(&self, progress: &AggregateProgress) {
        self.bar.set_position(progress.overall_progress.floor().clamp(0.0, 100.0) as u64);
        self.bar.set_message(status_line(progress, self.eta.update(progress.overall_progress)));
        self.bar.tick();
    }

    /// Final render, then clear the bar.
    pub fn finish(&self, progress: &AggregateProgress) {
        self.update(progress);
        self.bar.finish_and_clear();
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.eta.elapsed()
    }
}

/// Message shown next to the bar.
#[must_use]
pub fn status_line(progress: &AggregateProgress, eta: Option<Duration>) -> String {
    let message = progress
        .members
        .iter()
        .find_map(|m| m.message.as_deref())
        .unwrap_or("Starting...");
    match (progress.overall_status, eta) {
        (OverallStatus::Computing, Some(eta)) => {
            format!("{message} (~{} left)", format_duration(eta))
        }
        _ => message.to_string(),
    }
}
