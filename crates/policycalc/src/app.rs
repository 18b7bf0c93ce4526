//! Application entry point and dispatch.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::future::join_all;
use tracing::info;

use policycalc_cli::output::JsonFileReportStore;
use policycalc_cli::presenter::{CLIProgressReporter, CLIResultPresenter, OutputMode};
use policycalc_core::api::{ComputeApi, HttpComputeApi};
use policycalc_core::cache::{InMemoryCache, ResultCache};
use policycalc_core::constants::exit_codes;
use policycalc_core::error::CalcError;
use policycalc_core::meta::CalcStartConfig;
use policycalc_core::options::EngineConfig;
use policycalc_core::progress::SyntheticProgressEstimator;
use policycalc_core::registry::CalcStrategyFactory;
use policycalc_core::status::CalculationStatus;
use policycalc_orchestration::aggregator::ReportAggregator;
use policycalc_orchestration::interfaces::{
    ProgressReporter, ReportStore, ResultPresenter, SimulationOutcome,
};
use policycalc_orchestration::orchestrator::CalcOrchestrator;
use policycalc_orchestration::persister::{
    ApiReportStore, MemoryReportStore, ReportResultPersister,
};

use crate::config::AppConfig;
use crate::errors::handle_error;

/// Interval at which the progress bar is refreshed between cache changes.
const PROGRESS_TICK: Duration = Duration::from_millis(500);

/// Run the application and return the process exit code.
pub fn run(config: &AppConfig) -> Result<i32> {
    // Handle shell completion
    if let Some(shell) = config.completion {
        let mut cmd = <AppConfig as clap::CommandFactory>::command();
        policycalc_cli::completion::generate_completion(&mut cmd, shell, &mut std::io::stdout());
        return Ok(exit_codes::SUCCESS);
    }

    let engine = config.engine_config()?;
    let starts = config.start_configs()?;
    let api: Arc<dyn ComputeApi> = Arc::new(
        HttpComputeApi::new(&engine).map_err(|e| CalcError::Config(e.to_string()))?,
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run_simulations(config, engine, api, starts))
}

fn output_mode(config: &AppConfig) -> OutputMode {
    if config.json {
        OutputMode::Json
    } else if config.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Text
    }
}

fn report_store(config: &AppConfig, api: &Arc<dyn ComputeApi>) -> Arc<dyn ReportStore> {
    if let Some(dir) = &config.output {
        Arc::new(JsonFileReportStore::new(dir.clone()))
    } else if config.write_back {
        Arc::new(ApiReportStore::new(Arc::clone(api)))
    } else {
        Arc::new(MemoryReportStore::new())
    }
}

/// Start every simulation, follow their progress until all are terminal,
/// then present the results.
///
/// # Errors
///
/// `Timeout` when the deadline passes first, `Stopped` on Ctrl+C. Both
/// stop every poller before returning.
pub async fn run_simulations(
    config: &AppConfig,
    engine: EngineConfig,
    api: Arc<dyn ComputeApi>,
    starts: Vec<CalcStartConfig>,
) -> Result<i32> {
    let engine = Arc::new(engine);
    let cache: Arc<dyn ResultCache> = Arc::new(InMemoryCache::new());
    let factory = Arc::new(CalcStrategyFactory::new(
        Arc::clone(&cache),
        Arc::clone(&api),
        Arc::clone(&engine),
    ));
    let persister = Arc::new(ReportResultPersister::new(report_store(config, &api)));
    let orchestrator = CalcOrchestrator::new(factory, persister);

    let keys = starts.iter().map(|s| orchestrator.key_for(s)).collect();
    let estimator = Arc::new(SyntheticProgressEstimator::new(Arc::clone(&engine)));
    let aggregator = Arc::new(ReportAggregator::new(keys, cache, estimator));
    let mut handle = Arc::clone(&aggregator).attach();

    let mode = output_mode(config);
    let reporter = CLIProgressReporter::new(mode != OutputMode::Text);
    let presenter = CLIResultPresenter::new(mode, config.verbose);

    info!(simulations = starts.len(), api_url = %engine.api_url, "Starting simulations");

    let runs = join_all(
        starts
            .iter()
            .cloned()
            .map(|start| orchestrator.run_to_completion(start)),
    );
    tokio::pin!(runs);
    let deadline = tokio::time::sleep(config.timeout_duration());
    tokio::pin!(deadline);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    let mut ticker = tokio::time::interval(PROGRESS_TICK);

    let finished = loop {
        tokio::select! {
            results = &mut runs => break Ok(results),
            () = &mut deadline => break Err(CalcError::Timeout(config.timeout.clone())),
            _ = &mut interrupt => break Err(CalcError::Stopped),
            Some(progress) = handle.changed() => reporter.report(&progress),
            _ = ticker.tick() => reporter.report(&aggregator.snapshot()),
        }
    };

    let last = aggregator.snapshot();
    reporter.complete(&last);
    handle.detach();

    let results = match finished {
        Ok(results) => results,
        Err(err) => {
            orchestrator.stop_all();
            return Err(err.into());
        }
    };

    let mut code = exit_codes::SUCCESS;
    for (start, result) in starts.into_iter().zip(results) {
        match result {
            Ok(status) => {
                if matches!(status, CalculationStatus::Error { .. }) && code == exit_codes::SUCCESS
                {
                    code = exit_codes::ERROR_GENERIC;
                }
                presenter.present_result(&SimulationOutcome {
                    calc_id: start.calc_id,
                    label: start.label,
                    status,
                });
            }
            Err(err) => {
                presenter.present_error(&format!("{}: {err}", start.calc_id));
                if code == exit_codes::SUCCESS {
                    code = handle_error(&err);
                }
            }
        }
    }
    presenter.present_summary(&last, reporter.elapsed());
    Ok(code)
}
