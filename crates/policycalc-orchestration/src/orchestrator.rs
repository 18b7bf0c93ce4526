//! Calculation lifecycle: start or resume, poll, persist.
//!
//! The orchestrator owns one poller per calculation. Its per-key state
//! machine is the "already started" guard:
//!
//! ```text
//! NotStarted -> Submitting | Resuming -> Polling -> Terminal
//! ```
//!
//! Pollers are spawned tasks; callers read progress from the result
//! cache or await [`CalcOrchestrator::run_to_completion`]. A run's entry
//! is dropped once its result is persisted, after which the cached
//! terminal status alone reports the calculation as `Terminal`.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use policycalc_core::cache::CacheKey;
use policycalc_core::cancel::CancellationToken;
use policycalc_core::error::CalcError;
use policycalc_core::handler::CalculationHandler;
use policycalc_core::meta::CalcStartConfig;
use policycalc_core::registry::CalcStrategyFactory;
use policycalc_core::status::CalculationStatus;

use crate::interfaces::ResultPersister;

/// Lifecycle phase of one calculation in this orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    NotStarted,
    Submitting,
    Resuming,
    Polling,
    Terminal,
}

impl RunPhase {
    /// Whether a poller owns the calculation.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunPhase::Submitting | RunPhase::Resuming | RunPhase::Polling
        )
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::NotStarted => "not-started",
            RunPhase::Submitting => "submitting",
            RunPhase::Resuming => "resuming",
            RunPhase::Polling => "polling",
            RunPhase::Terminal => "terminal",
        };
        f.write_str(name)
    }
}

/// What `start_calculation` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Submitted afresh; a poller is running.
    Started,
    /// Found computing in the cache; polling resumed without a new
    /// submission.
    Resumed,
    /// A poller already owns this calculation.
    AlreadyRunning,
    /// The cache already holds a result.
    AlreadyComplete,
    /// The cache already holds a failure. Failures are not retried.
    AlreadyFailed,
}

struct RunState {
    phase: RunPhase,
    generation: u64,
    cancel: CancellationToken,
}

struct Shared {
    runs: Mutex<HashMap<CacheKey, RunState>>,
    changes: watch::Sender<u64>,
    next_generation: AtomicU64,
}

impl Shared {
    fn notify(&self) {
        self.changes.send_modify(|n| *n = n.wrapping_add(1));
    }

    /// Move `key` to `phase` if the run identified by `generation` still
    /// owns it.
    fn set_phase(&self, key: &CacheKey, generation: u64, phase: RunPhase) -> bool {
        let updated = match self.runs.lock().get_mut(key) {
            Some(run) if run.generation == generation => {
                run.phase = phase;
                true
            }
            _ => false,
        };
        if updated {
            debug!(key = %key, phase = %phase, "Phase change");
            self.notify();
        }
        updated
    }

    /// Whether the run identified by `generation` still owns `key`.
    fn owns(&self, key: &CacheKey, generation: u64) -> bool {
        self.runs
            .lock()
            .get(key)
            .is_some_and(|run| run.generation == generation && run.phase.is_active())
    }

    /// Drop the finished run's entry if it still owns `key`.
    fn retire(&self, key: &CacheKey, generation: u64) {
        let removed = {
            let mut runs = self.runs.lock();
            match runs.get(key) {
                Some(run) if run.generation == generation => runs.remove(key).is_some(),
                _ => false,
            }
        };
        if removed {
            debug!(key = %key, phase = %RunPhase::Terminal, "Phase change");
            self.notify();
        }
    }
}

/// Drives calculations from submission to persisted result.
pub struct CalcOrchestrator {
    factory: Arc<CalcStrategyFactory>,
    persister: Arc<dyn ResultPersister>,
    shared: Arc<Shared>,
}

impl CalcOrchestrator {
    #[must_use]
    pub fn new(factory: Arc<CalcStrategyFactory>, persister: Arc<dyn ResultPersister>) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            factory,
            persister,
            shared: Arc::new(Shared {
                runs: Mutex::new(HashMap::new()),
                changes,
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    #[must_use]
    pub fn factory(&self) -> &Arc<CalcStrategyFactory> {
        &self.factory
    }

    /// Cache key a start request resolves to.
    #[must_use]
    pub fn key_for(&self, config: &CalcStartConfig) -> CacheKey {
        CacheKey::new(config.meta.kind(), config.calc_id.clone())
    }

    /// Current phase of a calculation.
    ///
    /// Without an active run, a terminal cache entry reads as `Terminal`.
    #[must_use]
    pub fn phase(&self, key: &CacheKey) -> RunPhase {
        if let Some(run) = self.shared.runs.lock().get(key) {
            return run.phase;
        }
        let handler = self.factory.get_strategy(key.kind);
        match handler.get_status(&key.calc_id) {
            Some(status) if status.is_terminal() => RunPhase::Terminal,
            _ => RunPhase::NotStarted,
        }
    }

    /// Start, resume, or acknowledge a calculation.
    ///
    /// Never blocks on the network: submission and polling run on a
    /// spawned task. Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// `InvalidMeta` for a fresh start with incomplete metadata and
    /// `StaleResume` when a computing calculation cannot be resumed. The
    /// cache is left untouched in both cases.
    pub fn start_calculation(&self, config: CalcStartConfig) -> Result<StartOutcome, CalcError> {
        let handler = self.factory.get_strategy(config.meta.kind());
        let key = handler.cache_key(&config.calc_id);

        let mut runs = self.shared.runs.lock();
        if runs.get(&key).is_some_and(|run| run.phase.is_active()) {
            debug!(key = %key, "Start ignored, already running");
            return Ok(StartOutcome::AlreadyRunning);
        }

        let cached = handler.get_status(&config.calc_id);
        let (outcome, phase, resume_from) = match cached {
            Some(CalculationStatus::Ok { .. }) => return Ok(StartOutcome::AlreadyComplete),
            Some(CalculationStatus::Error { .. }) => return Ok(StartOutcome::AlreadyFailed),
            Some(status @ CalculationStatus::Computing(_)) => {
                config
                    .meta
                    .validate()
                    .map_err(|reason| CalcError::StaleResume {
                        calc_id: config.calc_id.to_string(),
                        reason,
                    })?;
                (StartOutcome::Resumed, RunPhase::Resuming, Some(status))
            }
            Some(CalculationStatus::Pending) | None => {
                config.meta.validate().map_err(CalcError::InvalidMeta)?;
                (StartOutcome::Started, RunPhase::Submitting, None)
            }
        };

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        runs.insert(
            key.clone(),
            RunState {
                phase,
                generation,
                cancel: cancel.clone(),
            },
        );
        drop(runs);
        self.shared.notify();

        info!(
            key = %key,
            report_id = %config.report_id,
            outcome = ?outcome,
            "Calculation run starting"
        );

        let run = Run {
            handler,
            persister: Arc::clone(&self.persister),
            shared: Arc::clone(&self.shared),
            config,
            key,
            generation,
            cancel,
        };
        tokio::spawn(run.execute(resume_from));
        Ok(outcome)
    }

    /// Stop polling a calculation. Returns `false` if no run was active.
    ///
    /// The server-side job is left alone; a later start resumes it.
    pub fn stop(&self, key: &CacheKey) -> bool {
        let removed = {
            let mut runs = self.shared.runs.lock();
            match runs.get(key) {
                Some(run) if run.phase.is_active() => runs.remove(key),
                _ => None,
            }
        };
        match removed {
            Some(run) => {
                run.cancel.cancel();
                info!(key = %key, "Calculation run stopped");
                self.shared.notify();
                true
            }
            None => false,
        }
    }

    /// Stop every active run.
    pub fn stop_all(&self) {
        let keys: Vec<CacheKey> = self
            .shared
            .runs
            .lock()
            .iter()
            .filter(|(_, run)| run.phase.is_active())
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.stop(&key);
        }
    }

    /// Start (or join) a calculation and wait until its terminal status
    /// has been persisted.
    ///
    /// A terminal `error` status is returned as `Ok`; only orchestration
    /// failures are `Err`.
    ///
    /// # Errors
    ///
    /// Whatever `start_calculation` returns, or `Stopped` if the run is
    /// stopped before it finishes.
    pub async fn run_to_completion(
        &self,
        config: CalcStartConfig,
    ) -> Result<CalculationStatus, CalcError> {
        let handler = self.factory.get_strategy(config.meta.kind());
        let calc_id = config.calc_id.clone();
        let key = handler.cache_key(&calc_id);
        let mut changes = self.shared.changes.subscribe();

        let outcome = self.start_calculation(config)?;
        if matches!(
            outcome,
            StartOutcome::AlreadyComplete | StartOutcome::AlreadyFailed
        ) {
            return handler
                .get_status(&calc_id)
                .ok_or(CalcError::Stopped);
        }

        loop {
            match self.phase(&key) {
                RunPhase::Terminal | RunPhase::NotStarted => {
                    return match handler.get_status(&calc_id) {
                        Some(status) if status.is_terminal() => Ok(status),
                        _ => Err(CalcError::Stopped),
                    };
                }
                _ => {}
            }
            if changes.changed().await.is_err() {
                return Err(CalcError::Stopped);
            }
        }
    }
}

/// One spawned poller.
struct Run {
    handler: Arc<dyn CalculationHandler>,
    persister: Arc<dyn ResultPersister>,
    shared: Arc<Shared>,
    config: CalcStartConfig,
    key: CacheKey,
    generation: u64,
    cancel: CancellationToken,
}

impl Run {
    async fn execute(self, resume_from: Option<CalculationStatus>) {
        let calc_id = &self.config.calc_id;
        let meta = &self.config.meta;

        let mut status = match resume_from {
            Some(status) => status,
            None => {
                let Some(submitted) = self
                    .until_cancelled(self.handler.start_calculation(calc_id, meta))
                    .await
                else {
                    return;
                };
                match submitted {
                    Some(status) => status,
                    None => self
                        .handler
                        .get_status(calc_id)
                        .unwrap_or(CalculationStatus::Pending),
                }
            }
        };
        if !status.is_terminal() {
            self.shared
                .set_phase(&self.key, self.generation, RunPhase::Polling);
        }

        let mut computing_polls = 0u32;
        while let Some(delay) = self.handler.refetch_interval(&status, computing_polls) {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!(key = %self.key, "Poller cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }
            let Some(polled) = self.until_cancelled(self.handler.poll(calc_id, meta)).await else {
                return;
            };
            status = polled;
            if status.is_computing() {
                computing_polls = computing_polls.saturating_add(1);
            }
        }

        self.finish(&status).await;
    }

    /// Await `fut` unless the run is stopped first. An abandoned request
    /// never reaches the cache.
    async fn until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!(key = %self.key, "Poller cancelled");
                None
            }
            output = fut => Some(output),
        }
    }

    async fn finish(&self, status: &CalculationStatus) {
        if !self.shared.owns(&self.key, self.generation) {
            warn!(key = %self.key, "Run no longer owns the calculation, not persisting");
            return;
        }
        if let Err(err) = self.persister.persist(&self.config, status).await {
            error!(key = %self.key, error = %err, "Failed to persist result");
        }

        match status {
            CalculationStatus::Error { error } => {
                info!(key = %self.key, error = %error, "Calculation failed");
            }
            _ => info!(key = %self.key, status = status.label(), "Calculation finished"),
        }
        self.shared.retire(&self.key, self.generation);
    }
}
