//! Per-kind calculation handler contract and its shared plumbing.
//!
//! A handler knows how to submit and poll one kind of calculation. The
//! household and economy strategies implement [`CalculationHandler`] and
//! compose a [`HandlerCore`] for the parts they share: the result cache,
//! the compute API client, retries of failed requests, and the in-flight
//! guard that makes `start_calculation` idempotent.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, ApiResponse, ComputeApi};
use crate::cache::{CacheKey, ResultCache};
use crate::constants::TRANSPORT_ERROR_MESSAGE;
use crate::meta::{CalcId, CalcKind, CalculationMeta};
use crate::options::{EngineConfig, KindConfig};
use crate::status::CalculationStatus;

/// State and helpers shared by every handler strategy.
pub struct HandlerCore {
    kind: CalcKind,
    cache: Arc<dyn ResultCache>,
    api: Arc<dyn ComputeApi>,
    config: Arc<EngineConfig>,
    in_flight: Mutex<HashSet<CalcId>>,
}

impl HandlerCore {
    #[must_use]
    pub fn new(
        kind: CalcKind,
        cache: Arc<dyn ResultCache>,
        api: Arc<dyn ComputeApi>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            kind,
            cache,
            api,
            config,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn kind(&self) -> CalcKind {
        self.kind
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    #[must_use]
    pub fn api(&self) -> &dyn ComputeApi {
        self.api.as_ref()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Settings for this handler's kind.
    #[must_use]
    pub fn kind_config(&self) -> &KindConfig {
        self.config.kind(self.kind)
    }

    /// Claim the submission slot for `calc_id`. Returns `None` while
    /// another submission for the same id is in flight.
    pub fn begin(&self, calc_id: &CalcId) -> Option<InFlightGuard<'_>> {
        if self.in_flight.lock().insert(calc_id.clone()) {
            Some(InFlightGuard {
                set: &self.in_flight,
                calc_id: calc_id.clone(),
            })
        } else {
            None
        }
    }

    /// Whether a submission for `calc_id` is in flight.
    #[must_use]
    pub fn is_in_flight(&self, calc_id: &CalcId) -> bool {
        self.in_flight.lock().contains(calc_id)
    }

    /// Run one request, retrying transport failures up to
    /// `transport_retries` times.
    pub async fn request<F, Fut>(&self, what: &str, op: F) -> Result<ApiResponse, ApiError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<ApiResponse, ApiError>> + Send,
    {
        let retries = self.config.transport_retries;
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(response) => return Ok(response),
                Err(err) if attempt < retries => {
                    attempt += 1;
                    warn!(
                        kind = %self.kind,
                        request = what,
                        attempt,
                        error = %err,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(self.config.retry_delay()).await;
                }
                Err(err) => {
                    error!(
                        kind = %self.kind,
                        request = what,
                        error = %err,
                        "Request failed after retries"
                    );
                    return Err(err);
                }
            }
        }
    }

    /// Like [`request`](Self::request), folding the outcome into a status.
    pub async fn request_status<F, Fut>(&self, what: &str, op: F) -> CalculationStatus
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<ApiResponse, ApiError>> + Send,
    {
        match self.request(what, op).await {
            Ok(response) => response.into_status(),
            Err(_) => transport_failure(),
        }
    }
}

/// Status reported when the compute API stays unreachable.
#[must_use]
pub fn transport_failure() -> CalculationStatus {
    CalculationStatus::error(TRANSPORT_ERROR_MESSAGE)
}

/// Releases an in-flight claim on drop.
pub struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<CalcId>>,
    calc_id: CalcId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.calc_id);
    }
}

/// Submit and poll contract for one calculation kind.
#[async_trait]
pub trait CalculationHandler: Send + Sync {
    /// Shared plumbing.
    fn core(&self) -> &HandlerCore;

    /// One logical round trip to the compute API. Never fails: transport
    /// errors come back as an `error` status.
    async fn fetch(&self, meta: &CalculationMeta) -> CalculationStatus;

    fn kind(&self) -> CalcKind {
        self.core().kind()
    }

    fn cache_key(&self, calc_id: &CalcId) -> CacheKey {
        CacheKey::new(self.kind(), calc_id.clone())
    }

    /// Latest cached status, without any I/O.
    fn get_status(&self, calc_id: &CalcId) -> Option<CalculationStatus> {
        self.core().cache().get(&self.cache_key(calc_id))
    }

    /// Issue the initial submission and record its status.
    ///
    /// Returns `None` without touching the API when a submission for the
    /// same id is already in flight or the cache shows the calculation
    /// computing or finished.
    async fn start_calculation(
        &self,
        calc_id: &CalcId,
        meta: &CalculationMeta,
    ) -> Option<CalculationStatus> {
        let key = self.cache_key(calc_id);
        if let Some(current) = self.core().cache().get(&key) {
            if current.is_computing() || current.is_terminal() {
                debug!(key = %key, status = current.label(), "Start skipped");
                return None;
            }
        }
        let Some(_guard) = self.core().begin(calc_id) else {
            debug!(key = %key, "Start skipped, submission in flight");
            return None;
        };

        info!(key = %key, "Submitting calculation");
        let status = self.fetch(meta).await;
        self.core().cache().set(&key, status.clone());
        Some(status)
    }

    /// Fetch the latest status and record it. Returns what the cache holds
    /// afterwards, which differs from the fetched status only if the write
    /// was refused as a regression.
    async fn poll(&self, calc_id: &CalcId, meta: &CalculationMeta) -> CalculationStatus {
        let key = self.cache_key(calc_id);
        let status = self.fetch(meta).await;
        debug!(key = %key, status = status.label(), "Poll");
        if self.core().cache().set(&key, status.clone()) {
            status
        } else {
            self.core().cache().get(&key).unwrap_or(status)
        }
    }

    /// Delay before the next poll; `None` once terminal.
    fn refetch_interval(
        &self,
        status: &CalculationStatus,
        computing_polls: u32,
    ) -> Option<Duration> {
        self.core()
            .kind_config()
            .polling
            .delay_for(status, computing_polls)
    }

    fn expected_duration(&self) -> Duration {
        self.core().kind_config().progress.expected_duration()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;
    use crate::meta::PolicyIds;
    use crate::scripted::{ScriptStep, ScriptedComputeApi};
    use serde_json::json;

    struct EchoHandler {
        core: HandlerCore,
    }

    #[async_trait]
    impl CalculationHandler for EchoHandler {
        fn core(&self) -> &HandlerCore {
            &self.core
        }

        async fn fetch(&self, meta: &CalculationMeta) -> CalculationStatus {
            let api = self.core.api();
            self.core
                .request_status("economy", || api.economy_impact(meta))
                .await
        }
    }

    fn handler(api: Arc<ScriptedComputeApi>) -> EchoHandler {
        EchoHandler {
            core: HandlerCore::new(
                CalcKind::Economy,
                Arc::new(InMemoryCache::new()),
                api,
                Arc::new(EngineConfig::default()),
            ),
        }
    }

    fn meta() -> CalculationMeta {
        CalculationMeta::economy("us", PolicyIds::new("2", Some("7".into())), "cps", None)
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_is_retried_once() {
        let api = Arc::new(ScriptedComputeApi::new());
        api.push_economy(ScriptStep::fail("connection reset"));
        api.push_economy(ScriptStep::respond(ApiResponse::ok(json!({"x": 1}))));
        let h = handler(Arc::clone(&api));

        let status = h.fetch(&meta()).await;
        assert_eq!(status, CalculationStatus::Ok { result: json!({"x": 1}) });
        assert_eq!(api.economy_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_transport_failure_becomes_error_status() {
        let api = Arc::new(ScriptedComputeApi::new());
        api.push_economy(ScriptStep::fail("connection refused"));
        let h = handler(Arc::clone(&api));

        let status = h.fetch(&meta()).await;
        assert_eq!(status, CalculationStatus::error(TRANSPORT_ERROR_MESSAGE));
        assert_eq!(api.economy_calls(), 2);
    }

    #[tokio::test]
    async fn start_records_status_and_skips_when_computing() {
        let api = Arc::new(ScriptedComputeApi::new());
        api.push_economy(ScriptStep::respond(ApiResponse::computing()));
        let h = handler(Arc::clone(&api));
        let id = CalcId::new("r1");

        let first = h.start_calculation(&id, &meta()).await;
        assert_eq!(first, Some(CalculationStatus::computing()));
        assert_eq!(h.get_status(&id), Some(CalculationStatus::computing()));

        assert!(h.start_calculation(&id, &meta()).await.is_none());
        assert_eq!(api.economy_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_starts_submit_once() {
        let api = Arc::new(ScriptedComputeApi::new().with_latency(Duration::from_millis(500)));
        api.push_economy(ScriptStep::respond(ApiResponse::computing()));
        let h = handler(Arc::clone(&api));
        let id = CalcId::new("r1");
        let m = meta();

        let (a, b) = tokio::join!(h.start_calculation(&id, &m), h.start_calculation(&id, &m));
        assert_eq!(u8::from(a.is_some()) + u8::from(b.is_some()), 1);
        assert_eq!(api.economy_calls(), 1);
        assert!(!h.core().is_in_flight(&id));
    }

    #[tokio::test]
    async fn poll_returns_cached_terminal_on_regression() {
        let api = Arc::new(ScriptedComputeApi::new());
        api.push_economy(ScriptStep::respond(ApiResponse::computing()));
        let h = handler(Arc::clone(&api));
        let id = CalcId::new("r1");
        let key = h.cache_key(&id);
        h.core().cache().set(&key, CalculationStatus::Ok { result: json!(1) });

        let status = h.poll(&id, &meta()).await;
        assert_eq!(status, CalculationStatus::Ok { result: json!(1) });
    }

    #[test]
    fn refetch_interval_stops_on_terminal() {
        let h = handler(Arc::new(ScriptedComputeApi::new()));
        assert!(h
            .refetch_interval(&CalculationStatus::error("x"), 0)
            .is_none());
        assert_eq!(
            h.refetch_interval(&CalculationStatus::computing(), 0),
            Some(Duration::from_secs(2))
        );
        assert_eq!(h.expected_duration(), Duration::from_secs(720));
    }
}
