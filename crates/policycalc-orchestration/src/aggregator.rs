//! Multi-simulation progress aggregation.
//!
//! A report may run several simulations at once. The aggregator reads
//! their statuses from the shared cache and folds them into one overall
//! progress and status. It keeps no state of its own beyond the
//! estimator's ratchet, so it can be attached, dropped and re-attached at
//! any time.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use policycalc_core::cache::{CacheKey, ResultCache};
use policycalc_core::progress::SyntheticProgressEstimator;
use policycalc_core::status::CalculationStatus;

/// Overall state of a group of simulations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Computing,
    Complete,
    Error,
}

/// Progress of one simulation in the group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberProgress {
    pub key: String,
    /// `None` while nothing is known about the simulation.
    pub percent: Option<f64>,
    pub message: Option<String>,
    #[serde(skip)]
    pub status: Option<CalculationStatus>,
}

impl MemberProgress {
    fn is_ok(&self) -> bool {
        matches!(self.status, Some(CalculationStatus::Ok { .. }))
    }

    fn is_error(&self) -> bool {
        matches!(self.status, Some(CalculationStatus::Error { .. }))
    }
}

/// Folded progress of a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateProgress {
    pub overall_progress: f64,
    pub overall_status: OverallStatus,
    pub members: Vec<MemberProgress>,
}

impl AggregateProgress {
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.overall_status != OverallStatus::Computing
    }

    /// Message of the first errored member, if any.
    #[must_use]
    pub fn first_error(&self) -> Option<&str> {
        self.members.iter().find_map(|m| match &m.status {
            Some(CalculationStatus::Error { error }) => Some(error.as_str()),
            _ => None,
        })
    }
}

/// Fold member progress into an overall value.
///
/// The overall progress is the mean of member percents, counting unknown
/// members as 0. The overall status is `error` if any member failed,
/// `complete` only when every member succeeded, and `computing`
/// otherwise (including an empty group).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn aggregate(members: Vec<MemberProgress>) -> AggregateProgress {
    let overall_progress = if members.is_empty() {
        0.0
    } else {
        members.iter().map(|m| m.percent.unwrap_or(0.0)).sum::<f64>() / members.len() as f64
    };

    let overall_status = if members.iter().any(MemberProgress::is_error) {
        OverallStatus::Error
    } else if !members.is_empty() && members.iter().all(MemberProgress::is_ok) {
        OverallStatus::Complete
    } else {
        OverallStatus::Computing
    };

    AggregateProgress {
        overall_progress,
        overall_status,
        members,
    }
}

/// Live view over a fixed set of simulations.
pub struct ReportAggregator {
    keys: Vec<CacheKey>,
    cache: Arc<dyn ResultCache>,
    estimator: Arc<SyntheticProgressEstimator>,
}

impl ReportAggregator {
    #[must_use]
    pub fn new(
        keys: Vec<CacheKey>,
        cache: Arc<dyn ResultCache>,
        estimator: Arc<SyntheticProgressEstimator>,
    ) -> Self {
        Self {
            keys,
            cache,
            estimator,
        }
    }

    #[must_use]
    pub fn keys(&self) -> &[CacheKey] {
        &self.keys
    }

    /// Current aggregate, read straight from the cache.
    #[must_use]
    pub fn snapshot(&self) -> AggregateProgress {
        let members = self
            .keys
            .iter()
            .map(|key| {
                let status = self.cache.get(key);
                let sample = status.as_ref().map(|s| self.estimator.observe(key, s));
                MemberProgress {
                    key: key.to_string(),
                    percent: sample.as_ref().map(|s| s.percent),
                    message: sample.map(|s| s.message),
                    status,
                }
            })
            .collect();
        aggregate(members)
    }

    /// Subscribe to the cache and publish a fresh aggregate after every
    /// change to one of this group's keys.
    #[must_use]
    pub fn attach(self: Arc<Self>) -> AggregatorHandle {
        // Subscribe first so no change between snapshot and loop is lost.
        let mut events = self.cache.subscribe();
        let (tx, rx) = watch::channel(self.snapshot());
        let task = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) if self.keys.contains(&event.key) => {
                        debug!(key = %event.key, "Aggregator recompute");
                        tx.send_replace(self.snapshot());
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Aggregator lagged behind cache events");
                        tx.send_replace(self.snapshot());
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        AggregatorHandle { rx, task }
    }
}

/// Attached aggregator. Detaches when dropped.
pub struct AggregatorHandle {
    rx: watch::Receiver<AggregateProgress>,
    task: JoinHandle<()>,
}

impl AggregatorHandle {
    /// Latest published aggregate.
    #[must_use]
    pub fn current(&self) -> AggregateProgress {
        self.rx.borrow().clone()
    }

    /// A receiver for the published aggregates.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AggregateProgress> {
        self.rx.clone()
    }

    /// Wait for the next published aggregate.
    pub async fn changed(&mut self) -> Option<AggregateProgress> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    /// Stop listening for cache changes.
    pub fn detach(self) {}
}

impl Drop for AggregatorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policycalc_core::cache::InMemoryCache;
    use policycalc_core::meta::CalcKind;
    use policycalc_core::options::EngineConfig;
    use serde_json::json;
    use std::time::Duration;

    fn member(percent: Option<f64>, status: Option<CalculationStatus>) -> MemberProgress {
        MemberProgress {
            key: "economy:x".into(),
            percent,
            message: None,
            status,
        }
    }

    fn ok() -> CalculationStatus {
        CalculationStatus::Ok { result: json!({}) }
    }

    #[test]
    fn mean_progress_and_computing() {
        let result = aggregate(vec![
            member(Some(20.0), Some(CalculationStatus::computing())),
            member(Some(60.0), Some(CalculationStatus::computing())),
            member(Some(100.0), Some(ok())),
        ]);
        assert!((result.overall_progress - 60.0).abs() < 1e-9);
        assert_eq!(result.overall_status, OverallStatus::Computing);
        assert!(!result.is_finished());
    }

    #[test]
    fn any_error_wins() {
        let result = aggregate(vec![
            member(Some(100.0), Some(ok())),
            member(Some(100.0), Some(CalculationStatus::error("Region not found"))),
            member(Some(40.0), Some(CalculationStatus::computing())),
        ]);
        assert_eq!(result.overall_status, OverallStatus::Error);
        assert_eq!(result.first_error(), Some("Region not found"));
    }

    #[test]
    fn all_ok_is_complete() {
        let result = aggregate(vec![
            member(Some(100.0), Some(ok())),
            member(Some(100.0), Some(ok())),
        ]);
        assert_eq!(result.overall_status, OverallStatus::Complete);
        assert!(result.is_finished());
    }

    #[test]
    fn missing_members_count_as_zero() {
        let result = aggregate(vec![member(None, None), member(Some(50.0), Some(ok()))]);
        assert!((result.overall_progress - 25.0).abs() < 1e-9);
        assert_eq!(result.overall_status, OverallStatus::Computing);
    }

    #[test]
    fn empty_group_is_computing_at_zero() {
        let result = aggregate(Vec::new());
        assert!(result.overall_progress.abs() < f64::EPSILON);
        assert_eq!(result.overall_status, OverallStatus::Computing);
    }

    fn setup() -> (Arc<InMemoryCache>, Arc<ReportAggregator>, Vec<CacheKey>) {
        let cache = Arc::new(InMemoryCache::new());
        let keys = vec![
            CacheKey::new(CalcKind::Economy, "a"),
            CacheKey::new(CalcKind::Economy, "b"),
        ];
        let estimator = Arc::new(SyntheticProgressEstimator::new(Arc::new(
            EngineConfig::default(),
        )));
        let aggregator = Arc::new(ReportAggregator::new(keys.clone(), cache.clone(), estimator));
        (cache, aggregator, keys)
    }

    #[tokio::test]
    async fn attached_aggregator_follows_cache() {
        let (cache, aggregator, keys) = setup();
        let mut handle = Arc::clone(&aggregator).attach();
        assert_eq!(handle.current().overall_status, OverallStatus::Computing);

        cache.set(&keys[0], ok());
        let update = tokio::time::timeout(Duration::from_secs(1), handle.changed())
            .await
            .unwrap()
            .unwrap();
        assert!((update.overall_progress - 50.0).abs() < 1e-9);

        cache.set(&keys[1], ok());
        let update = tokio::time::timeout(Duration::from_secs(1), handle.changed())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(update.overall_status, OverallStatus::Complete);
    }

    #[tokio::test]
    async fn detach_and_reattach_reads_cache_state() {
        let (cache, aggregator, keys) = setup();
        let handle = Arc::clone(&aggregator).attach();
        handle.detach();

        cache.set(&keys[0], CalculationStatus::error("boom"));
        let handle = Arc::clone(&aggregator).attach();
        assert_eq!(handle.current().overall_status, OverallStatus::Error);
    }

    #[tokio::test]
    async fn unrelated_keys_are_ignored() {
        let (cache, aggregator, keys) = setup();
        let handle = Arc::clone(&aggregator).attach();
        let mut rx = handle.subscribe();
        cache.set(&CacheKey::new(CalcKind::Household, "other"), ok());
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(!rx.has_changed().unwrap());

        cache.set(&keys[1], CalculationStatus::Pending);
        tokio::time::timeout(Duration::from_secs(1), rx.changed())
            .await
            .unwrap()
            .unwrap();
    }
}
