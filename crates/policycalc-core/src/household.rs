//! Household calculation strategy.
//!
//! A household calculation is short-running and addressed per policy.
//! With a reform present the baseline and reform runs are requested
//! concurrently and combined into one status.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::api::ComputeApi;
use crate::cache::ResultCache;
use crate::handler::{CalculationHandler, HandlerCore};
use crate::meta::{CalcKind, CalculationMeta};
use crate::options::EngineConfig;
use crate::status::{CalculationStatus, ComputingInfo};

/// Handler for single-household calculations.
pub struct HouseholdHandler {
    core: HandlerCore,
}

impl HouseholdHandler {
    #[must_use]
    pub fn new(
        cache: Arc<dyn ResultCache>,
        api: Arc<dyn ComputeApi>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            core: HandlerCore::new(CalcKind::Household, cache, api, config),
        }
    }

    async fn fetch_policy(&self, meta: &CalculationMeta, policy_id: &str) -> CalculationStatus {
        let api = self.core.api();
        self.core
            .request_status("household", || {
                api.household_impact(meta.country_id(), meta.population_id(), policy_id)
            })
            .await
    }
}

#[async_trait]
impl CalculationHandler for HouseholdHandler {
    fn core(&self) -> &HandlerCore {
        &self.core
    }

    async fn fetch(&self, meta: &CalculationMeta) -> CalculationStatus {
        let policies = meta.policy_ids();
        match policies.reform.as_deref() {
            None => self.fetch_policy(meta, &policies.baseline).await,
            Some(reform) => {
                let (baseline, reform) = futures::join!(
                    self.fetch_policy(meta, &policies.baseline),
                    self.fetch_policy(meta, reform)
                );
                combine(baseline, reform)
            }
        }
    }
}

/// Merge the baseline and reform statuses of one household.
///
/// Any error wins; both `ok` gives `ok` with
/// `{"baseline": .., "reform": ..}`; otherwise the pair is still running
/// and reports the less advanced side.
#[must_use]
pub fn combine(baseline: CalculationStatus, reform: CalculationStatus) -> CalculationStatus {
    use CalculationStatus::{Computing, Error, Ok, Pending};

    match (baseline, reform) {
        (Error { error }, _) | (_, Error { error }) => Error { error },
        (Ok { result: baseline }, Ok { result: reform }) => Ok {
            result: json!({ "baseline": baseline, "reform": reform }),
        },
        (Pending, Pending) => Pending,
        (Computing(a), Computing(b)) => Computing(slower(a, b)),
        (Computing(info), _) | (_, Computing(info)) => Computing(info),
        (Pending, Ok { .. }) | (Ok { .. }, Pending) => Pending,
    }
}

fn slower(a: ComputingInfo, b: ComputingInfo) -> ComputingInfo {
    let remaining = |i: &ComputingInfo| i.estimated_time_remaining.unwrap_or(0);
    let progress = |i: &ComputingInfo| i.progress.unwrap_or(0.0);
    if remaining(&b) > remaining(&a) || (remaining(&b) == remaining(&a) && progress(&b) < progress(&a))
    {
        b
    } else {
        a
    }
}
