//! Scripted [`ComputeApi`] for tests.
//!
//! Each endpoint replays a queue of steps. The last step of a queue
//! repeats forever, so a single `computing` step models a job that never
//! finishes.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::api::{ApiError, ApiResponse, ComputeApi};
use crate::meta::CalculationMeta;
use crate::report::ReportRecord;

/// One scripted reply.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Respond(ApiResponse),
    /// Transport failure with the given description.
    Fail(String),
}

impl ScriptStep {
    #[must_use]
    pub fn respond(response: ApiResponse) -> Self {
        ScriptStep::Respond(response)
    }

    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        ScriptStep::Fail(reason.into())
    }

    fn into_result(self) -> Result<ApiResponse, ApiError> {
        match self {
            ScriptStep::Respond(response) => Ok(response),
            ScriptStep::Fail(reason) => Err(ApiError::Unavailable(reason)),
        }
    }
}

/// A report write received by the fake.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportWrite {
    pub country_id: String,
    pub report_id: String,
    pub record: ReportRecord,
}

/// In-process stand-in for the compute API.
#[derive(Default)]
pub struct ScriptedComputeApi {
    household: Mutex<HashMap<String, VecDeque<ScriptStep>>>,
    economy: Mutex<VecDeque<ScriptStep>>,
    household_calls: AtomicUsize,
    economy_calls: AtomicUsize,
    reports: Mutex<Vec<ReportWrite>>,
    report_failure: Mutex<Option<String>>,
    latency: Option<Duration>,
}

impl ScriptedComputeApi {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every reply by `latency` (virtual time under a paused clock).
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Queue a reply for the household endpoint of `policy_id`.
    pub fn push_household(&self, policy_id: &str, step: ScriptStep) {
        self.household
            .lock()
            .entry(policy_id.to_string())
            .or_default()
            .push_back(step);
    }

    /// Queue a reply for the economy endpoint.
    pub fn push_economy(&self, step: ScriptStep) {
        self.economy.lock().push_back(step);
    }

    /// Make every subsequent report write fail.
    pub fn fail_reports(&self, reason: impl Into<String>) {
        *self.report_failure.lock() = Some(reason.into());
    }

    #[must_use]
    pub fn household_calls(&self) -> usize {
        self.household_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn economy_calls(&self) -> usize {
        self.economy_calls.load(Ordering::SeqCst)
    }

    /// Report writes received so far, in order.
    #[must_use]
    pub fn reports(&self) -> Vec<ReportWrite> {
        self.reports.lock().clone()
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn next_step(queue: &mut VecDeque<ScriptStep>) -> ScriptStep {
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| ScriptStep::fail("empty script"))
    } else {
        queue
            .front()
            .cloned()
            .unwrap_or_else(|| ScriptStep::fail("no scripted response"))
    }
}

#[async_trait]
impl ComputeApi for ScriptedComputeApi {
    async fn household_impact(
        &self,
        _country_id: &str,
        _household_id: &str,
        policy_id: &str,
    ) -> Result<ApiResponse, ApiError> {
        self.household_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let step = {
            let mut household = self.household.lock();
            next_step(household.entry(policy_id.to_string()).or_default())
        };
        step.into_result()
    }

    async fn economy_impact(&self, _meta: &CalculationMeta) -> Result<ApiResponse, ApiError> {
        self.economy_calls.fetch_add(1, Ordering::SeqCst);
        self.delay().await;
        let step = next_step(&mut self.economy.lock());
        step.into_result()
    }

    async fn update_report(
        &self,
        country_id: &str,
        report_id: &str,
        record: &ReportRecord,
    ) -> Result<(), ApiError> {
        self.delay().await;
        if let Some(reason) = self.report_failure.lock().clone() {
            return Err(ApiError::Unavailable(reason));
        }
        self.reports.lock().push(ReportWrite {
            country_id: country_id.to_string(),
            report_id: report_id.to_string(),
            record: record.clone(),
        });
        Ok(())
    }
}
