//! Result write-back.
//!
//! The persister only marshals a terminal status into a
//! [`ReportRecord`] and hands it to a [`ReportStore`]. Deciding *when*
//! to persist is the orchestrator's job.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::info;

use policycalc_core::api::{ApiError, ComputeApi};
use policycalc_core::meta::CalcStartConfig;
use policycalc_core::report::ReportRecord;
use policycalc_core::status::CalculationStatus;

use crate::interfaces::{ReportStore, ReportTarget, ResultPersister};

/// Failure to write a report.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("calculation {0} has not finished")]
    NotTerminal(String),

    #[error("report store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("report serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("report API error: {0}")]
    Api(#[from] ApiError),
}

/// Persister that writes into a [`ReportStore`].
pub struct ReportResultPersister {
    store: Arc<dyn ReportStore>,
}

impl ReportResultPersister {
    #[must_use]
    pub fn new(store: Arc<dyn ReportStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ResultPersister for ReportResultPersister {
    async fn persist(
        &self,
        config: &CalcStartConfig,
        status: &CalculationStatus,
    ) -> Result<(), PersistError> {
        let record = ReportRecord::from_terminal(status, config.label.clone())
            .ok_or_else(|| PersistError::NotTerminal(config.calc_id.to_string()))?;
        let target = ReportTarget::of(config);
        self.store.write(&target, &record).await?;
        info!(
            calc_id = %config.calc_id,
            report_id = %target.report_id,
            status = status.label(),
            "Report persisted"
        );
        Ok(())
    }
}

/// Process-local store, mainly for tests and dry runs.
#[derive(Default)]
pub struct MemoryReportStore {
    reports: RwLock<HashMap<ReportTarget, ReportRecord>>,
    writes: RwLock<Vec<ReportTarget>>,
}

impl MemoryReportStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, target: &ReportTarget) -> Option<ReportRecord> {
        self.reports.read().get(target).cloned()
    }

    /// Every write in order, including overwrites.
    #[must_use]
    pub fn writes(&self) -> Vec<ReportTarget> {
        self.writes.read().clone()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn write(&self, target: &ReportTarget, record: &ReportRecord) -> Result<(), PersistError> {
        self.reports.write().insert(target.clone(), record.clone());
        self.writes.write().push(target.clone());
        Ok(())
    }
}

/// Store that patches the report through the compute API.
pub struct ApiReportStore {
    api: Arc<dyn ComputeApi>,
}

impl ApiReportStore {
    #[must_use]
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl ReportStore for ApiReportStore {
    async fn write(&self, target: &ReportTarget, record: &ReportRecord) -> Result<(), PersistError> {
        self.api
            .update_report(&target.country_id, &target.report_id, record)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policycalc_core::meta::{CalculationMeta, PolicyIds};
    use policycalc_core::report::ReportStatus;
    use policycalc_core::scripted::ScriptedComputeApi;
    use serde_json::json;

    fn config() -> CalcStartConfig {
        let meta = CalculationMeta::economy("us", PolicyIds::new("2", Some("5".into())), "cps", None);
        CalcStartConfig::new("sim-1", meta)
            .with_report_id("report-1")
            .with_label("Top rate cut")
    }

    #[tokio::test]
    async fn persists_ok_output() {
        let store = Arc::new(MemoryReportStore::new());
        let persister = ReportResultPersister::new(store.clone());
        persister
            .persist(&config(), &CalculationStatus::Ok { result: json!({"budget": 1}) })
            .await
            .unwrap();

        let record = store.get(&ReportTarget::new("us", "report-1")).unwrap();
        assert_eq!(record.status, ReportStatus::Complete);
        assert_eq!(record.output, json!({"budget": 1}));
        assert_eq!(record.label.as_deref(), Some("Top rate cut"));
    }

    #[tokio::test]
    async fn persists_error_message() {
        let store = Arc::new(MemoryReportStore::new());
        let persister = ReportResultPersister::new(store.clone());
        persister
            .persist(&config(), &CalculationStatus::error("Dataset unavailable"))
            .await
            .unwrap();
        let record = store.get(&ReportTarget::new("us", "report-1")).unwrap();
        assert_eq!(record.status, ReportStatus::Error);
        assert_eq!(record.output, json!({"error": "Dataset unavailable"}));
    }

    #[tokio::test]
    async fn refuses_in_flight_status() {
        let store = Arc::new(MemoryReportStore::new());
        let persister = ReportResultPersister::new(store.clone());
        let err = persister
            .persist(&config(), &CalculationStatus::computing())
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::NotTerminal(id) if id == "sim-1"));
        assert!(store.writes().is_empty());
    }

    #[tokio::test]
    async fn api_store_patches_report() {
        let api = Arc::new(ScriptedComputeApi::new());
        let persister = ReportResultPersister::new(Arc::new(ApiReportStore::new(api.clone())));
        persister
            .persist(&config(), &CalculationStatus::Ok { result: json!(7) })
            .await
            .unwrap();

        let writes = api.reports();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].country_id, "us");
        assert_eq!(writes[0].report_id, "report-1");
        assert_eq!(writes[0].record.output, json!(7));
    }

    #[tokio::test]
    async fn api_store_surfaces_failures() {
        let api = Arc::new(ScriptedComputeApi::new());
        api.fail_reports("503");
        let persister = ReportResultPersister::new(Arc::new(ApiReportStore::new(api)));
        let err = persister
            .persist(&config(), &CalculationStatus::Ok { result: json!(7) })
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::Api(_)));
    }
}
