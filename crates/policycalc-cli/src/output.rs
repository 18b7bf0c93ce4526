//! CLI output formatting and the file-backed report store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use policycalc_core::report::ReportRecord;
use policycalc_orchestration::interfaces::{ReportStore, ReportTarget};
use policycalc_orchestration::persister::PersistError;

/// Lines of pretty-printed result shown when not verbose.
const RESULT_PREVIEW_LINES: usize = 40;

/// Pretty-print a result payload, truncating long output unless verbose.
#[must_use]
pub fn format_result(value: &Value, verbose: bool) -> String {
    let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    let total = pretty.lines().count();
    if verbose || total <= RESULT_PREVIEW_LINES {
        return pretty;
    }
    let more = format!(
        "... ({} more lines, use -v for full output)",
        total - RESULT_PREVIEW_LINES
    );
    let mut preview: Vec<&str> = pretty.lines().take(RESULT_PREVIEW_LINES).collect();
    preview.push(&more);
    preview.join("\n")
}

/// Format a duration for display.
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn format_duration(d: Duration) -> String {
    // Round before picking the unit so a value never reads as 60 of one.
    let secs = d.as_secs_f64();
    let millis = (secs * 1000.0).round() as u64;
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let tenths = (secs * 10.0).round() as u64;
    if tenths < 600 {
        return format!("{}.{}s", tenths / 10, tenths % 10);
    }
    let whole = secs.round() as u64;
    format!("{}m{}s", whole / 60, whole % 60)
}

/// Format a percentage with one decimal.
#[must_use]
pub fn format_percent(percent: f64) -> String {
    format!("{:.1}%", percent.clamp(0.0, 100.0))
}

/// Writes each report to `<dir>/<report id>.json`.
pub struct JsonFileReportStore {
    dir: PathBuf,
}

impl JsonFileReportStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// File a report is written to. Bytes other than ASCII alphanumerics
    /// and `-` are written as `_XX` hex escapes.
    #[must_use]
    pub fn path_for(&self, report_id: &str) -> PathBuf {
        let mut safe = String::with_capacity(report_id.len());
        for byte in report_id.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' {
                safe.push(char::from(byte));
            } else {
                // `_XX` escapes keep distinct ids on distinct files.
                safe.push_str(&format!("_{byte:02X}"));
            }
        }
        self.dir.join(format!("{safe}.json"))
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl ReportStore for JsonFileReportStore {
    async fn write(&self, target: &ReportTarget, record: &ReportRecord) -> Result<(), PersistError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(&target.report_id);
        let mut body = serde_json::to_value(record)?;
        body["id"] = Value::String(target.report_id.clone());
        body["countryId"] = Value::String(target.country_id.clone());
        let content = serde_json::to_string_pretty(&body)?;
        tokio::fs::write(&path, content).await?;
        debug!(path = %path.display(), "Report written");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use policycalc_core::report::ReportStatus;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn format_duration_milli() {
        assert_eq!(format_duration(Duration::from_millis(42)), "42ms");
    }

    #[test]
    fn format_duration_seconds() {
        assert_eq!(format_duration(Duration::from_millis(3_140)), "3.1s");
    }

    #[test]
    fn format_duration_minutes() {
        assert_eq!(format_duration(Duration::from_secs(750)), "12m30s");
    }

    #[test]
    fn format_duration_rounds_across_units() {
        assert_eq!(format_duration(Duration::from_micros(999_700)), "1.0s");
        assert_eq!(format_duration(Duration::from_millis(59_960)), "1m0s");
        assert_eq!(format_duration(Duration::from_millis(119_600)), "2m0s");
        assert_eq!(format_duration(Duration::from_millis(61_400)), "1m1s");
    }

    #[test]
    fn format_percent_clamps() {
        assert_eq!(format_percent(37.54), "37.5%");
        assert_eq!(format_percent(120.0), "100.0%");
    }

    #[test]
    fn format_result_short_is_untouched() {
        let value = json!({"net_income": 41_000});
        assert_eq!(format_result(&value, false), serde_json::to_string_pretty(&value).unwrap());
    }

    #[test]
    fn format_result_long_is_truncated() {
        let value = Value::Array((0..100).map(|i| json!(i)).collect());
        let preview = format_result(&value, false);
        assert_eq!(preview.lines().count(), RESULT_PREVIEW_LINES + 1);
        assert!(preview.ends_with("use -v for full output)"));
        assert!(format_result(&value, true).lines().count() > RESULT_PREVIEW_LINES);
    }

    #[test]
    fn path_for_sanitizes_ids() {
        let store = JsonFileReportStore::new("/tmp/reports");
        assert_eq!(store.path_for("report/7 a"), PathBuf::from("/tmp/reports/report_2F7_20a.json"));
        assert_eq!(store.path_for("report-1"), PathBuf::from("/tmp/reports/report-1.json"));
    }

    #[test]
    fn path_for_keeps_distinct_ids_apart() {
        let store = JsonFileReportStore::new("/tmp/reports");
        assert_ne!(store.path_for("report/7"), store.path_for("report_7"));
        assert_ne!(store.path_for("a_2F"), store.path_for("a/"));
    }

    #[tokio::test]
    async fn file_store_writes_json() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileReportStore::new(dir.path().join("out"));
        let record = ReportRecord {
            label: Some("Reform".into()),
            output: json!({"budget": -1}),
            status: ReportStatus::Complete,
        };
        store
            .write(&ReportTarget::new("uk", "report-1"), &record)
            .await
            .unwrap();

        let content = std::fs::read_to_string(store.path_for("report-1")).unwrap();
        let body: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(body["status"], "complete");
        assert_eq!(body["id"], "report-1");
        assert_eq!(body["countryId"], "uk");
        assert_eq!(body["output"]["budget"], -1);
        assert_eq!(body["label"], "Reform");
    }
}
