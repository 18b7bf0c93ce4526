//! Application configuration from CLI flags, environment, and the engine
//! config file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;

use policycalc_core::error::CalcError;
use policycalc_core::meta::{CalcKind, CalcStartConfig, CalculationMeta, PolicyIds};
use policycalc_core::options::EngineConfig;

const ENGINE_CONFIG_FILENAME: &str = "engine.json";
const CONFIG_DIR_NAME: &str = "policycalc";

/// policycalc: run PolicyEngine simulations and follow their progress.
#[derive(Parser, Debug)]
#[command(name = "policycalc", version, about)]
#[allow(clippy::struct_excessive_bools)]
pub struct AppConfig {
    /// Calculation kind: household or economy.
    #[arg(short, long, default_value = "economy")]
    pub kind: String,

    /// Country id.
    #[arg(long, default_value = "us", env = "POLICYCALC_COUNTRY")]
    pub country: String,

    /// Baseline policy id.
    #[arg(short, long)]
    pub baseline: Option<String>,

    /// Reform policy id.
    #[arg(short, long)]
    pub reform: Option<String>,

    /// Household id or dataset. Repeat to run several simulations.
    #[arg(short, long)]
    pub population: Vec<String>,

    /// Region filter for economy runs (defaults to the country).
    #[arg(long)]
    pub region: Option<String>,

    /// Simulation year for economy runs.
    #[arg(long)]
    pub time_period: Option<String>,

    /// Calculation id (derived from the inputs if omitted).
    #[arg(long)]
    pub calc_id: Option<String>,

    /// Report the result is written to (defaults to the calc id).
    #[arg(long)]
    pub report_id: Option<String>,

    /// Display label for the simulation.
    #[arg(long)]
    pub label: Option<String>,

    /// Directory to write report JSON files into.
    #[arg(short, long, conflicts_with = "write_back")]
    pub output: Option<PathBuf>,

    /// Write results back to the API report endpoint.
    #[arg(long)]
    pub write_back: bool,

    /// Engine configuration file (JSON).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Compute API base URL.
    #[arg(long, env = "POLICYCALC_API_URL")]
    pub api_url: Option<String>,

    /// Timeout duration (e.g., "30m", "1h").
    #[arg(long, default_value = "30m")]
    pub timeout: String,

    /// Print one JSON document per simulation.
    #[arg(long, conflicts_with = "quiet")]
    pub json: bool,

    /// Quiet mode (only output result payloads).
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose output.
    #[arg(short, long)]
    pub verbose: bool,

    /// Generate shell completion.
    #[arg(long, value_enum)]
    pub completion: Option<clap_complete::Shell>,
}

impl AppConfig {
    /// Parse CLI arguments.
    #[must_use]
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }

    /// Parse timeout string into Duration.
    #[must_use]
    pub fn timeout_duration(&self) -> Duration {
        parse_duration(&self.timeout).unwrap_or(Duration::from_secs(1800))
    }

    /// Engine configuration: the `--config` file, else the XDG file, else
    /// defaults; then normalized and overridden by flags.
    ///
    /// An unreadable `--config` file is an error. A broken XDG file is
    /// logged and ignored.
    pub fn engine_config(&self) -> Result<EngineConfig, CalcError> {
        let mut engine = if let Some(path) = &self.config {
            load_engine_config(path)?
        } else {
            match xdg_engine_config_path().filter(|p| p.exists()) {
                Some(path) => load_engine_config(&path).unwrap_or_else(|err| {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring engine config");
                    EngineConfig::default()
                }),
                None => EngineConfig::default(),
            }
        };

        if let Some(url) = &self.api_url {
            engine.api_url.clone_from(url);
        }
        Ok(engine.normalize())
    }

    /// One start config per population, or a single one if none given.
    pub fn start_configs(&self) -> Result<Vec<CalcStartConfig>, CalcError> {
        let kind: CalcKind = self.kind.parse()?;
        let populations: Vec<&str> = if self.population.is_empty() {
            vec![default_population(kind)]
        } else {
            self.population.iter().map(String::as_str).collect()
        };
        let many = populations.len() > 1;

        let configs = populations
            .into_iter()
            .enumerate()
            .map(|(index, population)| {
                let meta = self.meta_for(kind, population);
                let suffix = if many {
                    format!("-{}", index + 1)
                } else {
                    String::new()
                };
                let calc_id = match &self.calc_id {
                    Some(id) => format!("{id}{suffix}"),
                    None => derive_calc_id(&meta),
                };
                let mut config = CalcStartConfig::new(calc_id, meta);
                if let Some(report_id) = &self.report_id {
                    config = config.with_report_id(format!("{report_id}{suffix}"));
                }
                match (&self.label, many) {
                    (Some(label), true) => config.with_label(format!("{label} ({population})")),
                    (Some(label), false) => config.with_label(label.clone()),
                    (None, _) => config,
                }
            })
            .collect();
        Ok(configs)
    }

    fn meta_for(&self, kind: CalcKind, population: &str) -> CalculationMeta {
        let policies = PolicyIds::new(
            self.baseline.clone().unwrap_or_default(),
            self.reform.clone(),
        );
        match kind {
            CalcKind::Household => {
                CalculationMeta::household(self.country.clone(), policies, population)
            }
            CalcKind::Economy => {
                let meta = CalculationMeta::economy(
                    self.country.clone(),
                    policies,
                    population,
                    self.region.clone(),
                );
                match &self.time_period {
                    Some(year) => meta.with_time_period(year.clone()),
                    None => meta,
                }
            }
        }
    }
}

fn default_population(kind: CalcKind) -> &'static str {
    match kind {
        CalcKind::Household => "",
        CalcKind::Economy => "default",
    }
}

/// `{kind}-{country}-{policy}-{population}`, stable for equal inputs so a
/// rerun resumes the same calculation.
fn derive_calc_id(meta: &CalculationMeta) -> String {
    let mut id = format!(
        "{}-{}-{}-{}",
        meta.kind(),
        meta.country_id(),
        meta.policy_ids().effective(),
        meta.population_id()
    );
    if let Some(region) = meta.region() {
        id.push('-');
        id.push_str(region);
    }
    id
}

fn load_engine_config(path: &Path) -> Result<EngineConfig, CalcError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| CalcError::Config(format!("cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| CalcError::Config(format!("invalid engine config {}: {e}", path.display())))
}

/// `$XDG_CONFIG_HOME/policycalc/engine.json`, or under `~/.config`.
fn xdg_engine_config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
    Some(config_dir.join(CONFIG_DIR_NAME).join(ENGINE_CONFIG_FILENAME))
}

/// Parse a duration string like "5m", "1h", "30s".
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(mins) = s.strip_suffix('m') {
        let n: u64 = mins.parse().ok()?;
        Some(Duration::from_secs(n * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let n: u64 = hours.parse().ok()?;
        Some(Duration::from_secs(n * 3600))
    } else if let Some(ms) = s.strip_suffix("ms") {
        let n: u64 = ms.parse().ok()?;
        Some(Duration::from_millis(n))
    } else if let Some(secs) = s.strip_suffix('s') {
        let n: u64 = secs.parse().ok()?;
        Some(Duration::from_secs(n))
    } else {
        let n: u64 = s.parse().ok()?;
        Some(Duration::from_secs(n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let mut argv = vec!["policycalc"];
        argv.extend_from_slice(args);
        <AppConfig as Parser>::try_parse_from(argv).unwrap()
    }

    #[test]
    fn parse_duration_formats() {
        assert_eq!(parse_duration("5m"), Some(Duration::from_secs(300)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn economy_start_config() {
        let config = parse(&[
            "--country", "uk", "-b", "1", "-r", "94512", "--time-period", "2025",
        ]);
        let starts = config.start_configs().unwrap();
        assert_eq!(starts.len(), 1);
        let start = &starts[0];
        assert_eq!(start.calc_id.as_str(), "economy-uk-94512-default");
        assert_eq!(start.report_id, "economy-uk-94512-default");
        assert_eq!(start.meta.kind(), CalcKind::Economy);
        assert_eq!(start.meta.time_period(), Some("2025"));
        assert!(start.meta.validate().is_ok());
    }

    #[test]
    fn several_populations_get_suffixed_ids() {
        let config = parse(&[
            "-k", "household", "-b", "2", "-p", "11", "-p", "12", "--calc-id", "sim",
            "--report-id", "r", "--label", "Family",
        ]);
        let starts = config.start_configs().unwrap();
        let ids: Vec<_> = starts.iter().map(|s| s.calc_id.as_str()).collect();
        assert_eq!(ids, ["sim-1", "sim-2"]);
        assert_eq!(starts[1].report_id, "r-2");
        assert_eq!(starts[0].label.as_deref(), Some("Family (11)"));
        assert_eq!(starts[1].meta.population_id(), "12");
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let config = parse(&["-k", "society", "-b", "2"]);
        assert!(matches!(config.start_configs(), Err(CalcError::Config(_))));
    }

    #[test]
    fn missing_inputs_fail_validation() {
        let config = parse(&["-k", "household"]);
        let starts = config.start_configs().unwrap();
        assert!(starts[0].meta.validate().is_err());
    }

    #[test]
    fn explicit_engine_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        std::fs::write(&path, r#"{"server_weight": 0.5, "transport_retries": 3}"#).unwrap();

        let config = parse(&[
            "--config",
            path.to_str().unwrap(),
            "--api-url",
            "http://localhost:5000/",
        ]);
        let engine = config.engine_config().unwrap();
        assert!((engine.server_weight - 0.5).abs() < f64::EPSILON);
        assert_eq!(engine.transport_retries, 3);
        assert_eq!(engine.api_url, "http://localhost:5000");
    }

    #[test]
    fn missing_engine_config_file_is_error() {
        let config = parse(&["--config", "/nonexistent/policycalc/engine.json"]);
        assert!(matches!(config.engine_config(), Err(CalcError::Config(_))));
    }

    #[test]
    fn output_conflicts_with_write_back() {
        let parsed =
            <AppConfig as Parser>::try_parse_from(["policycalc", "-o", "out", "--write-back"]);
        assert!(parsed.is_err());
    }
}
