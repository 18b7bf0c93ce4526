//! Calculation identity: kind, id, and write-once metadata.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CalcError;

/// Kind of calculation, selecting the handler strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalcKind {
    /// Single household, short-running.
    Household,
    /// Society-wide population impact, long-running and possibly queued.
    Economy,
}

impl CalcKind {
    /// Stable lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            CalcKind::Household => "household",
            CalcKind::Economy => "economy",
        }
    }
}

impl fmt::Display for CalcKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalcKind {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "household" => Ok(CalcKind::Household),
            "economy" | "society-wide" | "societywide" => Ok(CalcKind::Economy),
            other => Err(CalcError::Config(format!(
                "unknown calculation kind: {other}"
            ))),
        }
    }
}

/// External identifier of a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalcId(String);

impl CalcId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CalcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CalcId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CalcId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Baseline and optional reform policy ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PolicyIds {
    pub baseline: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reform: Option<String>,
}

impl PolicyIds {
    #[must_use]
    pub fn new(baseline: impl Into<String>, reform: Option<String>) -> Self {
        Self {
            baseline: baseline.into(),
            reform,
        }
    }

    /// The policy whose effect is being measured: the reform if any,
    /// otherwise the baseline.
    #[must_use]
    pub fn effective(&self) -> &str {
        self.reform.as_deref().unwrap_or(&self.baseline)
    }
}

/// Immutable description of what to compute.
///
/// Built once when a report's simulations are finalized. There are no
/// setters; a different calculation needs a different value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationMeta {
    #[serde(rename = "type")]
    kind: CalcKind,
    country_id: String,
    policy_ids: PolicyIds,
    population_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_period: Option<String>,
}

impl CalculationMeta {
    /// Metadata for a household calculation.
    #[must_use]
    pub fn household(
        country_id: impl Into<String>,
        policy_ids: PolicyIds,
        household_id: impl Into<String>,
    ) -> Self {
        Self {
            kind: CalcKind::Household,
            country_id: country_id.into(),
            policy_ids,
            population_id: household_id.into(),
            region: None,
            time_period: None,
        }
    }

    /// Metadata for a society-wide calculation over a dataset, optionally
    /// filtered to a region.
    #[must_use]
    pub fn economy(
        country_id: impl Into<String>,
        policy_ids: PolicyIds,
        dataset: impl Into<String>,
        region: Option<String>,
    ) -> Self {
        Self {
            kind: CalcKind::Economy,
            country_id: country_id.into(),
            policy_ids,
            population_id: dataset.into(),
            region,
            time_period: None,
        }
    }

    /// Return a copy scoped to a simulation year.
    #[must_use]
    pub fn with_time_period(mut self, time_period: impl Into<String>) -> Self {
        self.time_period = Some(time_period.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> CalcKind {
        self.kind
    }

    #[must_use]
    pub fn country_id(&self) -> &str {
        &self.country_id
    }

    #[must_use]
    pub fn policy_ids(&self) -> &PolicyIds {
        &self.policy_ids
    }

    #[must_use]
    pub fn population_id(&self) -> &str {
        &self.population_id
    }

    #[must_use]
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    #[must_use]
    pub fn time_period(&self) -> Option<&str> {
        self.time_period.as_deref()
    }

    /// Check that every field the compute API needs is present.
    ///
    /// Returns a description of the first missing field.
    pub fn validate(&self) -> Result<(), String> {
        if self.country_id.trim().is_empty() {
            return Err("missing country id".into());
        }
        if self.policy_ids.baseline.trim().is_empty() {
            return Err("missing baseline policy id".into());
        }
        if self
            .policy_ids
            .reform
            .as_deref()
            .is_some_and(|r| r.trim().is_empty())
        {
            return Err("empty reform policy id".into());
        }
        if self.population_id.trim().is_empty() {
            return Err(match self.kind {
                CalcKind::Household => "missing household id".into(),
                CalcKind::Economy => "missing dataset".into(),
            });
        }
        Ok(())
    }
}

/// Request to start or resume a calculation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcStartConfig {
    pub calc_id: CalcId,
    pub meta: CalculationMeta,
    /// Report that owns the result. Defaults to the calc id.
    pub report_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl CalcStartConfig {
    #[must_use]
    pub fn new(calc_id: impl Into<CalcId>, meta: CalculationMeta) -> Self {
        let calc_id = calc_id.into();
        Self {
            report_id: calc_id.as_str().to_string(),
            calc_id,
            meta,
            label: None,
        }
    }

    #[must_use]
    pub fn with_report_id(mut self, report_id: impl Into<String>) -> Self {
        self.report_id = report_id.into();
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}
