//! Run-scoped pipeline configuration.
//!
//! A single `PipelineConfig` value is threaded into every stage. Defaults
//! reproduce the published constants; any field can be overridden from TOML.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Inclusive range of fiscal years kept in every table.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct YearRange {
    pub min: i32,
    pub max: i32,
}

impl YearRange {
    pub fn contains(&self, year: i32) -> bool {
        (self.min..=self.max).contains(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> {
        self.min..=self.max
    }

    pub fn len(&self) -> usize {
        (self.max - self.min + 1).max(0) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.max < self.min
    }
}

impl Default for YearRange {
    fn default() -> Self {
        Self { min: 2015, max: 2024 }
    }
}

/// One tracked financial concept: a short label and its XBRL tag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConceptTag {
    pub label: String,
    pub tag: String,
}

/// Priority-ordered variants collapsed into one canonical label.
///
/// The first variant present for a firm-year wins; the others are discarded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reconciliation {
    pub canonical: String,
    pub variants: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConceptConfig {
    pub tags: Vec<ConceptTag>,
    pub reconcile: Vec<Reconciliation>,
}

impl Default for ConceptConfig {
    fn default() -> Self {
        let tag = |label: &str, tag: &str| ConceptTag {
            label: label.into(),
            tag: tag.into(),
        };
        Self {
            tags: vec![
                tag(
                    "foreign",
                    "IncomeLossFromContinuingOperationsBeforeIncomeTaxesForeign",
                ),
                tag(
                    "domestic",
                    "IncomeLossFromContinuingOperationsBeforeIncomeTaxesDomestic",
                ),
                tag(
                    "total_v1",
                    "IncomeLossFromContinuingOperationsBeforeIncomeTaxesExtraordinaryItemsNoncontrollingInterest",
                ),
                tag(
                    "total_v2",
                    "IncomeLossFromContinuingOperationsBeforeIncomeTaxesMinorityInterestAndIncomeLossFromEquityMethodInvestments",
                ),
            ],
            reconcile: vec![Reconciliation {
                canonical: "total".into(),
                variants: vec!["total_v1".into(), "total_v2".into()],
            }],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// SEC requires a contact address in the User-Agent header.
    pub user_agent: String,
    pub ticker_map_url: String,
    pub company_facts_url: String,
    pub taxonomy: String,
    pub unit: String,
    /// Fixed delay between requests; 110 ms stays under 10 requests/second.
    pub request_delay_ms: u64,
    pub timeout_secs: u64,
    pub annual_forms: Vec<String>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            user_agent: "tariffpanel research contact@example.org".into(),
            ticker_map_url: "https://www.sec.gov/files/company_tickers.json".into(),
            company_facts_url: "https://data.sec.gov/api/xbrl/companyfacts".into(),
            taxonomy: "us-gaap".into(),
            unit: "USD".into(),
            request_delay_ms: 110,
            timeout_secs: 30,
            annual_forms: vec!["10-K".into()],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExtractionConfig {
    pub min_duration_days: i64,
    pub max_duration_days: i64,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_duration_days: 300,
            max_duration_days: 400,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PanelConfig {
    /// Relative residual |f + d - t| / |t| above which the share is nulled.
    pub identity_tolerance: f64,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            identity_tolerance: 0.05,
        }
    }
}

/// Lower/upper quantiles for winsorization, as fractions in [0, 1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct QuantilePair {
    pub lower: f64,
    pub upper: f64,
}

/// Absolute bounds for trimming; values outside are dropped, not clipped.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MergeConfig {
    pub ticker_suffixes: Vec<String>,
    pub industry_digits: usize,
    /// SEC reports raw dollars; the vendor reports millions.
    pub income_scale: f64,
    /// Rows directly under the header of the firm-universe export that are not data.
    pub universe_skip_rows: usize,
    pub fps_winsor: QuantilePair,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            ticker_suffixes: vec![" US Equity".into()],
            industry_digits: 3,
            income_scale: 1e6,
            universe_skip_rows: 1,
            fps_winsor: QuantilePair {
                lower: 0.01,
                upper: 0.99,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BootstrapSettings {
    pub replications: usize,
    pub seed: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            replications: 9_999,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegressionConfig {
    /// First post-treatment year. The 2018 tariffs landed mid-year, so the
    /// first full annual filing reflecting them is fiscal 2019.
    pub treatment_onset: i32,
    pub placebo_onset: i32,
    pub event_reference_year: i32,
    pub etr_winsor: QuantilePair,
    pub etr_winsor_alt: QuantilePair,
    pub etr_trim_wide: Bounds,
    pub etr_trim_narrow: Bounds,
    /// Inclusive NAICS-3 range flagged as goods-producing.
    pub goods_producing: (u32, u32),
    pub critical_value: f64,
    pub bootstrap: BootstrapSettings,
}

impl Default for RegressionConfig {
    fn default() -> Self {
        Self {
            treatment_onset: 2019,
            placebo_onset: 2017,
            event_reference_year: 2017,
            etr_winsor: QuantilePair {
                lower: 0.01,
                upper: 0.99,
            },
            etr_winsor_alt: QuantilePair {
                lower: 0.05,
                upper: 0.95,
            },
            etr_trim_wide: Bounds {
                min: 0.0,
                max: 100.0,
            },
            etr_trim_narrow: Bounds {
                min: 0.0,
                max: 60.0,
            },
            goods_producing: (111, 339),
            critical_value: 1.96,
            bootstrap: BootstrapSettings::default(),
        }
    }
}

/// Complete configuration for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub years: YearRange,
    pub concepts: ConceptConfig,
    pub acquisition: AcquisitionConfig,
    pub extraction: ExtractionConfig,
    pub panel: PanelConfig,
    pub merge: MergeConfig,
    pub regression: RegressionConfig,
}

impl PipelineConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Tag for a concept label, if tracked.
    pub fn tag_for(&self, label: &str) -> Option<&str> {
        self.concepts
            .tags
            .iter()
            .find(|c| c.label == label)
            .map(|c| c.tag.as_str())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.years.is_empty() {
            return invalid(format!(
                "years.min ({}) > years.max ({})",
                self.years.min, self.years.max
            ));
        }
        let ex = &self.extraction;
        if ex.min_duration_days > ex.max_duration_days {
            return invalid(format!(
                "duration window [{}, {}] is inverted",
                ex.min_duration_days, ex.max_duration_days
            ));
        }
        let tol = self.panel.identity_tolerance;
        if !(tol.is_finite() && tol > 0.0) {
            return invalid(format!("identity_tolerance must be positive, got {tol}"));
        }
        if self.concepts.tags.is_empty() {
            return invalid("no concepts configured".into());
        }
        for rule in &self.concepts.reconcile {
            if rule.variants.is_empty() {
                return invalid(format!("reconciliation '{}' has no variants", rule.canonical));
            }
            for v in &rule.variants {
                if self.tag_for(v).is_none() {
                    return invalid(format!(
                        "reconciliation '{}' names unknown concept '{v}'",
                        rule.canonical
                    ));
                }
            }
        }
        if !(self.merge.income_scale.is_finite() && self.merge.income_scale > 0.0) {
            return invalid("merge.income_scale must be positive".into());
        }
        if self.merge.industry_digits == 0 {
            return invalid("merge.industry_digits must be at least 1".into());
        }

        let reg = &self.regression;
        for q in [&self.merge.fps_winsor, &reg.etr_winsor, &reg.etr_winsor_alt] {
            if !(0.0..=1.0).contains(&q.lower) || !(0.0..=1.0).contains(&q.upper) || q.lower > q.upper
            {
                return invalid(format!(
                    "quantile pair ({}, {}) must satisfy 0 <= lower <= upper <= 1",
                    q.lower, q.upper
                ));
            }
        }
        for b in [&reg.etr_trim_wide, &reg.etr_trim_narrow] {
            if b.min > b.max {
                return invalid(format!("trim bounds [{}, {}] are inverted", b.min, b.max));
            }
        }
        if !self.years.contains(reg.event_reference_year) {
            return invalid(format!(
                "event reference year {} outside {}..={}",
                reg.event_reference_year, self.years.min, self.years.max
            ));
        }
        if reg.placebo_onset >= reg.treatment_onset {
            return invalid(format!(
                "placebo onset {} must precede treatment onset {}",
                reg.placebo_onset, reg.treatment_onset
            ));
        }
        if reg.bootstrap.replications == 0 {
            return invalid("bootstrap.replications must be positive".into());
        }
        Ok(())
    }
}
