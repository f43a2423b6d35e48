//! The full analysis: main model with wild bootstrap, event study and the
//! robustness suite R1–R10.
//!
//! The main model and the event study are fatal on failure. A robustness
//! specification that cannot be fit is recorded with its error and the suite
//! moves on.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use tariffpanel_core::config::PipelineConfig;

use crate::estimator::{estimate, fit, EstimationError, FitResult};
use crate::event_study::{run_event_study, EventStudy};
use crate::sample::{build_sample, FixedEffect, ModelSpec, Outcome, SampleRestriction, Treatment};
use crate::variables::{VariableSet, VariableSummary};
use crate::wild_bootstrap::{wild_cluster_bootstrap, BootstrapError};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("main model: {0}")]
    Main(#[source] EstimationError),

    #[error("event study: {0}")]
    EventStudy(#[source] EstimationError),

    #[error("wild bootstrap: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Outcome of one robustness specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecResult {
    pub label: String,
    pub description: String,
    pub formula: String,
    pub tested: Option<String>,
    pub fit: Option<FitResult>,
    pub error: Option<String>,
}

impl SpecResult {
    pub fn tested_coef(&self) -> Option<&crate::estimator::CoefEstimate> {
        self.fit.as_ref()?.coef(self.tested.as_deref()?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisResults {
    pub main: SpecResult,
    pub event_study: EventStudy,
    pub robustness: Vec<SpecResult>,
    pub variables: VariableSummary,
}

impl AnalysisResults {
    /// Main model first, then R1–R10 in order.
    pub fn all_specs(&self) -> impl Iterator<Item = &SpecResult> {
        std::iter::once(&self.main).chain(&self.robustness)
    }

    pub fn failures(&self) -> usize {
        self.robustness.iter().filter(|r| r.error.is_some()).count()
    }
}

fn variant(label: &str, description: &str, change: impl FnOnce(&mut ModelSpec)) -> ModelSpec {
    let mut spec = ModelSpec::main();
    spec.label = label.into();
    spec.description = description.into();
    change(&mut spec);
    spec
}

/// R1–R10, each a single change to the main specification.
pub fn standard_specs(config: &PipelineConfig) -> Vec<ModelSpec> {
    let onset = config.regression.treatment_onset;
    vec![
        variant("R1", "No controls", |s| s.controls = false),
        variant("R2", "SIC1 x year FE", |s| {
            s.fixed_effects = vec![FixedEffect::Firm, FixedEffect::Sic1Year];
        }),
        variant("R3", "NAICS2 x year FE", |s| {
            s.fixed_effects = vec![FixedEffect::Firm, FixedEffect::Naics2Year];
        }),
        variant("R4", "NAICS2 linear trends", |s| s.industry_trends = true),
        variant(
            "R5",
            &format!("Placebo ({})", config.regression.placebo_onset),
            |s| {
                s.treatment = Treatment::PlaceboPost;
                s.restriction = SampleRestriction::YearsThrough(onset - 1);
            },
        ),
        variant("R6", "Balanced panel", |s| s.restriction = SampleRestriction::Balanced),
        variant("R7", "ETR p5/p95", |s| s.outcome = Outcome::EtrWinsorizedAlt),
        variant("R8", "ETR trimmed [0,100]", |s| s.outcome = Outcome::EtrTrimWide),
        variant("R9", "ETR trimmed [0,60]", |s| s.outcome = Outcome::EtrTrimNarrow),
        variant("R10", "FPS outcome", |s| s.outcome = Outcome::ForeignProfitShare),
    ]
}

fn run_spec(vars: &VariableSet, spec: &ModelSpec, critical_value: f64) -> SpecResult {
    let sample = build_sample(vars, spec);
    let outcome = fit(&sample, critical_value);
    if let Err(e) = &outcome {
        warn!(spec = %spec.label, error = %e, "robustness specification failed");
    }
    let (fit, error) = match outcome {
        Ok(f) => (Some(f), None),
        Err(e) => (None, Some(e.to_string())),
    };
    SpecResult {
        label: spec.label.clone(),
        description: spec.description.clone(),
        formula: spec.formula(vars),
        tested: spec.treatment.tested().map(str::to_string),
        fit,
        error,
    }
}

/// Fit everything reported for one variable set.
pub fn run_analysis(vars: &VariableSet, config: &PipelineConfig) -> Result<AnalysisResults, AnalysisError> {
    let reg = &config.regression;
    let main_spec = ModelSpec::main();

    let sample = build_sample(vars, &main_spec);
    let estimation = estimate(&sample).map_err(AnalysisError::Main)?;
    let mut main_fit = estimation.to_result(reg.critical_value);
    main_fit.bootstrap = Some(wild_cluster_bootstrap(&estimation, &reg.bootstrap)?);
    if let Some(c) = main_fit.coef(crate::sample::TREATMENT) {
        info!(
            coef = c.coef,
            se = c.se,
            p = c.p,
            n = main_fit.n_obs,
            excluded = main_fit.n_excluded,
            clusters = main_fit.n_clusters,
            "main model"
        );
    }
    let main = SpecResult {
        label: main_spec.label.clone(),
        description: main_spec.description.clone(),
        formula: main_spec.formula(vars),
        tested: main_spec.treatment.tested().map(str::to_string),
        fit: Some(main_fit),
        error: None,
    };

    let event_study =
        run_event_study(vars, reg.critical_value).map_err(AnalysisError::EventStudy)?;

    let robustness: Vec<SpecResult> = standard_specs(config)
        .iter()
        .map(|spec| run_spec(vars, spec, reg.critical_value))
        .collect();

    let results = AnalysisResults {
        main,
        event_study,
        robustness,
        variables: vars.summary.clone(),
    };
    info!(
        specs = results.robustness.len(),
        failures = results.failures(),
        "robustness suite complete"
    );
    Ok(results)
}
