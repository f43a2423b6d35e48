//! Tariff panel runner: regression analysis on the merged panel.
//!
//! This crate builds on `tariffpanel-core` to provide:
//! - Regression variable construction (treatment timing, controls, outcome variants)
//! - Estimation samples for each model specification
//! - Fixed-effects absorption and CRV1 cluster-robust OLS
//! - Wild-cluster restricted bootstrap, deterministic under a seed
//! - Event study and the R1–R10 robustness suite
//! - Result export (CSV, JSON, Markdown) and descriptive data reports

pub mod distributions;
pub mod estimator;
pub mod event_study;
pub mod export;
pub mod fixed_effects;
pub mod report;
pub mod robustness;
pub mod sample;
pub mod variables;
pub mod wild_bootstrap;

pub use estimator::{estimate, fit, CoefEstimate, Estimation, EstimationError, FitResult};
pub use event_study::{run_event_study, EventStudy, EventStudyRow};
pub use export::save_results;
pub use fixed_effects::FixedEffectsSolver;
pub use report::save_reports;
pub use robustness::{run_analysis, standard_specs, AnalysisError, AnalysisResults, SpecResult};
pub use sample::{build_sample, FixedEffect, ModelSpec, Outcome, RegressionSample, SampleRestriction, Treatment};
pub use variables::{construct_variables, RegressionRow, VariableSet, VariableSummary};
pub use wild_bootstrap::{wild_cluster_bootstrap, BootstrapError, BootstrapOutcome};
