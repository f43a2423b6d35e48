//! Event study: one exposure × year interaction per non-reference year.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::estimator::{fit, EstimationError, FitResult};
use crate::sample::{build_sample, event_term, ModelSpec, Treatment};
use crate::variables::VariableSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStudyRow {
    pub year: i32,
    pub coef: f64,
    pub se: f64,
    /// Undefined for the reference year.
    pub p: Option<f64>,
    pub ci_low: f64,
    pub ci_high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventStudy {
    pub reference_year: i32,
    pub rows: Vec<EventStudyRow>,
    pub fit: FitResult,
}

/// Same controls and fixed effects as the main model.
pub fn event_study_spec() -> ModelSpec {
    ModelSpec {
        label: "event_study".into(),
        description: "Event study: tariff x year, reference year omitted".into(),
        treatment: Treatment::EventTime,
        ..ModelSpec::main()
    }
}

/// Coefficient-by-year table, reference year included as a zero row.
///
/// Years whose term was dropped as collinear are left out of the table.
pub fn assemble_table(fit: &FitResult, event_years: &[i32], reference_year: i32) -> Vec<EventStudyRow> {
    let mut years: Vec<i32> = event_years.to_vec();
    years.push(reference_year);
    years.sort_unstable();
    years.dedup();

    years
        .into_iter()
        .filter_map(|year| {
            if year == reference_year {
                return Some(EventStudyRow {
                    year,
                    coef: 0.0,
                    se: 0.0,
                    p: None,
                    ci_low: 0.0,
                    ci_high: 0.0,
                });
            }
            let Some(c) = fit.coef(&event_term(year)) else {
                warn!(year, "event-time term not estimated");
                return None;
            };
            Some(EventStudyRow {
                year,
                coef: c.coef,
                se: c.se,
                p: Some(c.p),
                ci_low: c.ci_low,
                ci_high: c.ci_high,
            })
        })
        .collect()
}

pub fn run_event_study(vars: &VariableSet, critical_value: f64) -> Result<EventStudy, EstimationError> {
    let sample = build_sample(vars, &event_study_spec());
    let fit = fit(&sample, critical_value)?;
    let rows = assemble_table(&fit, &vars.event_years, vars.reference_year);
    Ok(EventStudy {
        reference_year: vars.reference_year,
        rows,
        fit,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimator::CoefEstimate;

    fn coef(name: &str, coef: f64, se: f64) -> CoefEstimate {
        CoefEstimate {
            name: name.into(),
            coef,
            se,
            t: coef / se,
            p: 0.2,
            ci_low: coef - 1.96 * se,
            ci_high: coef + 1.96 * se,
        }
    }

    fn fit_with(coefs: Vec<CoefEstimate>) -> FitResult {
        FitResult {
            label: "event_study".into(),
            coefficients: coefs,
            n_obs: 100,
            n_excluded: 0,
            n_firms: 10,
            n_clusters: 5,
            r2_within: 0.1,
            dropped: vec![],
            bootstrap: None,
        }
    }

    #[test]
    fn reference_year_is_a_zero_row() {
        let fit = fit_with(vec![
            coef("tariff_x_2016", 0.5, 0.25),
            coef("tariff_x_2018", -1.0, 0.5),
            coef("log_revenue", 3.0, 1.0),
        ]);
        let rows = assemble_table(&fit, &[2016, 2018], 2017);
        let years: Vec<i32> = rows.iter().map(|r| r.year).collect();
        assert_eq!(years, vec![2016, 2017, 2018]);
        let reference = &rows[1];
        assert_eq!((reference.coef, reference.se, reference.p), (0.0, 0.0, None));
        assert!((rows[2].ci_low - (-1.0 - 1.96 * 0.5)).abs() < 1e-12);
        assert_eq!(rows[0].p, Some(0.2));
    }

    #[test]
    fn unestimated_years_are_skipped() {
        let fit = fit_with(vec![coef("tariff_x_2016", 0.5, 0.25)]);
        let rows = assemble_table(&fit, &[2016, 2019], 2017);
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn spec_mirrors_main_model() {
        let spec = event_study_spec();
        let main = ModelSpec::main();
        assert_eq!(spec.fixed_effects, main.fixed_effects);
        assert!(spec.controls);
        assert_eq!(spec.treatment.tested(), None);
    }
}
