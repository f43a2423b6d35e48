//! Two-way fixed-effects OLS with cluster-robust (CRV1) inference.
//!
//! Fixed effects are absorbed from the outcome and every regressor, collinear
//! columns are dropped in order, and the remaining system is solved with
//! nalgebra. The sandwich variance uses the small-sample factor
//! `G/(G−1) · (N−1)/(N−K)` and p-values come from Student t with `G−1` df.
//! `K` counts the explicit regressors that survive the collinearity screen;
//! absorbed fixed-effect levels are not added, nested in the cluster or not.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::distributions::t_two_sided_p;
use crate::fixed_effects::FixedEffectsSolver;
use crate::sample::RegressionSample;
use crate::wild_bootstrap::BootstrapOutcome;

/// Residual norm, relative to the raw column norm, below which a regressor
/// counts as collinear.
const COLLINEARITY_TOL: f64 = 1e-7;

#[derive(Debug, Error)]
pub enum EstimationError {
    #[error("{label}: no observations left after exclusions")]
    EmptySample { label: String },

    #[error("{label}: {n_clusters} cluster(s), at least 2 required")]
    TooFewClusters { label: String, n_clusters: usize },

    #[error("{label}: {n_obs} observations cannot identify {n_regressors} regressors")]
    DegreesOfFreedom {
        label: String,
        n_obs: usize,
        n_regressors: usize,
    },

    #[error("{label}: tested regressor {name} is collinear with the fixed effects")]
    TreatmentDropped { label: String, name: String },

    #[error("{label}: normal equations are singular")]
    Singular { label: String },

    #[error("fixed-effects absorption failed: {0}")]
    FixedEffects(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefEstimate {
    pub name: String,
    pub coef: f64,
    pub se: f64,
    pub t: f64,
    pub p: f64,
    pub ci_low: f64,
    pub ci_high: f64,
}

/// Everything reported for one fitted specification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub label: String,
    pub coefficients: Vec<CoefEstimate>,
    pub n_obs: usize,
    pub n_excluded: usize,
    pub n_firms: usize,
    pub n_clusters: usize,
    pub r2_within: f64,
    /// Regressors removed as collinear after absorption.
    pub dropped: Vec<String>,
    pub bootstrap: Option<BootstrapOutcome>,
}

impl FitResult {
    pub fn coef(&self, name: &str) -> Option<&CoefEstimate> {
        self.coefficients.iter().find(|c| c.name == name)
    }
}

/// OLS on the absorbed design.
#[derive(Debug, Clone)]
pub struct OlsFit {
    pub names: Vec<String>,
    pub x: DMatrix<f64>,
    pub y: DVector<f64>,
    pub xtx_inv: DMatrix<f64>,
    pub beta: DVector<f64>,
    pub residuals: DVector<f64>,
    pub clusters: Vec<usize>,
    pub n_clusters: usize,
}

impl OlsFit {
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_regressors(&self) -> usize {
        self.x.ncols()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// `G/(G−1) · (N−1)/(N−K)`, with `K` the explicit regressors only.
    pub fn small_sample_factor(&self) -> f64 {
        let g = self.n_clusters as f64;
        let n = self.n_obs() as f64;
        let k = self.n_regressors() as f64;
        g / (g - 1.0) * (n - 1.0) / (n - k)
    }

    /// Per-cluster score sums `Σ_{i∈g} x_i e_i` as a G × K matrix.
    pub fn cluster_scores(&self, residuals: &DVector<f64>) -> DMatrix<f64> {
        let k = self.n_regressors();
        let mut scores = DMatrix::zeros(self.n_clusters, k);
        for (i, &g) in self.clusters.iter().enumerate() {
            let e = residuals[i];
            for j in 0..k {
                scores[(g, j)] += self.x[(i, j)] * e;
            }
        }
        scores
    }

    /// CRV1 sandwich `c · (X'X)⁻¹ (Σ_g s_g s_g') (X'X)⁻¹`.
    pub fn crv1_vcov(&self) -> DMatrix<f64> {
        let scores = self.cluster_scores(&self.residuals);
        let meat = scores.transpose() * &scores;
        &self.xtx_inv * meat * &self.xtx_inv * self.small_sample_factor()
    }

    /// Within R²: share of the absorbed outcome variance explained.
    pub fn r2_within(&self) -> f64 {
        let sst = self.y.norm_squared();
        if sst <= 0.0 {
            return f64::NAN;
        }
        1.0 - self.residuals.norm_squared() / sst
    }
}

/// Solve `y = Xβ + e` by the normal equations.
pub fn least_squares(
    label: &str,
    x: DMatrix<f64>,
    y: DVector<f64>,
) -> Result<(DMatrix<f64>, DVector<f64>, DVector<f64>), EstimationError> {
    let xtx = x.transpose() * &x;
    let xtx_inv = xtx
        .cholesky()
        .map(|c| c.inverse())
        .ok_or_else(|| EstimationError::Singular {
            label: label.to_string(),
        })?;
    let beta = &xtx_inv * (x.transpose() * &y);
    let residuals = &y - &x * &beta;
    Ok((xtx_inv, beta, residuals))
}

/// Flags, in column order, the absorbed columns that add a new direction.
///
/// Modified Gram-Schmidt against the columns already kept; a column whose
/// remaining norm is below `tol` times its norm before absorption is dropped.
pub fn independent_columns(absorbed: &[Vec<f64>], raw_norms: &[f64], tol: f64) -> Vec<bool> {
    let mut basis: Vec<Vec<f64>> = Vec::new();
    absorbed
        .iter()
        .zip(raw_norms)
        .map(|(col, &raw)| {
            let mut r = col.clone();
            for q in &basis {
                let proj: f64 = q.iter().zip(&r).map(|(a, b)| a * b).sum();
                for (ri, qi) in r.iter_mut().zip(q) {
                    *ri -= proj * qi;
                }
            }
            let norm = r.iter().map(|v| v * v).sum::<f64>().sqrt();
            if raw <= 0.0 || norm <= tol * raw {
                return false;
            }
            basis.push(r.into_iter().map(|v| v / norm).collect());
            true
        })
        .collect()
}

/// A fitted specification before summary statistics are attached.
#[derive(Debug, Clone)]
pub struct Estimation {
    pub label: String,
    pub ols: OlsFit,
    pub dropped: Vec<String>,
    pub n_excluded: usize,
    pub n_firms: usize,
    /// Column of the tested regressor in `ols`.
    pub tested: Option<usize>,
}

fn norm(v: &[f64]) -> f64 {
    v.iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Absorb fixed effects and fit OLS on the kept regressors.
pub fn estimate(sample: &RegressionSample) -> Result<Estimation, EstimationError> {
    let label = sample.label.clone();
    let n = sample.n_obs();
    if n == 0 {
        return Err(EstimationError::EmptySample { label });
    }
    if sample.n_clusters < 2 {
        return Err(EstimationError::TooFewClusters {
            label,
            n_clusters: sample.n_clusters,
        });
    }

    let solver = FixedEffectsSolver::new(&sample.fixed_effects)?;
    let y = solver.partial_out(&sample.y)?;
    let absorbed = sample
        .x
        .iter()
        .map(|col| solver.partial_out(col))
        .collect::<Result<Vec<_>, _>>()?;

    let raw_norms: Vec<f64> = sample.x.iter().map(|c| norm(c)).collect();
    let keep = independent_columns(&absorbed, &raw_norms, COLLINEARITY_TOL);

    let mut names = Vec::new();
    let mut dropped = Vec::new();
    let mut columns = Vec::new();
    for ((name, col), k) in sample.names.iter().zip(absorbed).zip(&keep) {
        if *k {
            names.push(name.clone());
            columns.push(col);
        } else {
            dropped.push(name.clone());
        }
    }
    if !dropped.is_empty() {
        warn!(spec = %label, dropped = ?dropped, "dropped collinear regressors");
    }
    if let Some(t) = &sample.tested {
        if dropped.contains(t) {
            return Err(EstimationError::TreatmentDropped {
                label,
                name: t.clone(),
            });
        }
    }
    if names.is_empty() || n <= names.len() {
        return Err(EstimationError::DegreesOfFreedom {
            label,
            n_obs: n,
            n_regressors: names.len(),
        });
    }

    let x = DMatrix::from_fn(n, columns.len(), |i, j| columns[j][i]);
    let y = DVector::from_vec(y);
    let (xtx_inv, beta, residuals) = least_squares(&label, x.clone(), y.clone())?;

    let tested = sample
        .tested
        .as_ref()
        .and_then(|t| names.iter().position(|n| n == t));
    debug!(spec = %label, n_obs = n, k = names.len(), fe = ?solver.levels(), "fitted");

    Ok(Estimation {
        label,
        ols: OlsFit {
            names,
            x,
            y,
            xtx_inv,
            beta,
            residuals,
            clusters: sample.clusters.clone(),
            n_clusters: sample.n_clusters,
        },
        dropped,
        n_excluded: sample.n_excluded,
        n_firms: sample.n_firms,
        tested,
    })
}

impl Estimation {
    /// Coefficients with CRV1 standard errors and Wald intervals.
    pub fn coefficients(&self, critical_value: f64) -> Vec<CoefEstimate> {
        let vcov = self.ols.crv1_vcov();
        let df = (self.ols.n_clusters - 1) as f64;
        self.ols
            .names
            .iter()
            .enumerate()
            .map(|(j, name)| {
                let coef = self.ols.beta[j];
                let se = vcov[(j, j)].max(0.0).sqrt();
                let t = coef / se;
                CoefEstimate {
                    name: name.clone(),
                    coef,
                    se,
                    t,
                    p: t_two_sided_p(t, df),
                    ci_low: coef - critical_value * se,
                    ci_high: coef + critical_value * se,
                }
            })
            .collect()
    }

    pub fn to_result(&self, critical_value: f64) -> FitResult {
        FitResult {
            label: self.label.clone(),
            coefficients: self.coefficients(critical_value),
            n_obs: self.ols.n_obs(),
            n_excluded: self.n_excluded,
            n_firms: self.n_firms,
            n_clusters: self.ols.n_clusters,
            r2_within: self.ols.r2_within(),
            dropped: self.dropped.clone(),
            bootstrap: None,
        }
    }
}

/// Absorb, fit and summarize in one step.
pub fn fit(sample: &RegressionSample, critical_value: f64) -> Result<FitResult, EstimationError> {
    Ok(estimate(sample)?.to_result(critical_value))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Balanced 4 clusters × 2 firms × 4 years, y = 2·x + firm + year + noise.
    pub(crate) fn toy_sample() -> RegressionSample {
        let mut y = Vec::new();
        let mut x = Vec::new();
        let mut firms = Vec::new();
        let mut years = Vec::new();
        let mut clusters = Vec::new();
        let noise = [0.3, -0.1, 0.2, -0.4, 0.1, 0.0, -0.2, 0.5];
        for f in 0..8usize {
            for t in 0..4usize {
                let treat = if t >= 2 { (f % 4) as f64 + 1.0 } else { 0.0 };
                let firm_effect = f as f64 * 0.7;
                let year_effect = t as f64 * 0.3;
                let e = noise[(f + t) % 8] * if t % 2 == 0 { 1.0 } else { -1.0 };
                y.push(2.0 * treat + firm_effect + year_effect + e);
                x.push(treat);
                firms.push(f);
                years.push(t);
                clusters.push(f / 2);
            }
        }
        RegressionSample {
            label: "toy".into(),
            y,
            names: vec!["tariff_x_post".into()],
            x: vec![x],
            fixed_effects: vec![firms, years],
            clusters,
            n_clusters: 4,
            n_firms: 8,
            n_excluded: 0,
            tested: Some("tariff_x_post".into()),
        }
    }

    #[test]
    fn recovers_slope_under_two_way_effects() {
        let r = fit(&toy_sample(), 1.96).unwrap();
        let b = r.coef("tariff_x_post").unwrap();
        assert!((b.coef - 2.0).abs() < 0.3, "coef {}", b.coef);
        assert!(b.se > 0.0);
        assert!((b.ci_high - b.ci_low - 2.0 * 1.96 * b.se).abs() < 1e-12);
        assert_eq!(r.n_obs, 32);
        assert_eq!(r.n_clusters, 4);
        assert!(r.r2_within > 0.0 && r.r2_within <= 1.0);
    }

    #[test]
    fn exact_fit_without_noise() {
        let mut s = toy_sample();
        s.y = s
            .x[0]
            .iter()
            .zip(&s.fixed_effects[0])
            .zip(&s.fixed_effects[1])
            .map(|((x, &f), &t)| -1.5 * x + f as f64 + 0.1 * t as f64)
            .collect();
        let r = fit(&s, 1.96).unwrap();
        assert!((r.coefficients[0].coef + 1.5).abs() < 1e-8);
    }

    #[test]
    fn small_sample_factor_formula() {
        let est = estimate(&toy_sample()).unwrap();
        let expected = 4.0 / 3.0 * 31.0 / 31.0;
        assert!((est.ols.small_sample_factor() - expected).abs() < 1e-12);
    }

    #[test]
    fn small_sample_factor_ignores_absorbed_levels() {
        let two_way = estimate(&toy_sample()).unwrap();
        let mut firm_only = toy_sample();
        firm_only.fixed_effects.truncate(1);
        let firm_only = estimate(&firm_only).unwrap();
        assert_eq!(two_way.ols.n_regressors(), 1);
        assert!((two_way.ols.small_sample_factor() - firm_only.ols.small_sample_factor()).abs() < 1e-15);
    }

    #[test]
    fn crv1_matches_hand_computation_without_fixed_effects() {
        // y on a single regressor, no FE, two clusters.
        let s = RegressionSample {
            label: "hand".into(),
            y: vec![1.0, 2.0, 2.0, 5.0],
            names: vec!["x".into()],
            x: vec![vec![1.0, 1.0, 2.0, 2.0]],
            fixed_effects: vec![],
            clusters: vec![0, 0, 1, 1],
            n_clusters: 2,
            n_firms: 4,
            n_excluded: 0,
            tested: None,
        };
        let est = estimate(&s).unwrap();
        // β = Σxy / Σx² = (1 + 2 + 4 + 10) / 10 = 1.7
        assert!((est.ols.beta[0] - 1.7).abs() < 1e-12);
        // e = (-0.7, 0.3, -1.4, 1.6); s_0 = -0.4, s_1 = 0.4
        // V = c · 0.32 / 100, c = 2 · 3 / 3 = 2
        let se = est.coefficients(1.96)[0].se;
        assert!((se - (2.0 * 0.32f64 / 100.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn collinear_control_is_dropped_and_reported() {
        let mut s = toy_sample();
        let dup: Vec<f64> = s.x[0].iter().map(|v| 3.0 * v).collect();
        // A firm-invariant column is absorbed entirely by the firm effect.
        let firm_const: Vec<f64> = s.fixed_effects[0].iter().map(|&f| f as f64 + 1.0).collect();
        s.names.push("scaled_copy".into());
        s.x.push(dup);
        s.names.push("firm_constant".into());
        s.x.push(firm_const);
        let r = fit(&s, 1.96).unwrap();
        assert_eq!(r.dropped, vec!["scaled_copy", "firm_constant"]);
        assert_eq!(r.coefficients.len(), 1);
    }

    #[test]
    fn dropping_the_tested_regressor_is_an_error() {
        let mut s = toy_sample();
        s.x[0] = s.fixed_effects[1].iter().map(|&t| t as f64).collect();
        assert!(matches!(
            estimate(&s),
            Err(EstimationError::TreatmentDropped { .. })
        ));
    }

    #[test]
    fn degenerate_samples_are_rejected() {
        let mut s = toy_sample();
        s.clusters = vec![0; 32];
        s.n_clusters = 1;
        assert!(matches!(estimate(&s), Err(EstimationError::TooFewClusters { .. })));

        let empty = RegressionSample {
            y: vec![],
            x: vec![vec![]],
            fixed_effects: vec![vec![], vec![]],
            clusters: vec![],
            ..toy_sample()
        };
        assert!(matches!(estimate(&empty), Err(EstimationError::EmptySample { .. })));
    }
}
