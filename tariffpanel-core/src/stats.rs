//! Quantiles, winsorization and trimming over columns with missing values.
//!
//! Quantiles use linear interpolation between order statistics (the same
//! convention as the default in most statistics packages), computed once over
//! all non-missing finite values and then applied uniformly.

use crate::config::{Bounds, QuantilePair};

/// Quantile `q` in [0, 1] of an ascending slice, by linear interpolation.
///
/// Returns `None` for an empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        1 => Some(sorted[0]),
        _ => {
            let rank = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = rank - lo as f64;
            Some(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
        }
    }
}

/// Ascending copy of the finite, non-missing values of a column.
pub fn sorted_present(values: &[Option<f64>]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().flatten().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Thresholds produced by a winsorization pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WinsorThresholds {
    pub lower: f64,
    pub upper: f64,
}

impl WinsorThresholds {
    pub fn compute(values: &[Option<f64>], q: QuantilePair) -> Option<Self> {
        let sorted = sorted_present(values);
        Some(Self {
            lower: quantile_sorted(&sorted, q.lower)?,
            upper: quantile_sorted(&sorted, q.upper)?,
        })
    }

    pub fn clip(&self, x: f64) -> f64 {
        x.clamp(self.lower, self.upper)
    }

    pub fn is_outside(&self, x: f64) -> bool {
        x < self.lower || x > self.upper
    }
}

/// Clip a column at its empirical quantiles. Missing stays missing.
pub fn winsorize(
    values: &[Option<f64>],
    q: QuantilePair,
) -> (Vec<Option<f64>>, Option<WinsorThresholds>) {
    match WinsorThresholds::compute(values, q) {
        Some(t) => (
            values
                .iter()
                .map(|v| v.filter(|x| x.is_finite()).map(|x| t.clip(x)))
                .collect(),
            Some(t),
        ),
        None => (vec![None; values.len()], None),
    }
}

/// Null out values strictly outside `bounds`. Nothing is clipped.
pub fn trim(values: &[Option<f64>], bounds: Bounds) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| v.filter(|x| (bounds.min..=bounds.max).contains(x)))
        .collect()
}

/// `Some(x)` only when `x` is finite.
pub fn finite(x: f64) -> Option<f64> {
    x.is_finite().then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1_P99: QuantilePair = QuantilePair {
        lower: 0.01,
        upper: 0.99,
    };

    #[test]
    fn quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_eq!(quantile_sorted(&v, 0.0), Some(1.0));
        assert_eq!(quantile_sorted(&v, 1.0), Some(4.0));
        assert!((quantile_sorted(&v, 0.5).unwrap() - 2.5).abs() < 1e-12);
        assert_eq!(quantile_sorted(&[], 0.5), None);
        assert_eq!(quantile_sorted(&[7.0], 0.99), Some(7.0));
    }

    #[test]
    fn winsorize_clips_tails_and_keeps_missing() {
        let mut values: Vec<Option<f64>> = (0..=100).map(|i| Some(i as f64)).collect();
        values.push(None);
        values.push(Some(1_000.0));
        let (w, t) = winsorize(&values, P1_P99);
        let t = t.unwrap();
        assert!(t.upper < 1_000.0);
        assert_eq!(w[101], None);
        assert_eq!(w[102], Some(t.upper));
        assert_eq!(w[50], Some(50.0));
    }

    #[test]
    fn winsorize_all_missing() {
        let (w, t) = winsorize(&[None, None], P1_P99);
        assert_eq!(w, vec![None, None]);
        assert!(t.is_none());
    }

    #[test]
    fn trim_drops_rather_than_clips() {
        let bounds = Bounds {
            min: 0.0,
            max: 100.0,
        };
        let out = trim(&[Some(150.0), Some(100.0), Some(0.0), Some(-0.1), None], bounds);
        assert_eq!(out, vec![None, Some(100.0), Some(0.0), None, None]);
    }

    #[test]
    fn finite_filters_nan_and_inf() {
        assert_eq!(finite(1.5), Some(1.5));
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::INFINITY), None);
    }
}
