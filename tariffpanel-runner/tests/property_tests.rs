//! Property tests for estimation invariants.
//!
//! Uses proptest to verify:
//! 1. Fixed-effects absorption: idempotent, and leaves zero group means
//! 2. Wild bootstrap: same seed, same p-value on arbitrary outcomes

use proptest::prelude::*;
use tariffpanel_core::config::BootstrapSettings;
use tariffpanel_runner::{estimate, wild_cluster_bootstrap, FixedEffectsSolver, RegressionSample};

const FIRMS: usize = 16;
const YEARS: usize = 4;

fn firm_year_groups() -> Vec<Vec<usize>> {
    let firms = (0..FIRMS * YEARS).map(|i| i / YEARS).collect();
    let years = (0..FIRMS * YEARS).map(|i| i % YEARS).collect();
    vec![firms, years]
}

fn sample(y: Vec<f64>) -> RegressionSample {
    let x: Vec<f64> = (0..FIRMS * YEARS)
        .map(|i| {
            let (f, t) = (i / YEARS, i % YEARS);
            if t >= 2 {
                (f % 5) as f64 + 1.0
            } else {
                0.0
            }
        })
        .collect();
    let [firms, years]: [Vec<usize>; 2] = firm_year_groups().try_into().unwrap();
    RegressionSample {
        label: "prop".into(),
        y,
        names: vec!["tariff_x_post".into()],
        x: vec![x],
        clusters: firms.iter().map(|f| f / 2).collect(),
        fixed_effects: vec![firms, years],
        n_clusters: FIRMS / 2,
        n_firms: FIRMS,
        n_excluded: 0,
        tested: Some("tariff_x_post".into()),
    }
}

// ── Strategies ───────────────────────────────────────────────────────

fn arb_outcome() -> impl Strategy<Value = Vec<f64>> {
    prop::collection::vec(-50.0..50.0_f64, FIRMS * YEARS)
}

// ── 1. Fixed-effects absorption ──────────────────────────────────────

proptest! {
    #[test]
    fn absorption_is_idempotent(v in arb_outcome()) {
        let solver = FixedEffectsSolver::new(&firm_year_groups()).unwrap();
        let once = solver.partial_out(&v).unwrap();
        let twice = solver.partial_out(&once).unwrap();
        for (a, b) in once.iter().zip(&twice) {
            prop_assert!((a - b).abs() < 1e-6, "{} vs {}", a, b);
        }
    }

    #[test]
    fn absorbed_vector_has_zero_group_means(v in arb_outcome()) {
        let groups = firm_year_groups();
        let solver = FixedEffectsSolver::new(&groups).unwrap();
        let out = solver.partial_out(&v).unwrap();
        for (dim, n_levels) in [(0usize, FIRMS), (1, YEARS)] {
            let mut sums = vec![0.0; n_levels];
            for (value, &g) in out.iter().zip(&groups[dim]) {
                sums[g] += value;
            }
            for s in sums {
                prop_assert!(s.abs() < 1e-6, "dimension {} sum {}", dim, s);
            }
        }
    }
}

// ── 2. Wild bootstrap determinism ────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn bootstrap_reproduces_under_seed(y in arb_outcome(), seed in any::<u64>()) {
        let est = estimate(&sample(y)).unwrap();
        let settings = BootstrapSettings { replications: 64, seed };
        let a = wild_cluster_bootstrap(&est, &settings).unwrap();
        let b = wild_cluster_bootstrap(&est, &settings).unwrap();
        prop_assert!(!a.enumerated);
        prop_assert_eq!(a.p_value.to_bits(), b.p_value.to_bits());
        prop_assert_eq!(a.t_stat.to_bits(), b.t_stat.to_bits());
        prop_assert!((0.0..=1.0).contains(&a.p_value));
    }
}
