//! Model specifications and estimation samples.
//!
//! A [`ModelSpec`] names the outcome, the treatment terms, the controls, the
//! absorbed fixed effects and any sample restriction. [`build_sample`] turns a
//! [`VariableSet`] into the dense arrays the estimator works on, dropping rows
//! with any missing field and counting them.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use tariffpanel_core::domain::Cik;

use crate::fixed_effects::dense_codes;
use crate::variables::{RegressionRow, VariableSet};

pub const TREATMENT: &str = "tariff_x_post";
pub const PLACEBO_TREATMENT: &str = "tariff_x_post_placebo";
pub const CONTROLS: [&str; 3] = ["log_revenue", "rd_intensity", "leverage"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    EtrWinsorized,
    EtrWinsorizedAlt,
    EtrTrimWide,
    EtrTrimNarrow,
    ForeignProfitShare,
}

impl Outcome {
    pub fn column(self) -> &'static str {
        match self {
            Self::EtrWinsorized => "etr_winsorized",
            Self::EtrWinsorizedAlt => "etr_w5_95",
            Self::EtrTrimWide => "etr_trim_100",
            Self::EtrTrimNarrow => "etr_trim_60",
            Self::ForeignProfitShare => "foreign_profit_share_winsorized",
        }
    }

    fn value(self, row: &RegressionRow) -> Option<f64> {
        match self {
            Self::EtrWinsorized => row.etr_winsorized,
            Self::EtrWinsorizedAlt => row.etr_winsorized_alt,
            Self::EtrTrimWide => row.etr_trim_wide,
            Self::EtrTrimNarrow => row.etr_trim_narrow,
            Self::ForeignProfitShare => row.fps_winsorized,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Treatment {
    Post,
    PlaceboPost,
    /// One exposure × year interaction per non-reference year.
    EventTime,
}

impl Treatment {
    /// Regressor whose coefficient is the tested effect.
    pub fn tested(self) -> Option<&'static str> {
        match self {
            Self::Post => Some(TREATMENT),
            Self::PlaceboPost => Some(PLACEBO_TREATMENT),
            Self::EventTime => None,
        }
    }

    fn columns(self, vars: &VariableSet) -> Vec<String> {
        match self {
            Self::Post => vec![TREATMENT.to_string()],
            Self::PlaceboPost => vec![PLACEBO_TREATMENT.to_string()],
            Self::EventTime => vars.event_years.iter().map(|y| event_term(*y)).collect(),
        }
    }

    fn values(self, row: &RegressionRow) -> Vec<Option<f64>> {
        match self {
            Self::Post => vec![row.tariff_x_post],
            Self::PlaceboPost => vec![row.tariff_x_post_placebo],
            Self::EventTime => row.event_terms.clone(),
        }
    }
}

pub fn event_term(year: i32) -> String {
    format!("tariff_x_{year}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedEffect {
    Firm,
    Year,
    Sic1Year,
    Naics2Year,
}

impl FixedEffect {
    pub fn label(self) -> &'static str {
        match self {
            Self::Firm => "cik",
            Self::Year => "year",
            Self::Sic1Year => "sic1^year",
            Self::Naics2Year => "naics2^year",
        }
    }

    fn key(self, row: &RegressionRow) -> Option<String> {
        match self {
            Self::Firm => Some(row.cik.to_string()),
            Self::Year => Some(row.year.to_string()),
            Self::Sic1Year => Some(format!("{}^{}", row.sic1, row.year)),
            Self::Naics2Year => row.naics2.as_ref().map(|n| format!("{n}^{}", row.year)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleRestriction {
    Full,
    /// Keep years up to and including the given year.
    YearsThrough(i32),
    /// Keep firms observed in every panel year.
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub label: String,
    pub description: String,
    pub outcome: Outcome,
    pub treatment: Treatment,
    pub controls: bool,
    pub fixed_effects: Vec<FixedEffect>,
    /// Separate linear year trend per NAICS-2 sector.
    pub industry_trends: bool,
    pub restriction: SampleRestriction,
}

impl ModelSpec {
    /// Main specification: ETR on tariff × post with controls, firm and year FE.
    pub fn main() -> Self {
        Self {
            label: "main".into(),
            description: "Main: firm + year FE, controls".into(),
            outcome: Outcome::EtrWinsorized,
            treatment: Treatment::Post,
            controls: true,
            fixed_effects: vec![FixedEffect::Firm, FixedEffect::Year],
            industry_trends: false,
            restriction: SampleRestriction::Full,
        }
    }

    /// Formula-style rendering, e.g. `etr_winsorized ~ tariff_x_post + … | cik + year`.
    pub fn formula(&self, vars: &VariableSet) -> String {
        let mut rhs = self.treatment.columns(vars);
        if self.controls {
            rhs.extend(CONTROLS.iter().map(|c| c.to_string()));
        }
        if self.industry_trends {
            rhs.push("naics2:trend".into());
        }
        let fe: Vec<&str> = self.fixed_effects.iter().map(|f| f.label()).collect();
        format!("{} ~ {} | {}", self.outcome.column(), rhs.join(" + "), fe.join(" + "))
    }
}

/// Dense estimation arrays for one specification.
#[derive(Debug, Clone)]
pub struct RegressionSample {
    pub label: String,
    pub y: Vec<f64>,
    pub names: Vec<String>,
    /// One vector per regressor, aligned with `names`.
    pub x: Vec<Vec<f64>>,
    pub fixed_effects: Vec<Vec<usize>>,
    /// Dense cluster index per observation.
    pub clusters: Vec<usize>,
    pub n_clusters: usize,
    pub n_firms: usize,
    /// Rows inside the restriction dropped for a missing field.
    pub n_excluded: usize,
    pub tested: Option<String>,
}

impl RegressionSample {
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }
}

fn restricted<'a>(vars: &'a VariableSet, restriction: SampleRestriction) -> Vec<&'a RegressionRow> {
    match restriction {
        SampleRestriction::Full => vars.rows.iter().collect(),
        SampleRestriction::YearsThrough(last) => {
            vars.rows.iter().filter(|r| r.year <= last).collect()
        }
        SampleRestriction::Balanced => {
            let n_years = vars.rows.iter().map(|r| r.year).collect::<BTreeSet<_>>().len();
            let mut years_by_firm: BTreeMap<Cik, HashSet<i32>> = BTreeMap::new();
            for r in &vars.rows {
                years_by_firm.entry(r.cik).or_default().insert(r.year);
            }
            vars.rows
                .iter()
                .filter(|r| years_by_firm.get(&r.cik).map_or(0, HashSet::len) == n_years)
                .collect()
        }
    }
}

struct Candidate {
    y: f64,
    x: Vec<f64>,
    fe_keys: Vec<String>,
    cluster: usize,
    cik: Cik,
}

/// Assemble the estimation sample for `spec`.
pub fn build_sample(vars: &VariableSet, spec: &ModelSpec) -> RegressionSample {
    let rows = restricted(vars, spec.restriction);

    let mut names = spec.treatment.columns(vars);
    if spec.controls {
        names.extend(CONTROLS.iter().map(|c| c.to_string()));
    }

    // Trend columns are one per sector present in the restricted rows.
    let sectors: Vec<String> = if spec.industry_trends {
        rows.iter()
            .filter_map(|r| r.naics2.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    } else {
        Vec::new()
    };
    let base_year = rows.iter().map(|r| r.year).min().unwrap_or(0);
    names.extend(sectors.iter().map(|s| format!("trend_naics2_{s}")));

    let mut kept = Vec::with_capacity(rows.len());
    let mut n_excluded = 0usize;
    for r in &rows {
        match candidate(r, spec, &sectors, base_year) {
            Some(c) => kept.push(c),
            None => n_excluded += 1,
        }
    }

    let n = kept.len();
    let mut x = vec![Vec::with_capacity(n); names.len()];
    let mut y = Vec::with_capacity(n);
    for c in &kept {
        y.push(c.y);
        for (col, v) in x.iter_mut().zip(&c.x) {
            col.push(*v);
        }
    }

    let fixed_effects: Vec<Vec<usize>> = (0..spec.fixed_effects.len())
        .map(|d| {
            let keys: Vec<&str> = kept.iter().map(|c| c.fe_keys[d].as_str()).collect();
            dense_codes(&keys).0
        })
        .collect();

    let raw_clusters: Vec<usize> = kept.iter().map(|c| c.cluster).collect();
    let (clusters, n_clusters) = dense_codes(&raw_clusters);
    let n_firms = kept.iter().map(|c| c.cik).collect::<HashSet<_>>().len();

    debug!(
        spec = %spec.label,
        n_obs = n,
        n_excluded,
        n_clusters,
        n_firms,
        regressors = names.len(),
        "built regression sample"
    );

    RegressionSample {
        label: spec.label.clone(),
        y,
        names,
        x,
        fixed_effects,
        clusters,
        n_clusters,
        n_firms,
        n_excluded,
        tested: spec.treatment.tested().map(str::to_string),
    }
}

fn candidate(
    row: &RegressionRow,
    spec: &ModelSpec,
    sectors: &[String],
    base_year: i32,
) -> Option<Candidate> {
    let y = spec.outcome.value(row)?;
    let mut x = spec
        .treatment
        .values(row)
        .into_iter()
        .collect::<Option<Vec<f64>>>()?;
    if spec.controls {
        x.push(row.log_revenue?);
        x.push(row.rd_intensity?);
        x.push(row.leverage?);
    }
    if spec.industry_trends {
        let own = row.naics2.as_ref()?;
        let t = f64::from(row.year - base_year);
        x.extend(sectors.iter().map(|s| if s == own { t } else { 0.0 }));
    }
    let fe_keys = spec
        .fixed_effects
        .iter()
        .map(|fe| fe.key(row))
        .collect::<Option<Vec<String>>>()?;
    Some(Candidate {
        y,
        x,
        fe_keys,
        cluster: row.cluster?,
        cik: row.cik,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn row(cik: Cik, year: i32, naics3: &str) -> RegressionRow {
        let exposure = Some(2.0);
        RegressionRow {
            cik,
            year,
            naics3: Some(naics3.into()),
            naics2: Some(naics3[..2].into()),
            sic1: "3".into(),
            cluster: naics3.parse::<usize>().ok(),
            goods_producing: true,
            mean_tariff_increase: exposure,
            post: year >= 2019,
            tariff_x_post: Some(if year >= 2019 { 2.0 } else { 0.0 }),
            post_placebo: year >= 2017,
            tariff_x_post_placebo: Some(if year >= 2017 { 2.0 } else { 0.0 }),
            event_terms: vec![],
            log_revenue: Some(5.0),
            rd_intensity: Some(0.1),
            leverage: Some(0.2),
            effective_tax_rate: Some(20.0),
            etr_winsorized: Some(20.0),
            etr_winsorized_alt: Some(20.0),
            etr_trim_wide: Some(20.0),
            etr_trim_narrow: Some(20.0),
            fps_winsorized: Some(0.5),
        }
    }

    pub(crate) fn vars(rows: Vec<RegressionRow>) -> VariableSet {
        VariableSet {
            rows,
            event_years: vec![],
            reference_year: 2017,
            summary: Default::default(),
        }
    }

    #[test]
    fn missing_fields_are_excluded_and_counted() {
        let mut no_etr = row(2, 2019, "334");
        no_etr.etr_winsorized = None;
        let mut no_lev = row(3, 2019, "334");
        no_lev.leverage = None;
        let v = vars(vec![row(1, 2018, "334"), row(1, 2019, "334"), no_etr, no_lev]);

        let main = build_sample(&v, &ModelSpec::main());
        assert_eq!(main.n_obs(), 2);
        assert_eq!(main.n_excluded, 2);
        assert_eq!(main.names, vec!["tariff_x_post", "log_revenue", "rd_intensity", "leverage"]);

        // Without controls the missing leverage no longer matters.
        let mut no_controls = ModelSpec::main();
        no_controls.controls = false;
        let s = build_sample(&v, &no_controls);
        assert_eq!(s.n_obs(), 3);
        assert_eq!(s.n_excluded, 1);
    }

    #[test]
    fn balanced_restriction_keeps_complete_firms() {
        let v = vars(vec![
            row(1, 2018, "334"),
            row(1, 2019, "334"),
            row(2, 2019, "335"),
        ]);
        let mut spec = ModelSpec::main();
        spec.restriction = SampleRestriction::Balanced;
        let s = build_sample(&v, &spec);
        assert_eq!(s.n_obs(), 2);
        assert_eq!(s.n_firms, 1);
        // Dropped by restriction, not by missingness.
        assert_eq!(s.n_excluded, 0);
    }

    #[test]
    fn fixed_effect_and_cluster_codes_are_dense() {
        let v = vars(vec![
            row(10, 2018, "334"),
            row(10, 2019, "334"),
            row(20, 2018, "541"),
            row(20, 2019, "541"),
        ]);
        let s = build_sample(&v, &ModelSpec::main());
        assert_eq!(s.fixed_effects[0], vec![0, 0, 1, 1]);
        assert_eq!(s.fixed_effects[1], vec![0, 1, 0, 1]);
        assert_eq!(s.clusters, vec![0, 0, 1, 1]);
        assert_eq!(s.n_clusters, 2);
        assert_eq!(s.tested.as_deref(), Some("tariff_x_post"));
    }

    #[test]
    fn industry_trends_add_one_column_per_sector() {
        let v = vars(vec![
            row(1, 2016, "334"),
            row(1, 2018, "334"),
            row(2, 2016, "541"),
            row(2, 2018, "541"),
        ]);
        let mut spec = ModelSpec::main();
        spec.industry_trends = true;
        let s = build_sample(&v, &spec);
        let i33 = s.names.iter().position(|n| n == "trend_naics2_33").unwrap();
        let i54 = s.names.iter().position(|n| n == "trend_naics2_54").unwrap();
        assert_eq!(s.x[i33], vec![0.0, 2.0, 0.0, 0.0]);
        assert_eq!(s.x[i54], vec![0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn formula_rendering() {
        let v = vars(vec![]);
        assert_eq!(
            ModelSpec::main().formula(&v),
            "etr_winsorized ~ tariff_x_post + log_revenue + rd_intensity + leverage | cik + year"
        );
    }
}
