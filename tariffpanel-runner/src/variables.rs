//! Regression variable construction.
//!
//! A pure transform of the merged panel: treatment timing, the continuous
//! treatment interaction, controls, outcome winsorization and trimming,
//! event-time interactions, placebo timing, industry groupings and a dense
//! integer cluster code. Quantile thresholds are computed once over the whole
//! panel and applied to every row.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::info;

use tariffpanel_core::config::PipelineConfig;
use tariffpanel_core::domain::{Cik, MergedPanelRow};
use tariffpanel_core::stats::{finite, trim, winsorize, WinsorThresholds};

use crate::fixed_effects::dense_codes;

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionRow {
    pub cik: Cik,
    pub year: i32,

    pub naics3: Option<String>,
    pub naics2: Option<String>,
    /// First SIC digit; "0" when the SIC code is missing.
    pub sic1: String,
    /// Dense code over the sorted distinct NAICS-3 strings.
    pub cluster: Option<usize>,
    pub goods_producing: bool,

    pub mean_tariff_increase: Option<f64>,
    pub post: bool,
    pub tariff_x_post: Option<f64>,
    pub post_placebo: bool,
    pub tariff_x_post_placebo: Option<f64>,
    /// exposure × 1{year = y}, aligned with `VariableSet::event_years`.
    pub event_terms: Vec<Option<f64>>,

    pub log_revenue: Option<f64>,
    pub rd_intensity: Option<f64>,
    pub leverage: Option<f64>,

    pub effective_tax_rate: Option<f64>,
    pub etr_winsorized: Option<f64>,
    pub etr_winsorized_alt: Option<f64>,
    pub etr_trim_wide: Option<f64>,
    pub etr_trim_narrow: Option<f64>,
    pub fps_winsorized: Option<f64>,
}

/// Counts and thresholds describing one variable-construction pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VariableSummary {
    pub rows: usize,
    pub etr_p_low: Option<f64>,
    pub etr_p_high: Option<f64>,
    pub etr_alt_p_low: Option<f64>,
    pub etr_alt_p_high: Option<f64>,
    pub etr_trim_wide_obs: usize,
    pub etr_trim_narrow_obs: usize,
    pub n_clusters: usize,
    pub event_years: Vec<i32>,
    pub reference_year: i32,
}

#[derive(Debug, Clone)]
pub struct VariableSet {
    pub rows: Vec<RegressionRow>,
    /// Panel years with an interaction term; the reference year is excluded.
    pub event_years: Vec<i32>,
    pub reference_year: i32,
    pub summary: VariableSummary,
}

fn ratio(num: Option<f64>, den: Option<f64>) -> Option<f64> {
    finite(num? / den?)
}

fn interact(exposure: Option<f64>, on: bool) -> Option<f64> {
    exposure.map(|e| if on { e } else { 0.0 })
}

fn thresholds(t: Option<WinsorThresholds>) -> (Option<f64>, Option<f64>) {
    (t.map(|t| t.lower), t.map(|t| t.upper))
}

/// Derive every regression column from the merged panel.
pub fn construct_variables(panel: &[MergedPanelRow], config: &PipelineConfig) -> VariableSet {
    let reg = &config.regression;

    let etr: Vec<Option<f64>> = panel.iter().map(|r| r.effective_tax_rate).collect();
    let (etr_w, t_main) = winsorize(&etr, reg.etr_winsor);
    let (etr_w_alt, t_alt) = winsorize(&etr, reg.etr_winsor_alt);
    let etr_wide = trim(&etr, reg.etr_trim_wide);
    let etr_narrow = trim(&etr, reg.etr_trim_narrow);

    let years: BTreeSet<i32> = panel.iter().map(|r| r.year).collect();
    let event_years: Vec<i32> = years
        .into_iter()
        .filter(|&y| y != reg.event_reference_year)
        .collect();

    // Rows without an industry code stay uncoded.
    let naics3_keys: Vec<Option<String>> = panel.iter().map(|r| r.naics3.clone()).collect();
    let present: Vec<String> = naics3_keys.iter().flatten().cloned().collect();
    let (_, n_clusters) = dense_codes(&present);
    let (codes, _) = dense_codes(&naics3_keys);
    let offset = usize::from(naics3_keys.iter().any(Option::is_none));
    let (lo, hi) = reg.goods_producing;

    let rows: Vec<RegressionRow> = panel
        .iter()
        .enumerate()
        .map(|(i, r)| {
            let post = r.year >= reg.treatment_onset;
            let post_placebo = r.year >= reg.placebo_onset;
            let exposure = r.mean_tariff_increase;
            let naics3_num = r.naics3.as_deref().and_then(|s| s.parse::<u32>().ok());
            RegressionRow {
                cik: r.cik,
                year: r.year,
                naics3: r.naics3.clone(),
                naics2: r.naics_code.as_deref().and_then(|c| c.get(..2)).map(str::to_string),
                sic1: r
                    .sic_code
                    .as_ref()
                    .and_then(|c| c.chars().next())
                    .map_or_else(|| "0".to_string(), |c| c.to_string()),
                cluster: r.naics3.as_ref().map(|_| codes[i] - offset),
                goods_producing: naics3_num.is_some_and(|n| (lo..=hi).contains(&n)),
                mean_tariff_increase: exposure,
                post,
                tariff_x_post: interact(exposure, post),
                post_placebo,
                tariff_x_post_placebo: interact(exposure, post_placebo),
                event_terms: event_years.iter().map(|&y| interact(exposure, r.year == y)).collect(),
                log_revenue: r.total_revenue.and_then(|rev| finite((rev + 1.0).ln())),
                rd_intensity: ratio(r.rd_expense, r.total_revenue),
                leverage: ratio(r.total_debt, r.total_assets),
                effective_tax_rate: r.effective_tax_rate,
                etr_winsorized: etr_w[i],
                etr_winsorized_alt: etr_w_alt[i],
                etr_trim_wide: etr_wide[i],
                etr_trim_narrow: etr_narrow[i],
                fps_winsorized: r.foreign_profit_share_winsorized,
            }
        })
        .collect();

    let (etr_p_low, etr_p_high) = thresholds(t_main);
    let (etr_alt_p_low, etr_alt_p_high) = thresholds(t_alt);
    let summary = VariableSummary {
        rows: rows.len(),
        etr_p_low,
        etr_p_high,
        etr_alt_p_low,
        etr_alt_p_high,
        etr_trim_wide_obs: etr_wide.iter().flatten().count(),
        etr_trim_narrow_obs: etr_narrow.iter().flatten().count(),
        n_clusters,
        event_years: event_years.clone(),
        reference_year: reg.event_reference_year,
    };
    info!(
        rows = summary.rows,
        clusters = summary.n_clusters,
        etr_p_low = ?summary.etr_p_low,
        etr_p_high = ?summary.etr_p_high,
        trim_wide = summary.etr_trim_wide_obs,
        trim_narrow = summary.etr_trim_narrow_obs,
        "constructed regression variables"
    );

    VariableSet {
        rows,
        event_years,
        reference_year: reg.event_reference_year,
        summary,
    }
}
