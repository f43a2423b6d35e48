//! Cross-source merge engine.
//!
//! Joins the SEC income panel with vendor static attributes, vendor annual
//! financials and industry tariff exposure. Every join reports its match rate,
//! and both left joins are cardinality-preserving: a right-side key that
//! appears more than once aborts the merge instead of multiplying rows.

use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::hash::Hash;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::crosswalk::{resolve_universe, Crosswalk, JoinStats};
use crate::domain::{Cik, FirmYearRecord, MergedPanelRow, TariffExposure, VendorFirm, VendorYear};
use crate::stats::WinsorThresholds;
use crate::vendor::VendorData;

#[derive(Debug, Error)]
pub enum MergeError {
    #[error(
        "{step}: join changed row count {before} -> {after}; key {key} is not unique on the right"
    )]
    Cardinality {
        step: String,
        before: usize,
        after: usize,
        key: String,
    },

    #[error("merged panel has duplicate firm-year (cik {cik}, year {year})")]
    DuplicateFirmYear { cik: Cik, year: i32 },

    #[error("merged panel row (cik {cik}) has year {year} outside {min}..={max}")]
    YearOutOfRange { cik: Cik, year: i32, min: i32, max: i32 },

    #[error("merged panel row (cik {cik}, year {year}) has no ticker")]
    MissingIdentifier { cik: Cik, year: i32 },
}

/// SEC income record after unit scaling and share winsorization.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaledIncome {
    pub record: FirmYearRecord,
    pub fps_winsorized: Option<f64>,
    pub fps_extreme: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub income_rows_in: usize,
    pub income_out_of_range: usize,
    pub income_duplicates_dropped: usize,
    pub fps_p_low: Option<f64>,
    pub fps_p_high: Option<f64>,
    pub fps_extreme: usize,
    pub vendor_firms_collapsed: usize,
    pub sec_firms_lost: usize,
    pub joins: Vec<JoinStats>,
    pub rows_out: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub rows: Vec<MergedPanelRow>,
    pub report: MergeReport,
}

pub struct MergeInputs<'a> {
    pub income: &'a [FirmYearRecord],
    pub crosswalk: &'a Crosswalk,
    pub vendor: &'a VendorData,
    pub tariffs: &'a [TariffExposure],
}

/// Year filter, (cik, year) dedup keeping the first row, unit scaling of the
/// income columns and p1/p99 winsorization of the foreign profit share.
pub fn clean_income_panel(
    records: &[FirmYearRecord],
    config: &PipelineConfig,
    report: &mut MergeReport,
) -> Vec<ScaledIncome> {
    report.income_rows_in = records.len();
    let scale = config.merge.income_scale;
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(records.len());
    for r in records {
        if !config.years.contains(r.year) {
            report.income_out_of_range += 1;
            continue;
        }
        if !seen.insert((r.cik, r.year)) {
            report.income_duplicates_dropped += 1;
            continue;
        }
        let mut r = r.clone();
        for v in [
            &mut r.foreign_pretax_income,
            &mut r.domestic_pretax_income,
            &mut r.total_pretax_income,
        ] {
            *v = v.map(|x| x / scale);
        }
        kept.push(r);
    }
    if report.income_duplicates_dropped > 0 {
        warn!(dropped = report.income_duplicates_dropped, "duplicate cik-year income rows dropped");
    }

    let shares: Vec<Option<f64>> = kept.iter().map(|r| r.foreign_profit_share).collect();
    let thresholds = WinsorThresholds::compute(&shares, config.merge.fps_winsor);
    report.fps_p_low = thresholds.map(|t| t.lower);
    report.fps_p_high = thresholds.map(|t| t.upper);

    let out: Vec<ScaledIncome> = kept
        .into_iter()
        .map(|record| {
            let (fps_winsorized, fps_extreme) = match (record.foreign_profit_share, thresholds) {
                (Some(x), Some(t)) => (Some(t.clip(x)), t.is_outside(x)),
                _ => (None, false),
            };
            ScaledIncome {
                record,
                fps_winsorized,
                fps_extreme,
            }
        })
        .collect();
    report.fps_extreme = out.iter().filter(|s| s.fps_extreme).count();
    info!(
        rows = out.len(),
        extreme = report.fps_extreme,
        p_low = ?report.fps_p_low,
        p_high = ?report.fps_p_high,
        "cleaned income panel"
    );
    out
}

/// Left join that must not change the row count.
///
/// Returns, for each left row, its unique right match (if any). A key that
/// occurs more than once on the right and is hit from the left is a
/// many-to-many collision and fails the join.
pub fn left_join_unique<'r, L, R, K>(
    step: &str,
    left: &[L],
    right: &'r [R],
    left_key: impl Fn(&L) -> Option<K>,
    right_key: impl Fn(&R) -> Option<K>,
) -> Result<(Vec<Option<&'r R>>, JoinStats), MergeError>
where
    K: Hash + Eq + Display,
{
    let mut index: HashMap<K, Vec<&'r R>> = HashMap::new();
    for r in right {
        if let Some(k) = right_key(r) {
            index.entry(k).or_default().push(r);
        }
    }

    let mut after = 0usize;
    let mut offending: Option<String> = None;
    let mut matches = Vec::with_capacity(left.len());
    for l in left {
        let hits = left_key(l).and_then(|k| index.get(&k).map(|v| (k, v)));
        match hits {
            Some((k, v)) => {
                after += v.len();
                if v.len() > 1 && offending.is_none() {
                    offending = Some(k.to_string());
                }
                matches.push(v.first().copied());
            }
            None => {
                after += 1;
                matches.push(None);
            }
        }
    }

    if after != left.len() {
        return Err(MergeError::Cardinality {
            step: step.to_string(),
            before: left.len(),
            after,
            key: offending.unwrap_or_default(),
        });
    }

    let matched = matches.iter().filter(|m| m.is_some()).count();
    let stats = JoinStats::new(step, left.len(), matched);
    stats.log();
    Ok((matches, stats))
}

/// Final output invariants; any violation halts the pipeline.
pub fn check_invariants(rows: &[MergedPanelRow], config: &PipelineConfig) -> Result<(), MergeError> {
    let mut seen = HashSet::with_capacity(rows.len());
    for r in rows {
        if !seen.insert((r.cik, r.year)) {
            return Err(MergeError::DuplicateFirmYear {
                cik: r.cik,
                year: r.year,
            });
        }
        if !config.years.contains(r.year) {
            return Err(MergeError::YearOutOfRange {
                cik: r.cik,
                year: r.year,
                min: config.years.min,
                max: config.years.max,
            });
        }
        if r.clean_ticker.trim().is_empty() {
            return Err(MergeError::MissingIdentifier {
                cik: r.cik,
                year: r.year,
            });
        }
    }
    Ok(())
}

fn assemble(
    income: &ScaledIncome,
    firm: &VendorFirm,
    name_fallback: Option<&String>,
    ts: Option<&VendorYear>,
    tariff: Option<&TariffExposure>,
) -> MergedPanelRow {
    let r = &income.record;
    let ts_val = |f: fn(&VendorYear) -> Option<f64>| ts.and_then(f);
    let tariff_val = |f: fn(&TariffExposure) -> Option<f64>| tariff.and_then(f);
    MergedPanelRow {
        cik: r.cik,
        clean_ticker: firm.clean_ticker.clone(),
        company_name: r.company_name.clone().or_else(|| name_fallback.cloned()),
        company_name_vendor: firm.company_name_vendor.clone(),
        year: r.year,
        sic_code: firm.sic_code.clone(),
        naics_code: firm.naics_code.clone(),
        naics3: firm.naics3.clone(),
        icb_subsector: firm.icb_subsector.clone(),
        market_cap: firm.market_cap,
        price: firm.price,
        foreign_pretax_income: r.foreign_pretax_income,
        domestic_pretax_income: r.domestic_pretax_income,
        total_pretax_income: r.total_pretax_income,
        foreign_profit_share: r.foreign_profit_share,
        foreign_profit_share_winsorized: income.fps_winsorized,
        fps_extreme: income.fps_extreme,
        total_revenue: ts_val(|t| t.total_revenue),
        pretax_income_vendor: ts_val(|t| t.pretax_income_vendor),
        rd_expense: ts_val(|t| t.rd_expense),
        total_assets: ts_val(|t| t.total_assets),
        total_debt: ts_val(|t| t.total_debt),
        capital_expenditure: ts_val(|t| t.capital_expenditure),
        effective_tax_rate: ts_val(|t| t.effective_tax_rate),
        operating_expenses: ts_val(|t| t.operating_expenses),
        sector_name: tariff.and_then(|t| t.sector_name.clone()),
        n_products_targeted: tariff_val(|t| t.n_products_targeted),
        n_varieties_targeted: tariff_val(|t| t.n_varieties_targeted),
        mean_tariff_increase: tariff_val(|t| t.mean_tariff_increase),
        sd_tariff_increase: tariff_val(|t| t.sd_tariff_increase),
    }
}

/// Run every join and the final invariant check.
pub fn merge_panel(inputs: &MergeInputs<'_>, config: &PipelineConfig) -> Result<MergeOutcome, MergeError> {
    let mut report = MergeReport::default();

    let income = clean_income_panel(inputs.income, config, &mut report);

    // Vendor firms → CIK, one firm per CIK (first listed wins).
    let (resolved, stats) = resolve_universe(&inputs.vendor.firms, inputs.crosswalk);
    report.joins.push(stats);
    let mut firm_by_cik: HashMap<Cik, &VendorFirm> = HashMap::new();
    for (cik, firm) in &resolved {
        if firm_by_cik.contains_key(cik) {
            report.vendor_firms_collapsed += 1;
        } else {
            firm_by_cik.insert(*cik, firm);
        }
    }
    if report.vendor_firms_collapsed > 0 {
        warn!(
            collapsed = report.vendor_firms_collapsed,
            "vendor share classes mapping to an already-seen CIK were dropped"
        );
    }

    // Inner join on CIK.
    let joined: Vec<(&ScaledIncome, &VendorFirm)> = income
        .iter()
        .filter_map(|s| firm_by_cik.get(&s.record.cik).map(|f| (s, *f)))
        .collect();
    let stats = JoinStats::new("income_x_vendor_firms", income.len(), joined.len());
    stats.log();
    report.joins.push(stats);
    let firms_before: HashSet<Cik> = income.iter().map(|s| s.record.cik).collect();
    let firms_after: HashSet<Cik> = joined.iter().map(|(s, _)| s.record.cik).collect();
    report.sec_firms_lost = firms_before.len() - firms_after.len();

    // Vendor annual financials on (ticker, year).
    let (ts_matches, stats) = left_join_unique(
        "vendor_timeseries",
        &joined,
        &inputs.vendor.years,
        |(s, f)| Some(TickerYear(f.clean_ticker.clone(), s.record.year)),
        |v| Some(TickerYear(v.clean_ticker.clone(), v.year)),
    )?;
    report.joins.push(stats);

    // Tariff exposure on the truncated industry code.
    let (tariff_matches, stats) = left_join_unique(
        "tariff_exposure",
        &joined,
        inputs.tariffs,
        |(_, f)| f.naics3.clone(),
        |t| Some(t.naics3.clone()),
    )?;
    report.joins.push(stats);

    let names = inputs.crosswalk.names();
    let mut rows: Vec<MergedPanelRow> = joined
        .iter()
        .zip(ts_matches)
        .zip(tariff_matches)
        .map(|(((income, firm), ts), tariff)| {
            assemble(income, firm, names.get(&income.record.cik), ts, tariff)
        })
        .collect();
    rows.sort_by(|a, b| (a.cik, a.year).cmp(&(b.cik, b.year)));

    check_invariants(&rows, config)?;
    report.rows_out = rows.len();
    info!(
        rows = rows.len(),
        firms = firms_after.len(),
        lost_sec_firms = report.sec_firms_lost,
        "merged panel built"
    );
    Ok(MergeOutcome { rows, report })
}

/// (ticker, year) join key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TickerYear(String, i32);

impl Display for TickerYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.0, self.1)
    }
}
