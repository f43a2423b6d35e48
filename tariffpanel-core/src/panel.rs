//! Firm-year panel construction.
//!
//! Turns the long list of extracted facts into one reconciled income record
//! per (firm, year):
//!
//! 1. collapse duplicates per (firm, year, concept), most recent filing wins
//! 2. resolve overlapping tag variants through the priority table
//! 3. pivot long → wide
//! 4. backfill foreign = total − domestic
//! 5. derive the foreign profit share
//! 6. null the share where the income identity fails
//!
//! Raw components are never altered by step 6; only the ratio is withdrawn.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::{info, warn};

use crate::config::{PipelineConfig, Reconciliation};
use crate::domain::{Cik, FinancialFact, FirmYearRecord};

pub const FOREIGN: &str = "foreign";
pub const DOMESTIC: &str = "domestic";
pub const TOTAL: &str = "total";

/// Audit counts for one panel build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PanelReport {
    pub facts_in: usize,
    pub duplicates_collapsed: usize,
    pub variant_rows_dropped: usize,
    pub foreign_backfilled: usize,
    pub identity_failures: usize,
    pub rows_out: usize,
    pub share_defined: usize,
}

#[derive(Debug, Clone)]
pub struct PanelBuild {
    pub records: Vec<FirmYearRecord>,
    pub report: PanelReport,
}

/// Recency order: filing date, then filing id, then period end, then value.
fn recency(a: &FinancialFact, b: &FinancialFact) -> Ordering {
    a.filed
        .cmp(&b.filed)
        .then_with(|| a.filing_id.cmp(&b.filing_id))
        .then_with(|| a.period_end.cmp(&b.period_end))
        .then_with(|| a.value.total_cmp(&b.value))
}

/// Keep one fact per (firm, year, concept): the most recently filed.
///
/// Output is sorted by (firm, year, concept). Idempotent.
pub fn collapse_duplicates(facts: &[FinancialFact]) -> Vec<FinancialFact> {
    let mut best: BTreeMap<(Cik, i32, &str), &FinancialFact> = BTreeMap::new();
    for fact in facts {
        best.entry((fact.cik, fact.data_year, fact.concept.as_str()))
            .and_modify(|cur| {
                if recency(fact, cur) == Ordering::Greater {
                    *cur = fact;
                }
            })
            .or_insert(fact);
    }
    best.into_values().cloned().collect()
}

/// Resolve tag variants into their canonical label.
///
/// For each (firm, year) and each rule, the first listed variant that is
/// present survives and is renamed; lower-priority variants are discarded,
/// never averaged. Returns the surviving facts and the number discarded.
/// Expects at most one fact per (firm, year, concept).
pub fn reconcile_variants(
    facts: Vec<FinancialFact>,
    rules: &[Reconciliation],
) -> (Vec<FinancialFact>, usize) {
    let rule_of = |concept: &str| -> Option<(usize, usize)> {
        rules.iter().enumerate().find_map(|(r, rule)| {
            rule.variants
                .iter()
                .position(|v| v == concept)
                .map(|rank| (r, rank))
        })
    };

    // Winning rank per (firm, year, rule).
    let mut winner: HashMap<(Cik, i32, usize), usize> = HashMap::new();
    for fact in &facts {
        if let Some((r, rank)) = rule_of(&fact.concept) {
            winner
                .entry((fact.cik, fact.data_year, r))
                .and_modify(|w| *w = (*w).min(rank))
                .or_insert(rank);
        }
    }

    let mut dropped = 0;
    let mut out = Vec::with_capacity(facts.len());
    for mut fact in facts {
        match rule_of(&fact.concept) {
            None => out.push(fact),
            Some((r, rank)) => {
                if winner.get(&(fact.cik, fact.data_year, r)) == Some(&rank) {
                    fact.concept = rules[r].canonical.clone();
                    out.push(fact);
                } else {
                    dropped += 1;
                }
            }
        }
    }
    (out, dropped)
}

#[derive(Debug, Default)]
struct WideRow {
    foreign: Option<f64>,
    domestic: Option<f64>,
    total: Option<f64>,
}

/// Relative identity residual |f + d − t| / |t|, when all three are present
/// and total is non-zero.
pub fn identity_residual(
    foreign: Option<f64>,
    domestic: Option<f64>,
    total: Option<f64>,
) -> Option<f64> {
    match (foreign, domestic, total) {
        (Some(f), Some(d), Some(t)) if t != 0.0 => Some((f + d - t).abs() / t.abs()),
        _ => None,
    }
}

/// Build the firm-year income panel from extracted facts.
///
/// `names` supplies company names by CIK (usually from the crosswalk).
pub fn build_panel(
    facts: &[FinancialFact],
    names: &HashMap<Cik, String>,
    config: &PipelineConfig,
) -> PanelBuild {
    let mut report = PanelReport {
        facts_in: facts.len(),
        ..Default::default()
    };

    let collapsed = collapse_duplicates(facts);
    report.duplicates_collapsed = facts.len() - collapsed.len();

    let (reconciled, dropped) = reconcile_variants(collapsed, &config.concepts.reconcile);
    report.variant_rows_dropped = dropped;

    let mut wide: BTreeMap<(Cik, i32), WideRow> = BTreeMap::new();
    let mut unknown = 0usize;
    for fact in &reconciled {
        let row = wide.entry((fact.cik, fact.data_year)).or_default();
        match fact.concept.as_str() {
            FOREIGN => row.foreign = Some(fact.value),
            DOMESTIC => row.domestic = Some(fact.value),
            TOTAL => row.total = Some(fact.value),
            _ => unknown += 1,
        }
    }
    if unknown > 0 {
        warn!(unknown, "facts with labels outside foreign/domestic/total ignored");
    }

    let tolerance = config.panel.identity_tolerance;
    let mut records = Vec::with_capacity(wide.len());
    for ((cik, year), mut row) in wide {
        if row.foreign.is_none() {
            if let (Some(t), Some(d)) = (row.total, row.domestic) {
                row.foreign = Some(t - d);
                report.foreign_backfilled += 1;
            }
        }

        let mut share = match (row.foreign, row.total) {
            (Some(f), Some(t)) if t != 0.0 => Some(f / t),
            _ => None,
        };

        if let Some(resid) = identity_residual(row.foreign, row.domestic, row.total) {
            if resid > tolerance {
                if share.is_some() {
                    report.identity_failures += 1;
                }
                share = None;
            }
        }

        if share.is_some() {
            report.share_defined += 1;
        }
        records.push(FirmYearRecord {
            cik,
            company_name: names.get(&cik).cloned(),
            year,
            foreign_pretax_income: row.foreign,
            domestic_pretax_income: row.domestic,
            total_pretax_income: row.total,
            foreign_profit_share: share,
        });
    }
    report.rows_out = records.len();

    info!(
        facts = report.facts_in,
        duplicates = report.duplicates_collapsed,
        variants_dropped = report.variant_rows_dropped,
        backfilled = report.foreign_backfilled,
        identity_failures = report.identity_failures,
        rows = report.rows_out,
        with_share = report.share_defined,
        "built firm-year panel"
    );

    PanelBuild { records, report }
}
