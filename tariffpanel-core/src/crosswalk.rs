//! Ticker normalization and ticker → CIK resolution.

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::info;

use crate::domain::{Cik, CrosswalkEntry, VendorFirm};

/// Canonical join key: trimmed, uppercased, vendor suffix tokens removed.
///
/// `"aapl US Equity "` → `"AAPL"`.
pub fn normalize_ticker(raw: &str, suffixes: &[String]) -> String {
    let mut t = raw.trim().to_uppercase();
    for suffix in suffixes {
        let suffix = suffix.to_uppercase();
        if let Some(stripped) = t.strip_suffix(suffix.as_str()) {
            t = stripped.to_string();
        }
    }
    t.trim().to_string()
}

/// Match statistics reported by every join step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JoinStats {
    pub step: String,
    pub left_rows: usize,
    pub matched: usize,
    pub pct: f64,
}

impl JoinStats {
    pub fn new(step: &str, left_rows: usize, matched: usize) -> Self {
        let pct = if left_rows == 0 {
            0.0
        } else {
            matched as f64 / left_rows as f64 * 100.0
        };
        Self {
            step: step.to_string(),
            left_rows,
            matched,
            pct,
        }
    }

    pub fn log(&self) {
        info!(
            step = %self.step,
            matched = self.matched,
            rows = self.left_rows,
            "{:.1}% matched",
            self.pct
        );
    }
}

/// Lookup built from the SEC ticker map.
#[derive(Debug, Clone, Default)]
pub struct Crosswalk {
    by_ticker: HashMap<String, Cik>,
    names: HashMap<Cik, String>,
}

impl Crosswalk {
    /// First entry wins for both a repeated ticker and a repeated CIK name.
    pub fn from_entries(entries: &[CrosswalkEntry]) -> Self {
        let mut by_ticker = HashMap::new();
        let mut names = HashMap::new();
        for e in entries {
            let ticker = normalize_ticker(&e.ticker, &[]);
            if ticker.is_empty() {
                continue;
            }
            by_ticker.entry(ticker).or_insert(e.cik);
            names.entry(e.cik).or_insert_with(|| e.company_name.clone());
        }
        Self { by_ticker, names }
    }

    pub fn resolve(&self, clean_ticker: &str) -> Option<Cik> {
        self.by_ticker.get(clean_ticker).copied()
    }

    pub fn names(&self) -> &HashMap<Cik, String> {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.by_ticker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_ticker.is_empty()
    }
}

/// Attach a CIK to every vendor firm that resolves; unmatched firms (funds,
/// ETFs, foreign listings) are dropped.
pub fn resolve_universe(
    firms: &[VendorFirm],
    crosswalk: &Crosswalk,
) -> (Vec<(Cik, VendorFirm)>, JoinStats) {
    let resolved: Vec<(Cik, VendorFirm)> = firms
        .iter()
        .filter_map(|f| crosswalk.resolve(&f.clean_ticker).map(|cik| (cik, f.clone())))
        .collect();
    let stats = JoinStats::new("ticker_to_cik", firms.len(), resolved.len());
    stats.log();
    (resolved, stats)
}

/// Sorted, de-duplicated CIKs to acquire for a vendor universe.
pub fn select_targets(firms: &[VendorFirm], crosswalk: &Crosswalk) -> Vec<Cik> {
    let set: BTreeSet<Cik> = firms
        .iter()
        .filter_map(|f| crosswalk.resolve(&f.clean_ticker))
        .collect();
    set.into_iter().collect()
}
