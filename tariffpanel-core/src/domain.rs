//! Domain types shared by every stage of the panel pipeline.
//!
//! Each persisted type derives `Serialize`/`Deserialize` so it maps directly
//! onto one CSV row. Missing numeric values are `None` and serialize as empty
//! fields.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// SEC Central Index Key.
pub type Cik = u64;

// ─── Acquisition ────────────────────────────────────────────────────

/// One wire-level entry under `facts.<taxonomy>.<tag>.units.<unit>` in an
/// SEC companyfacts document. Any field may be absent or malformed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawFact {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub val: Option<f64>,
    #[serde(default)]
    pub accn: Option<String>,
    #[serde(default)]
    pub fy: Option<i32>,
    #[serde(default)]
    pub fp: Option<String>,
    #[serde(default)]
    pub form: Option<String>,
    #[serde(default)]
    pub filed: Option<String>,
}

/// A firm's full history of tagged facts in the configured unit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompanyFacts {
    pub cik: Cik,
    pub entity_name: String,
    /// XBRL tag → entries, in document order.
    pub facts: BTreeMap<String, Vec<RawFact>>,
}

impl CompanyFacts {
    pub fn facts_for(&self, tag: &str) -> &[RawFact] {
        self.facts.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Annual versus everything else (quarterly reports, amendments, registrations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilingKind {
    Annual,
    Other,
}

impl FilingKind {
    pub fn classify(form: Option<&str>, annual_forms: &[String]) -> Self {
        match form {
            Some(f) if annual_forms.iter().any(|a| a == f.trim()) => FilingKind::Annual,
            _ => FilingKind::Other,
        }
    }
}

/// An admissible fiscal-year observation for one concept.
///
/// `data_year` is the calendar year of the period end, never the filing year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialFact {
    pub cik: Cik,
    pub data_year: i32,
    pub concept: String,
    pub value: f64,
    pub filed: Option<NaiveDate>,
    pub filing_id: String,
    pub period_end: NaiveDate,
    pub period_start: Option<NaiveDate>,
    pub fiscal_year: Option<i32>,
    pub kind: FilingKind,
}

/// One row of the ticker → CIK crosswalk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrosswalkEntry {
    pub cik: Cik,
    pub ticker: String,
    pub company_name: String,
}

// ─── Panel ──────────────────────────────────────────────────────────

/// One reconciled (firm, fiscal year) income record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmYearRecord {
    pub cik: Cik,
    pub company_name: Option<String>,
    pub year: i32,
    pub foreign_pretax_income: Option<f64>,
    pub domestic_pretax_income: Option<f64>,
    pub total_pretax_income: Option<f64>,
    pub foreign_profit_share: Option<f64>,
}

// ─── External collaborators ─────────────────────────────────────────

/// Static vendor attributes for one listed firm (firm-universe sheet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VendorFirm {
    pub clean_ticker: String,
    pub company_name_vendor: Option<String>,
    pub sic_code: Option<String>,
    pub naics_code: Option<String>,
    pub naics3: Option<String>,
    pub icb_subsector: Option<String>,
    pub market_cap: Option<f64>,
    pub price: Option<f64>,
}

/// Vendor annual financials for one (ticker, year), all in millions except
/// the effective tax rate, which is a percentage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VendorYear {
    pub clean_ticker: String,
    pub year: i32,
    pub total_revenue: Option<f64>,
    pub pretax_income_vendor: Option<f64>,
    pub rd_expense: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_debt: Option<f64>,
    pub capital_expenditure: Option<f64>,
    pub effective_tax_rate: Option<f64>,
    pub operating_expenses: Option<f64>,
}

/// Industry-level Section 301 tariff exposure, keyed by 3-digit NAICS.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TariffExposure {
    #[serde(alias = "code")]
    pub naics3: String,
    pub sector_name: Option<String>,
    pub n_products_targeted: Option<f64>,
    pub n_varieties_targeted: Option<f64>,
    pub mean_tariff_increase: Option<f64>,
    pub sd_tariff_increase: Option<f64>,
}

// ─── Merged panel ───────────────────────────────────────────────────

/// One row of the merged analysis panel, unique on (cik, year).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedPanelRow {
    pub cik: Cik,
    pub clean_ticker: String,
    pub company_name: Option<String>,
    pub company_name_vendor: Option<String>,
    pub year: i32,

    pub sic_code: Option<String>,
    pub naics_code: Option<String>,
    pub naics3: Option<String>,
    pub icb_subsector: Option<String>,
    pub market_cap: Option<f64>,
    pub price: Option<f64>,

    pub foreign_pretax_income: Option<f64>,
    pub domestic_pretax_income: Option<f64>,
    pub total_pretax_income: Option<f64>,
    pub foreign_profit_share: Option<f64>,
    pub foreign_profit_share_winsorized: Option<f64>,
    pub fps_extreme: bool,

    pub total_revenue: Option<f64>,
    pub pretax_income_vendor: Option<f64>,
    pub rd_expense: Option<f64>,
    pub total_assets: Option<f64>,
    pub total_debt: Option<f64>,
    pub capital_expenditure: Option<f64>,
    pub effective_tax_rate: Option<f64>,
    pub operating_expenses: Option<f64>,

    pub sector_name: Option<String>,
    pub n_products_targeted: Option<f64>,
    pub n_varieties_targeted: Option<f64>,
    pub mean_tariff_increase: Option<f64>,
    pub sd_tariff_increase: Option<f64>,
}
