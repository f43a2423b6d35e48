//! Descriptive outputs for the merged panel: data dictionary, summary
//! statistics and a plain-text data-quality report.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

use tariffpanel_core::artifacts::write_csv;
use tariffpanel_core::domain::{Cik, MergedPanelRow};
use tariffpanel_core::stats::{quantile_sorted, sorted_present};

pub const DATA_DICTIONARY_CSV: &str = "data_dictionary.csv";
pub const SUMMARY_STATISTICS_CSV: &str = "summary_statistics.csv";
pub const DATA_CHECKS_TXT: &str = "data_checks.txt";

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Missing,
    Number(f64),
    Text(String),
}

fn num(v: Option<f64>) -> Value {
    v.map_or(Value::Missing, Value::Number)
}

fn text(v: Option<&String>) -> Value {
    v.map_or(Value::Missing, |s| Value::Text(s.clone()))
}

struct Column {
    name: &'static str,
    description: &'static str,
    source: &'static str,
    kind: &'static str,
    dtype: &'static str,
    get: fn(&MergedPanelRow) -> Value,
}

const SEC: &str = "SEC EDGAR XBRL";
const VENDOR: &str = "vendor terminal export";
const TARIFF: &str = "Section 301 tariff exposure table";

fn c(
    name: &'static str,
    description: &'static str,
    source: &'static str,
    kind: &'static str,
    dtype: &'static str,
    get: fn(&MergedPanelRow) -> Value,
) -> Column {
    Column {
        name,
        description,
        source,
        kind,
        dtype,
        get,
    }
}

fn columns() -> Vec<Column> {
    vec![
        c("cik", "SEC Central Index Key; firm identifier", "SEC EDGAR", "identifier", "int", |r| Value::Number(r.cik as f64)),
        c("clean_ticker", "Exchange ticker with vendor suffix removed", VENDOR, "identifier", "str", |r| Value::Text(r.clean_ticker.clone())),
        c("company_name", "Registrant name from the SEC ticker map", SEC, "descriptor", "str", |r| text(r.company_name.as_ref())),
        c("company_name_vendor", "Short company name from the vendor universe", VENDOR, "descriptor", "str", |r| text(r.company_name_vendor.as_ref())),
        c("year", "Fiscal data year", SEC, "time", "int", |r| Value::Number(f64::from(r.year))),
        c("sic_code", "Standard Industrial Classification code", VENDOR, "industry", "str", |r| text(r.sic_code.as_ref())),
        c("naics_code", "Full NAICS industry code", VENDOR, "industry", "str", |r| text(r.naics_code.as_ref())),
        c("naics3", "NAICS 3-digit industry; tariff merge and cluster key", "derived from naics_code", "industry", "str", |r| text(r.naics3.as_ref())),
        c("icb_subsector", "ICB subsector name", VENDOR, "industry", "str", |r| text(r.icb_subsector.as_ref())),
        c("market_cap", "Market capitalization in USD, latest available", VENDOR, "firm characteristic", "float", |r| num(r.market_cap)),
        c("price", "Latest share price in USD", VENDOR, "firm characteristic", "float", |r| num(r.price)),
        c("foreign_pretax_income", "Pre-tax income from foreign operations, USD millions; backfilled as total minus domestic when untagged", SEC, "income", "float", |r| num(r.foreign_pretax_income)),
        c("domestic_pretax_income", "Pre-tax income from domestic operations, USD millions", SEC, "income", "float", |r| num(r.domestic_pretax_income)),
        c("total_pretax_income", "Total pre-tax income, USD millions; current tag preferred over the legacy tag", SEC, "income", "float", |r| num(r.total_pretax_income)),
        c("foreign_profit_share", "Foreign over total pre-tax income; undefined when the income identity fails", "computed", "outcome", "float", |r| num(r.foreign_profit_share)),
        c("foreign_profit_share_winsorized", "Foreign profit share clipped at its 1st and 99th percentiles", "computed", "outcome", "float", |r| num(r.foreign_profit_share_winsorized)),
        c("fps_extreme", "Foreign profit share was outside its 1st-99th percentile range", "computed", "flag", "bool", |r| Value::Text(r.fps_extreme.to_string())),
        c("total_revenue", "Annual revenue, USD millions", VENDOR, "financial", "float", |r| num(r.total_revenue)),
        c("pretax_income_vendor", "Vendor pre-tax income, USD millions; cross-check for the SEC total", VENDOR, "financial", "float", |r| num(r.pretax_income_vendor)),
        c("rd_expense", "Research and development expense, USD millions", VENDOR, "financial", "float", |r| num(r.rd_expense)),
        c("total_assets", "Total assets, USD millions", VENDOR, "financial", "float", |r| num(r.total_assets)),
        c("total_debt", "Short plus long-term debt, USD millions", VENDOR, "financial", "float", |r| num(r.total_debt)),
        c("capital_expenditure", "Capital expenditure, USD millions; usually negative", VENDOR, "financial", "float", |r| num(r.capital_expenditure)),
        c("effective_tax_rate", "Effective tax rate in percent; main outcome before winsorizing", VENDOR, "outcome", "float", |r| num(r.effective_tax_rate)),
        c("operating_expenses", "Total operating expenses, USD millions", VENDOR, "financial", "float", |r| num(r.operating_expenses)),
        c("sector_name", "NAICS-3 sector name", TARIFF, "industry", "str", |r| text(r.sector_name.as_ref())),
        c("n_products_targeted", "HS-8 products hit by Section 301 tariffs in the industry", TARIFF, "treatment", "float", |r| num(r.n_products_targeted)),
        c("n_varieties_targeted", "Product-country varieties hit by Section 301 tariffs", TARIFF, "treatment", "float", |r| num(r.n_varieties_targeted)),
        c("mean_tariff_increase", "Mean tariff increase across targeted products; treatment intensity", TARIFF, "treatment", "float", |r| num(r.mean_tariff_increase)),
        c("sd_tariff_increase", "Standard deviation of the tariff increase within the industry", TARIFF, "treatment", "float", |r| num(r.sd_tariff_increase)),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DictionaryEntry {
    pub variable: String,
    pub description: String,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub dtype: String,
    pub n_nonmissing: usize,
    pub n_missing: usize,
    pub pct_missing: f64,
    pub n_unique: usize,
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// One entry per merged-panel column with missingness and cardinality.
pub fn data_dictionary(rows: &[MergedPanelRow]) -> Vec<DictionaryEntry> {
    columns()
        .into_iter()
        .map(|col| {
            let values: Vec<Value> = rows.iter().map(col.get).collect();
            let n_missing = values.iter().filter(|v| **v == Value::Missing).count();
            let unique: HashSet<String> = values
                .iter()
                .filter_map(|v| match v {
                    Value::Missing => None,
                    Value::Number(x) => Some(x.to_bits().to_string()),
                    Value::Text(s) => Some(s.clone()),
                })
                .collect();
            DictionaryEntry {
                variable: col.name.to_string(),
                description: col.description.to_string(),
                source: col.source.to_string(),
                kind: col.kind.to_string(),
                dtype: col.dtype.to_string(),
                n_nonmissing: values.len() - n_missing,
                n_missing,
                pct_missing: (pct(n_missing, values.len()) * 10.0).round() / 10.0,
                n_unique: unique.len(),
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStatistics {
    pub variable: String,
    pub count: usize,
    pub mean: Option<f64>,
    pub std: Option<f64>,
    pub min: Option<f64>,
    pub p1: Option<f64>,
    pub p5: Option<f64>,
    pub p25: Option<f64>,
    pub p50: Option<f64>,
    pub p75: Option<f64>,
    pub p95: Option<f64>,
    pub p99: Option<f64>,
    pub max: Option<f64>,
    pub n_missing: usize,
    pub pct_missing: f64,
}

fn describe(variable: &str, values: &[Option<f64>]) -> SummaryStatistics {
    let sorted = sorted_present(values);
    let n = sorted.len();
    let mean = (n > 0).then(|| sorted.iter().sum::<f64>() / n as f64);
    let std = mean.filter(|_| n > 1).map(|m| {
        (sorted.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    });
    let q = |p: f64| quantile_sorted(&sorted, p);
    let n_missing = values.len() - n;
    SummaryStatistics {
        variable: variable.to_string(),
        count: n,
        mean,
        std,
        min: sorted.first().copied(),
        p1: q(0.01),
        p5: q(0.05),
        p25: q(0.25),
        p50: q(0.5),
        p75: q(0.75),
        p95: q(0.95),
        p99: q(0.99),
        max: sorted.last().copied(),
        n_missing,
        pct_missing: (pct(n_missing, values.len()) * 10.0).round() / 10.0,
    }
}

/// Distribution of every numeric column that is not an identifier or a year.
pub fn summary_statistics(rows: &[MergedPanelRow]) -> Vec<SummaryStatistics> {
    columns()
        .into_iter()
        .filter(|c| c.dtype == "float")
        .map(|col| {
            let values: Vec<Option<f64>> = rows
                .iter()
                .map(|r| match (col.get)(r) {
                    Value::Number(x) => Some(x),
                    _ => None,
                })
                .collect();
            describe(col.name, &values)
        })
        .collect()
}

fn coverage_by_year(out: &mut String, rows: &[MergedPanelRow], has: impl Fn(&MergedPanelRow) -> bool) {
    let mut by_year: BTreeMap<i32, (usize, usize)> = BTreeMap::new();
    for r in rows {
        let e = by_year.entry(r.year).or_default();
        e.1 += 1;
        if has(r) {
            e.0 += 1;
        }
    }
    for (year, (n, total)) in by_year {
        let _ = writeln!(out, "   {year}: {n} / {total} firms ({:.1}%)", pct(n, total));
    }
}

/// Plain-text data-quality report over the merged panel.
pub fn data_checks(rows: &[MergedPanelRow]) -> String {
    let n = rows.len();
    let rule = "=".repeat(65);
    let mut out = String::with_capacity(4096);
    let _ = writeln!(out, "{rule}\nDATA QUALITY CHECKS\n{rule}\n");

    let firms: BTreeSet<Cik> = rows.iter().map(|r| r.cik).collect();
    let mut firms_per_year: BTreeMap<i32, BTreeSet<Cik>> = BTreeMap::new();
    for r in rows {
        firms_per_year.entry(r.year).or_default().insert(r.cik);
    }
    let _ = writeln!(out, "1. PANEL STRUCTURE");
    let _ = writeln!(out, "   Total observations: {n}");
    let _ = writeln!(out, "   Unique firms: {}", firms.len());
    if let (Some(lo), Some(hi)) = (firms_per_year.keys().next(), firms_per_year.keys().last()) {
        let _ = writeln!(out, "   Year range: {lo}-{hi}");
    }
    let _ = writeln!(out, "   Firms per year:");
    for (year, f) in &firms_per_year {
        let _ = writeln!(out, "     {year}: {}", f.len());
    }
    let balanced = firms.len() * firms_per_year.len() == n;
    let _ = writeln!(
        out,
        "   Panel is {}",
        if balanced { "BALANCED" } else { "UNBALANCED (firms enter/exit over time)" }
    );

    let _ = writeln!(out, "\n2. MISSING DATA");
    let key: [(&str, fn(&MergedPanelRow) -> Option<f64>); 5] = [
        ("foreign_pretax_income", |r| r.foreign_pretax_income),
        ("domestic_pretax_income", |r| r.domestic_pretax_income),
        ("total_pretax_income", |r| r.total_pretax_income),
        ("foreign_profit_share", |r| r.foreign_profit_share),
        ("mean_tariff_increase", |r| r.mean_tariff_increase),
    ];
    for (name, get) in key {
        let missing = rows.iter().filter(|r| get(r).is_none()).count();
        let _ = writeln!(out, "   {name}: {missing} missing ({:.1}%)", pct(missing, n));
    }

    let negative = rows
        .iter()
        .filter(|r| r.total_pretax_income.is_some_and(|t| t < 0.0))
        .count();
    let _ = writeln!(out, "\n3. NEGATIVE INCOME VALUES");
    let _ = writeln!(
        out,
        "   Firm-years with negative total pre-tax income: {negative} ({:.1}%)",
        pct(negative, n)
    );

    let etr: Vec<Option<f64>> = rows.iter().map(|r| r.effective_tax_rate).collect();
    let etr_sorted = sorted_present(&etr);
    let _ = writeln!(out, "\n4. EFFECTIVE TAX RATE DISTRIBUTION (main outcome)");
    let _ = writeln!(
        out,
        "   Obs with ETR data: {} ({:.1}%)",
        etr_sorted.len(),
        pct(etr_sorted.len(), n)
    );
    let d = describe("effective_tax_rate", &etr);
    if let (Some(mean), Some(median), Some(min), Some(max)) = (d.mean, d.p50, d.min, d.max) {
        let _ = writeln!(out, "   Mean: {mean:.1}%   Median: {median:.1}%");
        let _ = writeln!(out, "   Min: {min:.1}%   Max: {max:.1}%");
    }
    let count = |f: &dyn Fn(f64) -> bool| etr_sorted.iter().filter(|&&x| f(x)).count();
    let _ = writeln!(out, "   Obs with ETR < 0: {}", count(&|x| x < 0.0));
    let _ = writeln!(out, "   Obs with ETR > 100: {}", count(&|x| x > 100.0));
    let _ = writeln!(out, "   Obs with ETR > 200: {}", count(&|x| x > 200.0));
    let _ = writeln!(out, "   Obs in [0, 60]: {}", count(&|x| (0.0..=60.0).contains(&x)));
    if let (Some(p1), Some(p99), Some(p5), Some(p95)) = (d.p1, d.p99, d.p5, d.p95) {
        let _ = writeln!(out, "   Winsorization cutoffs:");
        let _ = writeln!(out, "     p1/p99: [{p1:.1}, {p99:.1}]");
        let _ = writeln!(out, "     p5/p95: [{p5:.1}, {p95:.1}]");
    }

    let fps: Vec<f64> = rows.iter().filter_map(|r| r.foreign_profit_share).collect();
    let _ = writeln!(out, "\n4b. FOREIGN PROFIT SHARE DISTRIBUTION (robustness outcome)");
    let _ = writeln!(out, "   Obs with FPS > 1: {}", fps.iter().filter(|&&x| x > 1.0).count());
    let _ = writeln!(out, "   Obs with FPS < 0: {}", fps.iter().filter(|&&x| x < 0.0).count());
    let _ = writeln!(
        out,
        "   Obs with FPS in [0, 1]: {}",
        fps.iter().filter(|&&x| (0.0..=1.0).contains(&x)).count()
    );

    let mut seen = HashSet::new();
    let duplicates = rows.iter().filter(|r| !seen.insert((r.cik, r.year))).count();
    let _ = writeln!(out, "\n5. DUPLICATE CHECK");
    let _ = writeln!(out, "   Duplicate firm-year observations: {duplicates}");
    let _ = writeln!(
        out,
        "   {}",
        if duplicates > 0 { "WARNING: duplicates found" } else { "No duplicates found" }
    );

    let matched = rows.iter().filter(|r| r.mean_tariff_increase.is_some()).count();
    let _ = writeln!(out, "\n6. TARIFF MERGE QUALITY");
    let _ = writeln!(out, "   Obs matched to tariff data: {matched} ({:.1}%)", pct(matched, n));
    let _ = writeln!(out, "   Unmatched obs: {}", n - matched);

    let residuals: Vec<f64> = rows
        .iter()
        .filter_map(|r| {
            Some(r.foreign_pretax_income? + r.domestic_pretax_income? - r.total_pretax_income?)
        })
        .collect();
    let _ = writeln!(out, "\n7. ACCOUNTING IDENTITY CHECK (foreign + domestic vs total)");
    let _ = writeln!(out, "   Obs with all three income vars: {}", residuals.len());
    if !residuals.is_empty() {
        let mean = residuals.iter().sum::<f64>() / residuals.len() as f64;
        let max_abs = residuals.iter().fold(0.0_f64, |m, r| m.max(r.abs()));
        let large = residuals.iter().filter(|r| r.abs() > 1000.0).count();
        let _ = writeln!(out, "   Mean residual: {mean:.2}");
        let _ = writeln!(out, "   Max absolute residual: {max_abs:.2}");
        let _ = writeln!(out, "   Obs where |residual| > 1000: {large}");
    }

    let _ = writeln!(out, "\n8. EFFECTIVE TAX RATE COVERAGE BY YEAR");
    coverage_by_year(&mut out, rows, |r| r.effective_tax_rate.is_some());
    let _ = writeln!(out, "\n9. FOREIGN PROFIT SHARE COVERAGE BY YEAR");
    coverage_by_year(&mut out, rows, |r| r.foreign_profit_share.is_some());
    out
}

/// Write the dictionary, summary statistics and data checks into `output_dir`.
pub fn save_reports(rows: &[MergedPanelRow], output_dir: &Path) -> Result<Vec<PathBuf>> {
    let dictionary = output_dir.join(DATA_DICTIONARY_CSV);
    write_csv(&dictionary, &data_dictionary(rows))
        .with_context(|| format!("failed to write {}", dictionary.display()))?;

    let stats = output_dir.join(SUMMARY_STATISTICS_CSV);
    write_csv(&stats, &summary_statistics(rows))
        .with_context(|| format!("failed to write {}", stats.display()))?;

    let checks = output_dir.join(DATA_CHECKS_TXT);
    std::fs::write(&checks, data_checks(rows))
        .with_context(|| format!("failed to write {}", checks.display()))?;

    Ok(vec![dictionary, stats, checks])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(cik: Cik, year: i32) -> MergedPanelRow {
        MergedPanelRow {
            cik,
            clean_ticker: format!("T{cik}"),
            company_name: Some(format!("Firm {cik}")),
            company_name_vendor: None,
            year,
            sic_code: None,
            naics_code: Some("334413".into()),
            naics3: Some("334".into()),
            icb_subsector: None,
            market_cap: None,
            price: None,
            foreign_pretax_income: Some(40.0),
            domestic_pretax_income: Some(60.0),
            total_pretax_income: Some(100.0),
            foreign_profit_share: Some(0.4),
            foreign_profit_share_winsorized: Some(0.4),
            fps_extreme: false,
            total_revenue: Some(1000.0),
            pretax_income_vendor: None,
            rd_expense: None,
            total_assets: None,
            total_debt: None,
            capital_expenditure: None,
            effective_tax_rate: Some(21.0),
            operating_expenses: None,
            sector_name: None,
            n_products_targeted: None,
            n_varieties_targeted: None,
            mean_tariff_increase: Some(0.25),
            sd_tariff_increase: None,
        }
    }

    #[test]
    fn dictionary_counts_missing_and_unique() {
        let mut b = row(2, 2020);
        b.effective_tax_rate = None;
        let rows = vec![row(1, 2020), row(1, 2021), b];
        let dict = data_dictionary(&rows);
        assert_eq!(dict.len(), columns().len());
        let etr = dict.iter().find(|d| d.variable == "effective_tax_rate").unwrap();
        assert_eq!((etr.n_nonmissing, etr.n_missing, etr.n_unique), (2, 1, 1));
        assert!((etr.pct_missing - 33.3).abs() < 1e-9);
        let cik = dict.iter().find(|d| d.variable == "cik").unwrap();
        assert_eq!(cik.n_unique, 2);
    }

    #[test]
    fn summary_statistics_cover_numeric_columns() {
        let mut rows: Vec<MergedPanelRow> = (0..5).map(|i| row(i, 2020)).collect();
        for (i, r) in rows.iter_mut().enumerate() {
            r.effective_tax_rate = Some(10.0 * i as f64);
        }
        let stats = summary_statistics(&rows);
        assert!(stats.iter().all(|s| s.variable != "cik" && s.variable != "year"));
        let etr = stats.iter().find(|s| s.variable == "effective_tax_rate").unwrap();
        assert_eq!(etr.count, 5);
        assert_eq!(etr.mean, Some(20.0));
        assert_eq!(etr.p50, Some(20.0));
        assert_eq!(etr.max, Some(40.0));
        let price = stats.iter().find(|s| s.variable == "price").unwrap();
        assert_eq!((price.count, price.mean), (0, None));
    }

    #[test]
    fn data_checks_report_sections() {
        let mut dup = row(1, 2020);
        dup.total_pretax_income = Some(-5.0);
        let rows = vec![row(1, 2020), dup, row(2, 2021)];
        let report = data_checks(&rows);
        assert!(report.contains("Total observations: 3"));
        assert!(report.contains("Duplicate firm-year observations: 1"));
        assert!(report.contains("negative total pre-tax income: 1"));
        assert!(report.contains("2020: 2 / 2 firms (100.0%)"));
        assert!(report.contains("UNBALANCED"));
    }

    #[test]
    fn save_reports_writes_three_files() {
        let dir = tempfile::tempdir().unwrap();
        let written = save_reports(&[row(1, 2020)], dir.path()).unwrap();
        assert_eq!(written.len(), 3);
        let dict = std::fs::read_to_string(&written[0]).unwrap();
        assert!(dict.starts_with("variable,description,source,type,dtype"));
    }
}
