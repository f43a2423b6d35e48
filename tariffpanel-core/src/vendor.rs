//! Vendor workbook exports.
//!
//! The vendor workbook arrives as one CSV per sheet: a static
//! `firm_universe.csv` and one wide `Ticker, 2015, 2016, …` file per annual
//! variable. Sheets are melted to (ticker, year) and combined without
//! deduplication, so a repeated ticker-year survives to the cardinality check
//! at merge time instead of being silently dropped here.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{info, warn};

use crate::artifacts::{names, ArtifactError};
use crate::config::PipelineConfig;
use crate::crosswalk::normalize_ticker;
use crate::domain::{VendorFirm, VendorYear};
use crate::stats::finite;

/// Annual vendor variables, one sheet each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorVariable {
    TotalRevenue,
    PretaxIncome,
    RdExpense,
    TotalAssets,
    TotalDebt,
    CapitalExpenditure,
    EffectiveTaxRate,
    OperatingExpenses,
}

impl VendorVariable {
    pub const ALL: [VendorVariable; 8] = [
        VendorVariable::TotalRevenue,
        VendorVariable::PretaxIncome,
        VendorVariable::RdExpense,
        VendorVariable::TotalAssets,
        VendorVariable::TotalDebt,
        VendorVariable::CapitalExpenditure,
        VendorVariable::EffectiveTaxRate,
        VendorVariable::OperatingExpenses,
    ];

    /// Sheet (and file stem) in the vendor export.
    pub fn sheet(self) -> &'static str {
        match self {
            VendorVariable::TotalRevenue => "total_revenue",
            VendorVariable::PretaxIncome => "pretax_income",
            VendorVariable::RdExpense => "rd_expense",
            VendorVariable::TotalAssets => "total_assets",
            VendorVariable::TotalDebt => "total_debt",
            VendorVariable::CapitalExpenditure => "capital_expend",
            VendorVariable::EffectiveTaxRate => "effective_tax_rate",
            VendorVariable::OperatingExpenses => "operating_expenses",
        }
    }

    fn slot(self, row: &mut VendorYear) -> &mut Option<f64> {
        match self {
            VendorVariable::TotalRevenue => &mut row.total_revenue,
            VendorVariable::PretaxIncome => &mut row.pretax_income_vendor,
            VendorVariable::RdExpense => &mut row.rd_expense,
            VendorVariable::TotalAssets => &mut row.total_assets,
            VendorVariable::TotalDebt => &mut row.total_debt,
            VendorVariable::CapitalExpenditure => &mut row.capital_expenditure,
            VendorVariable::EffectiveTaxRate => &mut row.effective_tax_rate,
            VendorVariable::OperatingExpenses => &mut row.operating_expenses,
        }
    }
}

/// Numeric coercion: anything unparseable (`#N/A`, blanks) is missing.
pub fn coerce_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().and_then(finite)
}

/// Industry codes often round-trip through a spreadsheet as floats
/// (`334413.0`). Returns the integer digits, or `None`.
pub fn parse_code(s: &str) -> Option<String> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if s.chars().all(|c| c.is_ascii_digit()) {
        return Some(s.to_string());
    }
    let v = coerce_number(s)?;
    if v < 0.0 || v.fract() != 0.0 {
        return None;
    }
    Some(format!("{}", v as u64))
}

/// Leading `digits` characters of a code, when it has that many.
pub fn truncate_code(code: &str, digits: usize) -> Option<String> {
    code.get(..digits).map(str::to_string)
}

fn column(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn open(path: &Path) -> Result<csv::Reader<std::fs::File>, ArtifactError> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .map_err(|e| ArtifactError::csv(path, e))
}

/// Load the static firm-universe sheet.
///
/// The first `universe_skip_rows` rows after the header are summary rows,
/// not firms.
pub fn load_firm_universe(path: &Path, config: &PipelineConfig) -> Result<Vec<VendorFirm>, ArtifactError> {
    let mut rdr = open(path)?;
    let headers = rdr.headers().map_err(|e| ArtifactError::csv(path, e))?.clone();
    let ticker_col = column(&headers, "Ticker").ok_or_else(|| ArtifactError::Format {
        path: path.display().to_string(),
        message: "missing 'Ticker' column".into(),
    })?;
    let col = |name: &str| column(&headers, name);
    let (name_col, sic_col, naics_col, icb_col, cap_col, price_col) = (
        col("Short Name"),
        col("SIC Code"),
        col("NAICS Code"),
        col("ICB Subsector Name"),
        col("Market Cap"),
        col("Price:D-1"),
    );

    let suffixes = &config.merge.ticker_suffixes;
    let digits = config.merge.industry_digits;
    let mut firms = Vec::new();
    for (i, record) in rdr.records().enumerate() {
        let record = record.map_err(|e| ArtifactError::csv(path, e))?;
        if i < config.merge.universe_skip_rows {
            continue;
        }
        let get = |c: Option<usize>| c.and_then(|c| record.get(c)).map(str::trim).filter(|s| !s.is_empty());

        let clean_ticker = normalize_ticker(record.get(ticker_col).unwrap_or(""), suffixes);
        if clean_ticker.is_empty() {
            continue;
        }
        let naics_code = get(naics_col).and_then(parse_code);
        firms.push(VendorFirm {
            clean_ticker,
            company_name_vendor: get(name_col).map(String::from),
            sic_code: get(sic_col).and_then(parse_code),
            naics3: naics_code.as_deref().and_then(|c| truncate_code(c, digits)),
            naics_code,
            icb_subsector: get(icb_col).map(String::from),
            market_cap: get(cap_col).and_then(coerce_number),
            price: get(price_col).and_then(coerce_number),
        });
    }

    info!(
        firms = firms.len(),
        with_naics = firms.iter().filter(|f| f.naics_code.is_some()).count(),
        with_sic = firms.iter().filter(|f| f.sic_code.is_some()).count(),
        "loaded firm universe"
    );
    Ok(firms)
}

/// Melt one wide sheet into (ticker, year, value), keeping only years in range.
pub fn load_sheet(path: &Path, config: &PipelineConfig) -> Result<Vec<(String, i32, Option<f64>)>, ArtifactError> {
    let mut rdr = open(path)?;
    let headers = rdr.headers().map_err(|e| ArtifactError::csv(path, e))?.clone();
    let ticker_col = column(&headers, "Ticker").ok_or_else(|| ArtifactError::Format {
        path: path.display().to_string(),
        message: "missing 'Ticker' column".into(),
    })?;
    let year_cols: Vec<(usize, i32)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| {
            let h = h.trim();
            if h.is_empty() || !h.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            h.parse::<i32>().ok().filter(|y| config.years.contains(*y)).map(|y| (i, y))
        })
        .collect();

    let mut out = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(|e| ArtifactError::csv(path, e))?;
        let ticker = normalize_ticker(record.get(ticker_col).unwrap_or(""), &config.merge.ticker_suffixes);
        if ticker.is_empty() {
            continue;
        }
        for &(c, year) in &year_cols {
            out.push((ticker.clone(), year, record.get(c).and_then(coerce_number)));
        }
    }
    Ok(out)
}

/// Combine melted sheets on (ticker, year).
///
/// The k-th occurrence of a key in one sheet lines up with the k-th
/// occurrence in every other sheet, so duplicates are preserved.
pub fn combine_sheets(sheets: &[(VendorVariable, Vec<(String, i32, Option<f64>)>)]) -> Vec<VendorYear> {
    let mut combined: BTreeMap<(String, i32), Vec<VendorYear>> = BTreeMap::new();
    for (variable, rows) in sheets {
        let mut seen: BTreeMap<(String, i32), usize> = BTreeMap::new();
        for (ticker, year, value) in rows {
            let key = (ticker.clone(), *year);
            let k = seen.entry(key.clone()).or_insert(0);
            let slots = combined.entry(key).or_default();
            if slots.len() <= *k {
                slots.push(VendorYear {
                    clean_ticker: ticker.clone(),
                    year: *year,
                    ..Default::default()
                });
            }
            *variable.slot(&mut slots[*k]) = *value;
            *k += 1;
        }
    }
    combined.into_values().flatten().collect()
}

#[derive(Debug, Clone, Default)]
pub struct VendorData {
    pub firms: Vec<VendorFirm>,
    pub years: Vec<VendorYear>,
}

/// Load the firm universe and every annual sheet from a vendor export directory.
///
/// A missing sheet leaves its variable empty and is logged; a missing
/// universe file is an error.
pub fn load_vendor_dir(dir: &Path, config: &PipelineConfig) -> Result<VendorData, ArtifactError> {
    let firms = load_firm_universe(&dir.join(names::FIRM_UNIVERSE), config)?;
    let mut sheets = Vec::new();
    for variable in VendorVariable::ALL {
        let path = dir.join(format!("{}.csv", variable.sheet()));
        if !path.exists() {
            warn!(sheet = variable.sheet(), "vendor sheet missing; variable left empty");
            continue;
        }
        let rows = load_sheet(&path, config)?;
        info!(
            sheet = variable.sheet(),
            non_null = rows.iter().filter(|r| r.2.is_some()).count(),
            "loaded vendor sheet"
        );
        sheets.push((variable, rows));
    }
    let years = combine_sheets(&sheets);
    Ok(VendorData { firms, years })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn codes_parse_from_float_text() {
        assert_eq!(parse_code("334413.0").as_deref(), Some("334413"));
        assert_eq!(parse_code(" 3674 ").as_deref(), Some("3674"));
        assert_eq!(parse_code("#N/A"), None);
        assert_eq!(parse_code(""), None);
        assert_eq!(truncate_code("334413", 3).as_deref(), Some("334"));
        assert_eq!(truncate_code("33", 3), None);
        assert_eq!(truncate_code("33€", 3), None);
    }

    #[test]
    fn universe_skips_junk_row_and_cleans() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(names::FIRM_UNIVERSE);
        fs::write(
            &path,
            "Ticker,Short Name,SIC Code,NAICS Code,ICB Subsector Name,Market Cap,Price:D-1\n\
             Count,3,,,,,\n\
             NVDA US Equity,NVIDIA CORP,3674.0,334413.0,Semiconductors,1000.5,120\n\
             SPY US Equity,SPDR S&P 500,,,,#N/A,500\n",
        )
        .unwrap();
        let firms = load_firm_universe(&path, &PipelineConfig::default()).unwrap();
        assert_eq!(firms.len(), 2);
        let nvda = &firms[0];
        assert_eq!(nvda.clean_ticker, "NVDA");
        assert_eq!(nvda.naics3.as_deref(), Some("334"));
        assert_eq!(nvda.sic_code.as_deref(), Some("3674"));
        assert_eq!(nvda.market_cap, Some(1000.5));
        assert_eq!(firms[1].market_cap, None);
        assert_eq!(firms[1].naics3, None);
    }

    #[test]
    fn sheets_melt_filter_and_combine() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("total_revenue.csv"),
            "Ticker,2014,2015,2016,2025\nNVDA US Equity,1,2,3,4\nAMD US Equity,5,#N/A,7,8\n",
        )
        .unwrap();
        fs::write(
            dir.path().join("effective_tax_rate.csv"),
            "Ticker,2015,2016\nNVDA US Equity,12.5,13.5\n",
        )
        .unwrap();
        fs::write(
            dir.path().join(names::FIRM_UNIVERSE),
            "Ticker,Short Name\nCount,1\nNVDA US Equity,NVIDIA\n",
        )
        .unwrap();

        let data = load_vendor_dir(dir.path(), &PipelineConfig::default()).unwrap();
        assert_eq!(data.firms.len(), 1);
        // AMD 2015/2016 + NVDA 2015/2016; 2014 and 2025 are out of range.
        assert_eq!(data.years.len(), 4);
        let nvda_2016 = data
            .years
            .iter()
            .find(|r| r.clean_ticker == "NVDA" && r.year == 2016)
            .unwrap();
        assert_eq!(nvda_2016.total_revenue, Some(3.0));
        assert_eq!(nvda_2016.effective_tax_rate, Some(13.5));
        let amd_2015 = data
            .years
            .iter()
            .find(|r| r.clean_ticker == "AMD" && r.year == 2015)
            .unwrap();
        assert_eq!(amd_2015.total_revenue, None);
        assert_eq!(amd_2015.effective_tax_rate, None);
    }

    #[test]
    fn duplicate_ticker_year_is_preserved() {
        let sheet = vec![
            ("AAA".to_string(), 2020, Some(1.0)),
            ("AAA".to_string(), 2020, Some(2.0)),
        ];
        let combined = combine_sheets(&[(VendorVariable::TotalRevenue, sheet)]);
        assert_eq!(combined.len(), 2);
    }
}
