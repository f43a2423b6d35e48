//! Fiscal-record extraction.
//!
//! Isolates the well-formed annual observations for one concept from a firm's
//! full fact history. Rules apply in a fixed order and every exclusion is
//! per-record: a firm with no admissible facts simply contributes nothing.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::domain::{CompanyFacts, FilingKind, FinancialFact, RawFact};

/// Why each raw entry was dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionStats {
    pub seen: usize,
    pub kept: usize,
    pub non_annual: usize,
    pub bad_end_date: usize,
    pub bad_duration: usize,
    pub out_of_range: usize,
    pub missing_value: usize,
}

impl ExtractionStats {
    pub fn absorb(&mut self, other: &ExtractionStats) {
        self.seen += other.seen;
        self.kept += other.kept;
        self.non_annual += other.non_annual;
        self.bad_end_date += other.bad_end_date;
        self.bad_duration += other.bad_duration;
        self.out_of_range += other.out_of_range;
        self.missing_value += other.missing_value;
    }
}

#[derive(Debug, Clone, Default)]
pub struct Extraction {
    pub facts: Vec<FinancialFact>,
    pub stats: ExtractionStats,
}

fn parse_date(s: Option<&str>) -> Option<NaiveDate> {
    s.and_then(|s| NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok())
}

enum Verdict {
    Keep(FinancialFact),
    NonAnnual,
    BadEndDate,
    BadDuration,
    OutOfRange,
    MissingValue,
}

fn judge(cik: u64, label: &str, raw: &RawFact, config: &PipelineConfig) -> Verdict {
    let kind = FilingKind::classify(raw.form.as_deref(), &config.acquisition.annual_forms);
    if kind != FilingKind::Annual {
        return Verdict::NonAnnual;
    }

    let Some(end) = parse_date(raw.end.as_deref()) else {
        return Verdict::BadEndDate;
    };

    // Duration concepts only; instants carry no start date.
    let start = match raw.start.as_deref() {
        None => None,
        Some(s) => {
            let Some(start) = parse_date(Some(s)) else {
                return Verdict::BadDuration;
            };
            let days = (end - start).num_days();
            let window = &config.extraction;
            if !(window.min_duration_days..=window.max_duration_days).contains(&days) {
                return Verdict::BadDuration;
            }
            Some(start)
        }
    };

    let data_year = end.year();
    if !config.years.contains(data_year) {
        return Verdict::OutOfRange;
    }

    let Some(value) = raw.val.filter(|v| v.is_finite()) else {
        return Verdict::MissingValue;
    };

    Verdict::Keep(FinancialFact {
        cik,
        data_year,
        concept: label.to_string(),
        value,
        filed: parse_date(raw.filed.as_deref()),
        filing_id: raw.accn.clone().unwrap_or_default(),
        period_end: end,
        period_start: start,
        fiscal_year: raw.fy,
        kind,
    })
}

/// Admissible annual facts for `tag`, relabelled as `label`, in input order.
pub fn extract_annual_facts(
    company: &CompanyFacts,
    tag: &str,
    label: &str,
    config: &PipelineConfig,
) -> Extraction {
    let mut out = Extraction::default();
    for raw in company.facts_for(tag) {
        out.stats.seen += 1;
        match judge(company.cik, label, raw, config) {
            Verdict::Keep(fact) => {
                out.stats.kept += 1;
                out.facts.push(fact);
            }
            Verdict::NonAnnual => out.stats.non_annual += 1,
            Verdict::BadEndDate => out.stats.bad_end_date += 1,
            Verdict::BadDuration => out.stats.bad_duration += 1,
            Verdict::OutOfRange => out.stats.out_of_range += 1,
            Verdict::MissingValue => out.stats.missing_value += 1,
        }
    }
    out
}

/// Extract every configured concept for one firm.
pub fn extract_company(company: &CompanyFacts, config: &PipelineConfig) -> Extraction {
    let mut out = Extraction::default();
    for concept in &config.concepts.tags {
        let part = extract_annual_facts(company, &concept.tag, &concept.label, config);
        out.stats.absorb(&part.stats);
        out.facts.extend(part.facts);
    }
    debug!(
        cik = company.cik,
        kept = out.stats.kept,
        seen = out.stats.seen,
        "extracted annual facts"
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const TAG: &str = "IncomeLossFromContinuingOperationsBeforeIncomeTaxesForeign";

    fn raw(start: Option<&str>, end: Option<&str>, form: &str, val: f64) -> RawFact {
        RawFact {
            start: start.map(String::from),
            end: end.map(String::from),
            val: Some(val),
            accn: Some("0000000000-21-000001".into()),
            fy: Some(2020),
            fp: Some("FY".into()),
            form: Some(form.into()),
            filed: Some("2021-02-15".into()),
        }
    }

    fn company(entries: Vec<RawFact>) -> CompanyFacts {
        let mut facts = BTreeMap::new();
        facts.insert(TAG.to_string(), entries);
        CompanyFacts {
            cik: 320193,
            entity_name: "Example Corp".into(),
            facts,
        }
    }

    fn run(entries: Vec<RawFact>) -> Extraction {
        extract_annual_facts(&company(entries), TAG, "foreign", &PipelineConfig::default())
    }

    #[test]
    fn keeps_full_year_annual_fact() {
        let out = run(vec![raw(Some("2020-01-01"), Some("2020-12-31"), "10-K", 100.0)]);
        assert_eq!(out.facts.len(), 1);
        let fact = &out.facts[0];
        assert_eq!(fact.data_year, 2020);
        assert_eq!(fact.concept, "foreign");
        assert_eq!(fact.kind, FilingKind::Annual);
        assert_eq!(fact.filed, NaiveDate::from_ymd_opt(2021, 2, 15));
    }

    #[test]
    fn drops_quarterly_form_and_quarterly_duration() {
        let out = run(vec![
            raw(Some("2020-01-01"), Some("2020-12-31"), "10-Q", 1.0),
            raw(Some("2020-10-01"), Some("2020-12-31"), "10-K", 2.0),
        ]);
        assert!(out.facts.is_empty());
        assert_eq!(out.stats.non_annual, 1);
        assert_eq!(out.stats.bad_duration, 1);
    }

    #[test]
    fn duration_window_is_inclusive() {
        // 2020-01-01 + 300 days = 2020-10-27; + 400 days = 2021-02-04.
        let out = run(vec![
            raw(Some("2020-01-01"), Some("2020-10-27"), "10-K", 1.0),
            raw(Some("2020-01-01"), Some("2021-02-04"), "10-K", 2.0),
            raw(Some("2020-01-01"), Some("2020-10-26"), "10-K", 3.0),
            raw(Some("2020-01-01"), Some("2021-02-05"), "10-K", 4.0),
        ]);
        let values: Vec<f64> = out.facts.iter().map(|f| f.value).collect();
        assert_eq!(values, vec![1.0, 2.0]);
        assert_eq!(out.stats.bad_duration, 2);
    }

    #[test]
    fn data_year_comes_from_period_end_not_filing() {
        let mut fact = raw(Some("2019-07-01"), Some("2020-06-30"), "10-K", 5.0);
        fact.filed = Some("2020-08-20".into());
        fact.fy = Some(2021);
        let out = run(vec![fact]);
        assert_eq!(out.facts[0].data_year, 2020);
    }

    #[test]
    fn multi_year_cumulative_figures_excluded() {
        let out = run(vec![raw(Some("2018-01-01"), Some("2020-12-31"), "10-K", 9.0)]);
        assert!(out.facts.is_empty());
    }

    #[test]
    fn malformed_dates_are_exclusions_not_errors() {
        let out = run(vec![
            raw(Some("2020-01-01"), Some("not-a-date"), "10-K", 1.0),
            raw(Some("garbage"), Some("2020-12-31"), "10-K", 2.0),
            raw(None, None, "10-K", 3.0),
            raw(Some("2020-01-01"), Some("2020-12-31"), "10-K", 4.0),
        ]);
        assert_eq!(out.facts.len(), 1);
        assert_eq!(out.stats.bad_end_date, 2);
        assert_eq!(out.stats.bad_duration, 1);
    }

    #[test]
    fn instant_facts_skip_the_duration_check() {
        let out = run(vec![raw(None, Some("2020-12-31"), "10-K", 1.0)]);
        assert_eq!(out.facts.len(), 1);
        assert!(out.facts[0].period_start.is_none());
    }

    #[test]
    fn years_outside_range_dropped() {
        let out = run(vec![
            raw(Some("2013-01-01"), Some("2013-12-31"), "10-K", 1.0),
            raw(Some("2025-01-01"), Some("2025-12-31"), "10-K", 2.0),
            raw(Some("2015-01-01"), Some("2015-12-31"), "10-K", 3.0),
            raw(Some("2024-01-01"), Some("2024-12-31"), "10-K", 4.0),
        ]);
        assert_eq!(out.facts.len(), 2);
        assert_eq!(out.stats.out_of_range, 2);
    }

    #[test]
    fn missing_tag_contributes_nothing() {
        let out = extract_annual_facts(
            &company(vec![]),
            "SomeOtherTag",
            "foreign",
            &PipelineConfig::default(),
        );
        assert!(out.facts.is_empty());
        assert_eq!(out.stats, ExtractionStats::default());
    }

    #[test]
    fn preserves_input_order() {
        let out = run(vec![
            raw(Some("2021-01-01"), Some("2021-12-31"), "10-K", 21.0),
            raw(Some("2019-01-01"), Some("2019-12-31"), "10-K", 19.0),
            raw(Some("2020-01-01"), Some("2020-12-31"), "10-K", 20.0),
        ]);
        let years: Vec<i32> = out.facts.iter().map(|f| f.data_year).collect();
        assert_eq!(years, vec![2021, 2019, 2020]);
    }

    #[test]
    fn extract_company_covers_every_concept() {
        let mut c = company(vec![raw(Some("2020-01-01"), Some("2020-12-31"), "10-K", 1.0)]);
        c.facts.insert(
            "IncomeLossFromContinuingOperationsBeforeIncomeTaxesDomestic".into(),
            vec![raw(Some("2020-01-01"), Some("2020-12-31"), "10-K", 2.0)],
        );
        let out = extract_company(&c, &PipelineConfig::default());
        let labels: Vec<&str> = out.facts.iter().map(|f| f.concept.as_str()).collect();
        assert_eq!(labels, vec!["foreign", "domestic"]);
        assert_eq!(out.stats.kept, 2);
    }
}
