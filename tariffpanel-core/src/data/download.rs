//! Acquisition loop: fetch each target firm's facts and extract the tracked
//! concepts, counting failures instead of aborting.

use std::collections::HashMap;

use super::provider::{AcquireProgress, DataError, FactsProvider};
use crate::config::PipelineConfig;
use crate::domain::{Cik, FinancialFact};
use crate::extract::{extract_company, ExtractionStats};

/// Sequentially fetch and extract every target firm.
///
/// Requests are issued one at a time; the provider owns the throttle. A
/// per-firm failure is recorded and the loop moves on. A firm with no
/// companyfacts document (HTTP 404) is skipped without counting as a failure.
pub fn acquire_facts(
    provider: &dyn FactsProvider,
    ciks: &[Cik],
    config: &PipelineConfig,
    progress: &dyn AcquireProgress,
) -> AcquireSummary {
    let total = ciks.len();
    let mut summary = AcquireSummary {
        total,
        ..Default::default()
    };

    for (i, &cik) in ciks.iter().enumerate() {
        progress.on_start(cik, i, total);

        let result = if !provider.is_available() {
            Err(DataError::Unavailable(format!("{} refused to issue requests", provider.name())))
        } else {
            provider.fetch_company_facts(cik).map(|company| {
                let extraction = extract_company(&company, config);
                if !company.entity_name.is_empty() {
                    summary.entity_names.insert(cik, company.entity_name);
                }
                summary.extraction.absorb(&extraction.stats);
                let n = extraction.facts.len();
                summary.facts.extend(extraction.facts);
                n
            })
        };
        progress.on_complete(cik, i, total, &result);

        match result {
            Ok(0) => {
                summary.succeeded += 1;
                summary.without_facts += 1;
            }
            Ok(_) => summary.succeeded += 1,
            Err(DataError::CompanyNotFound { .. }) => summary.not_found += 1,
            Err(e) => {
                summary.failed += 1;
                summary.errors.push((cik, e));
            }
        }
    }

    progress.on_batch_complete(summary.succeeded, summary.failed, total);
    summary
}

/// Outcome of an acquisition run.
#[derive(Debug, Default)]
pub struct AcquireSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Fetched successfully but contributed no admissible facts.
    pub without_facts: usize,
    /// No companyfacts document exists (HTTP 404); skipped, not a failure.
    pub not_found: usize,
    pub facts: Vec<FinancialFact>,
    pub entity_names: HashMap<Cik, String>,
    pub extraction: ExtractionStats,
    pub errors: Vec<(Cik, DataError)>,
}

impl AcquireSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::SilentProgress;
    use crate::domain::{CompanyFacts, CrosswalkEntry, RawFact};
    use std::collections::BTreeMap;

    struct CannedProvider {
        firms: HashMap<Cik, CompanyFacts>,
        available: bool,
    }

    impl FactsProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn ticker_map(&self) -> Result<Vec<CrosswalkEntry>, DataError> {
            Ok(vec![])
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn fetch_company_facts(&self, cik: Cik) -> Result<CompanyFacts, DataError> {
            match cik {
                500 => Err(DataError::ResponseFormatChanged("truncated body".into())),
                _ => self
                    .firms
                    .get(&cik)
                    .cloned()
                    .ok_or(DataError::CompanyNotFound { cik }),
            }
        }
    }

    fn firm(cik: Cik, n_years: i32) -> CompanyFacts {
        let config = PipelineConfig::default();
        let tag = config.tag_for("total_v1").unwrap().to_string();
        let entries = (0..n_years)
            .map(|k| {
                let y = 2016 + k;
                RawFact {
                    start: Some(format!("{y}-01-01")),
                    end: Some(format!("{y}-12-31")),
                    val: Some(1_000.0 * (k + 1) as f64),
                    accn: Some(format!("accn-{y}")),
                    fy: Some(y),
                    fp: Some("FY".into()),
                    form: Some("10-K".into()),
                    filed: Some(format!("{}-02-15", y + 1)),
                }
            })
            .collect();
        let mut facts = BTreeMap::new();
        facts.insert(tag, entries);
        CompanyFacts {
            cik,
            entity_name: format!("Firm {cik}"),
            facts,
        }
    }

    #[test]
    fn failures_are_counted_not_fatal() {
        let mut firms = HashMap::new();
        firms.insert(1, firm(1, 3));
        firms.insert(2, firm(2, 0));
        let provider = CannedProvider { firms, available: true };
        let summary = acquire_facts(
            &provider,
            &[1, 404, 2, 500],
            &PipelineConfig::default(),
            &SilentProgress,
        );
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.error_count(), 1);
        assert_eq!(summary.without_facts, 1);
        assert_eq!(summary.facts.len(), 3);
        assert!(!summary.all_succeeded());
        assert_eq!(summary.entity_names.get(&1).map(String::as_str), Some("Firm 1"));
        assert!(matches!(summary.errors[0], (500, DataError::ResponseFormatChanged(_))));
    }

    #[test]
    fn missing_companyfacts_is_a_skip() {
        let mut firms = HashMap::new();
        firms.insert(1, firm(1, 2));
        let provider = CannedProvider { firms, available: true };
        let summary = acquire_facts(&provider, &[1, 404], &PipelineConfig::default(), &SilentProgress);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.not_found, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.error_count(), 0);
        assert!(summary.all_succeeded());
    }

    #[test]
    fn unavailable_provider_fails_every_firm_without_fetching() {
        let mut firms = HashMap::new();
        firms.insert(1, firm(1, 2));
        let provider = CannedProvider { firms, available: false };
        let summary = acquire_facts(&provider, &[1, 2], &PipelineConfig::default(), &SilentProgress);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.succeeded, 0);
        assert!(summary.facts.is_empty());
        assert!(summary.errors.iter().all(|(_, e)| matches!(e, DataError::Unavailable(_))));
    }
}
