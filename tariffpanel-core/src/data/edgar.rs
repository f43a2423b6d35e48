//! SEC EDGAR provider.
//!
//! Fetches the public ticker map and per-firm XBRL companyfacts documents.
//! Requests are spaced by a fixed throttle and carry the contact User-Agent
//! SEC requires. There are no retries: a failed firm is reported and skipped
//! by the acquisition loop.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use serde::Deserialize;

use super::provider::{DataError, FactsProvider};
use super::throttle::Throttle;
use crate::config::AcquisitionConfig;
use crate::domain::{Cik, CompanyFacts, CrosswalkEntry, RawFact};

/// Entry of `company_tickers.json`, keyed by "0", "1", ….
#[derive(Debug, Deserialize)]
struct TickerMapEntry {
    cik_str: Cik,
    ticker: String,
    title: String,
}

/// Top level of a companyfacts document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompanyFactsDocument {
    #[serde(default)]
    cik: Option<Cik>,
    #[serde(default)]
    entity_name: Option<String>,
    #[serde(default)]
    facts: HashMap<String, HashMap<String, ConceptEntry>>,
}

#[derive(Debug, Deserialize)]
struct ConceptEntry {
    #[serde(default)]
    units: HashMap<String, Vec<RawFact>>,
}

pub struct EdgarProvider {
    client: reqwest::blocking::Client,
    throttle: Throttle,
    config: AcquisitionConfig,
}

impl EdgarProvider {
    pub fn new(config: &AcquisitionConfig) -> Result<Self, DataError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| DataError::Client(e.to_string()))?;
        Ok(Self {
            client,
            throttle: Throttle::new(Duration::from_millis(config.request_delay_ms)),
            config: config.clone(),
        })
    }

    /// `…/companyfacts/CIK0000320193.json`
    pub fn company_facts_url(&self, cik: Cik) -> String {
        format!(
            "{}/CIK{cik:010}.json",
            self.config.company_facts_url.trim_end_matches('/')
        )
    }

    fn get(&self, url: &str, cik: Option<Cik>) -> Result<reqwest::blocking::Response, DataError> {
        self.throttle.wait();
        let resp = self.client.get(url).send().map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                DataError::NetworkUnreachable(e.to_string())
            } else {
                DataError::Other(e.to_string())
            }
        })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            if let Some(cik) = cik {
                return Err(DataError::CompanyNotFound { cik });
            }
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            return Err(DataError::Forbidden);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(DataError::RateLimited);
        }
        if !status.is_success() {
            return Err(DataError::Other(format!("HTTP {status} for {url}")));
        }
        Ok(resp)
    }
}

/// Flatten a companyfacts document to the configured taxonomy and unit.
fn into_company_facts(
    cik: Cik,
    doc: CompanyFactsDocument,
    config: &AcquisitionConfig,
) -> CompanyFacts {
    let mut facts = BTreeMap::new();
    if let Some(taxonomy) = doc.facts.get(&config.taxonomy) {
        for (tag, concept) in taxonomy {
            if let Some(entries) = concept.units.get(&config.unit) {
                facts.insert(tag.clone(), entries.clone());
            }
        }
    }
    CompanyFacts {
        cik: doc.cik.unwrap_or(cik),
        entity_name: doc.entity_name.unwrap_or_default(),
        facts,
    }
}

fn parse_ticker_map(map: HashMap<String, TickerMapEntry>) -> Vec<CrosswalkEntry> {
    let mut keyed: Vec<(u64, TickerMapEntry)> = map
        .into_iter()
        .map(|(k, v)| (k.parse::<u64>().unwrap_or(u64::MAX), v))
        .collect();
    keyed.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.ticker.cmp(&b.1.ticker)));
    keyed
        .into_iter()
        .map(|(_, e)| CrosswalkEntry {
            cik: e.cik_str,
            ticker: e.ticker.trim().to_uppercase(),
            company_name: e.title,
        })
        .collect()
}

impl FactsProvider for EdgarProvider {
    fn name(&self) -> &str {
        "sec_edgar"
    }

    fn ticker_map(&self) -> Result<Vec<CrosswalkEntry>, DataError> {
        let resp = self.get(&self.config.ticker_map_url, None)?;
        let map: HashMap<String, TickerMapEntry> = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse ticker map: {e}"))
        })?;
        Ok(parse_ticker_map(map))
    }

    fn fetch_company_facts(&self, cik: Cik) -> Result<CompanyFacts, DataError> {
        let url = self.company_facts_url(cik);
        let resp = self.get(&url, Some(cik))?;
        let doc: CompanyFactsDocument = resp.json().map_err(|e| {
            DataError::ResponseFormatChanged(format!("failed to parse companyfacts for CIK {cik}: {e}"))
        })?;
        Ok(into_company_facts(cik, doc, &self.config))
    }

    fn is_available(&self) -> bool {
        has_contact(&self.config.user_agent)
    }
}

/// SEC answers 403 to every request whose User-Agent lacks a contact address.
fn has_contact(user_agent: &str) -> bool {
    user_agent
        .split_whitespace()
        .any(|token| matches!(token.split_once('@'), Some((user, host)) if !user.is_empty() && host.contains('.')))
}
