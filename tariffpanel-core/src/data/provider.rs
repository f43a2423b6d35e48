//! Facts provider trait and structured acquisition errors.
//!
//! `FactsProvider` abstracts over the SEC endpoint so the acquisition loop can
//! be driven by a canned provider in tests.

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::{Cik, CompanyFacts, CrosswalkEntry};

/// Per-firm acquisition failures. None of these abort a run.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("rate limited by provider")]
    RateLimited,

    #[error("request refused (HTTP 403); check the User-Agent contact")]
    Forbidden,

    #[error("no companyfacts document for CIK {cik}")]
    CompanyNotFound { cik: Cik },

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("data error: {0}")]
    Other(String),
}

pub trait FactsProvider: Send + Sync {
    /// Human-readable name of this provider.
    fn name(&self) -> &str;

    /// Every ticker the provider knows, with its CIK and registrant name.
    fn ticker_map(&self) -> Result<Vec<CrosswalkEntry>, DataError>;

    /// A firm's full history of tagged facts.
    fn fetch_company_facts(&self, cik: Cik) -> Result<CompanyFacts, DataError>;

    /// Whether requests can be issued at all. The acquisition loop skips
    /// every firm, counting it as failed, while this is false.
    fn is_available(&self) -> bool;
}

/// Progress callback for the per-firm acquisition loop.
pub trait AcquireProgress: Send {
    fn on_start(&self, cik: Cik, index: usize, total: usize);

    fn on_complete(&self, cik: Cik, index: usize, total: usize, result: &Result<usize, DataError>);

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize);
}

/// Reports acquisition progress through `tracing`.
pub struct TracingProgress {
    /// Emit a progress line every `every` firms.
    pub every: usize,
}

impl Default for TracingProgress {
    fn default() -> Self {
        Self { every: 100 }
    }
}

impl AcquireProgress for TracingProgress {
    fn on_start(&self, _cik: Cik, index: usize, total: usize) {
        if self.every > 0 && index % self.every == 0 {
            info!("[{}/{}] fetching companyfacts", index + 1, total);
        }
    }

    fn on_complete(&self, cik: Cik, _index: usize, _total: usize, result: &Result<usize, DataError>) {
        match result {
            Err(DataError::CompanyNotFound { .. }) => debug!(cik, "no companyfacts document"),
            Err(e) => warn!(cik, error = %e, "companyfacts fetch failed"),
            Ok(_) => {}
        }
    }

    fn on_batch_complete(&self, succeeded: usize, failed: usize, total: usize) {
        info!(succeeded, failed, total, "acquisition complete");
    }
}

/// Discards all progress events.
pub struct SilentProgress;

impl AcquireProgress for SilentProgress {
    fn on_start(&self, _cik: Cik, _index: usize, _total: usize) {}

    fn on_complete(&self, _cik: Cik, _index: usize, _total: usize, _result: &Result<usize, DataError>) {}

    fn on_batch_complete(&self, _succeeded: usize, _failed: usize, _total: usize) {}
}
