//! SEC data acquisition: provider, request throttle, per-firm download loop.

pub mod download;
pub mod edgar;
pub mod provider;
pub mod throttle;

pub use download::{acquire_facts, AcquireSummary};
pub use edgar::EdgarProvider;
pub use provider::{AcquireProgress, DataError, FactsProvider, SilentProgress, TracingProgress};
pub use throttle::Throttle;
