//! Tariff panel core: building the firm-year analysis panel.
//!
//! This crate covers everything up to the merged panel:
//! - Run configuration threaded through every stage
//! - SEC acquisition (ticker map, companyfacts) with a fixed request throttle
//! - Fiscal-record extraction of admissible annual facts
//! - Firm-year reconciliation with the income identity gate
//! - Vendor and tariff-exposure loaders
//! - Cross-source merge with cardinality-checked joins
//! - CSV artifacts between stages and a deterministic RNG hierarchy

pub mod artifacts;
pub mod config;
pub mod crosswalk;
pub mod data;
pub mod domain;
pub mod extract;
pub mod merge;
pub mod panel;
pub mod rng;
pub mod stats;
pub mod tariff;
pub mod vendor;

pub use artifacts::ArtifactError;
pub use config::{ConfigError, PipelineConfig};
pub use crosswalk::{Crosswalk, JoinStats};
pub use domain::{
    Cik, CompanyFacts, CrosswalkEntry, FinancialFact, FirmYearRecord, MergedPanelRow, RawFact,
    TariffExposure, VendorFirm, VendorYear,
};
pub use merge::{merge_panel, MergeError, MergeInputs, MergeOutcome, MergeReport};
pub use panel::{build_panel, PanelBuild, PanelReport};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types handed across threads are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<PipelineConfig>();
        require_sync::<PipelineConfig>();
        require_send::<MergedPanelRow>();
        require_sync::<MergedPanelRow>();
        require_send::<FirmYearRecord>();
        require_sync::<FirmYearRecord>();
        require_send::<rng::RngHierarchy>();
        require_sync::<rng::RngHierarchy>();
        require_send::<data::EdgarProvider>();
        require_sync::<data::EdgarProvider>();
    }
}
