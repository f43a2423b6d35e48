//! Flat-file artifacts passed between stages.
//!
//! Every stage reads its inputs from and writes its output to CSV files with a
//! header row, so each stage is re-runnable on its own.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{CrosswalkEntry, FinancialFact, FirmYearRecord, MergedPanelRow};

/// Conventional file names inside a run's data directory.
pub mod names {
    pub const CROSSWALK: &str = "sec_ticker_cik_mapping.csv";
    pub const RAW_FACTS: &str = "sec_raw_facts.csv";
    pub const INCOME_PANEL: &str = "sec_pretax_income_panel.csv";
    pub const MERGED_PANEL: &str = "merged_panel.csv";
    pub const FIRM_UNIVERSE: &str = "firm_universe.csv";
    pub const TARIFF_EXPOSURE: &str = "tariff_exposure_naics3.csv";
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("{path}: {message}")]
    Format { path: String, message: String },
}

impl ArtifactError {
    pub(crate) fn csv(path: &Path, source: csv::Error) -> Self {
        ArtifactError::Csv {
            path: path.display().to_string(),
            source,
        }
    }

    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Write rows as CSV, creating parent directories as needed.
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), ArtifactError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))?;
    }
    let mut wtr = csv::Writer::from_path(path).map_err(|e| ArtifactError::csv(path, e))?;
    for row in rows {
        wtr.serialize(row).map_err(|e| ArtifactError::csv(path, e))?;
    }
    wtr.flush().map_err(|e| ArtifactError::io(path, e))?;
    Ok(())
}

/// Read every row of a headered CSV file.
pub fn read_csv<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, ArtifactError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| ArtifactError::csv(path, e))?;
    rdr.deserialize()
        .collect::<Result<Vec<T>, _>>()
        .map_err(|e| ArtifactError::csv(path, e))
}

pub fn write_crosswalk(path: &Path, rows: &[CrosswalkEntry]) -> Result<(), ArtifactError> {
    write_csv(path, rows)
}

pub fn read_crosswalk(path: &Path) -> Result<Vec<CrosswalkEntry>, ArtifactError> {
    read_csv(path)
}

pub fn write_facts(path: &Path, rows: &[FinancialFact]) -> Result<(), ArtifactError> {
    write_csv(path, rows)
}

pub fn read_facts(path: &Path) -> Result<Vec<FinancialFact>, ArtifactError> {
    read_csv(path)
}

pub fn write_income_panel(path: &Path, rows: &[FirmYearRecord]) -> Result<(), ArtifactError> {
    write_csv(path, rows)
}

pub fn read_income_panel(path: &Path) -> Result<Vec<FirmYearRecord>, ArtifactError> {
    read_csv(path)
}

pub fn write_merged_panel(path: &Path, rows: &[MergedPanelRow]) -> Result<(), ArtifactError> {
    write_csv(path, rows)
}

pub fn read_merged_panel(path: &Path) -> Result<Vec<MergedPanelRow>, ArtifactError> {
    read_csv(path)
}
