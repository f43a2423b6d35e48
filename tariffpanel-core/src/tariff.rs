//! Industry tariff-exposure table.

use std::path::Path;

use tracing::{info, warn};

use crate::artifacts::{read_csv, ArtifactError};
use crate::domain::TariffExposure;
use crate::vendor::parse_code;

/// Load the exposure table, normalizing industry codes written as floats.
///
/// Rows with an unusable code are dropped and logged. Duplicate codes are
/// kept: the merge rejects them as a cardinality violation.
pub fn load_tariff_exposure(path: &Path) -> Result<Vec<TariffExposure>, ArtifactError> {
    let rows: Vec<TariffExposure> = read_csv(path)?;
    let n_in = rows.len();
    let rows: Vec<TariffExposure> = rows
        .into_iter()
        .filter_map(|mut r| {
            r.naics3 = parse_code(&r.naics3)?;
            Some(r)
        })
        .collect();
    if rows.len() < n_in {
        warn!(dropped = n_in - rows.len(), "tariff rows without a usable industry code");
    }
    info!(industries = rows.len(), "loaded tariff exposure");
    Ok(rows)
}
