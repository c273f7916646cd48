//! Batch processors of the city pipeline.
//!
//! - [`NormalizeCityNames`]: resolve input names to canonical page titles
//! - [`FetchParseTree`]: attach each city's page parse tree
//! - [`ExpandCounty`]: expand a city into the cities of its county navbox

mod county;
mod normalize;
mod parse_tree;

pub use county::ExpandCounty;
pub use normalize::NormalizeCityNames;
pub use parse_tree::FetchParseTree;

use etlflow_shared::{EtlError, Result};

use crate::record::CityRecord;

/// Error for a record that reached a stage it was not wired for.
fn unexpected(stage: &str, record: &CityRecord) -> EtlError {
    EtlError::validation(format!(
        "{stage} received a '{}' record",
        record.kind()
    ))
}

/// Titles of a batch of `Name` records.
fn names(stage: &str, batch: Vec<CityRecord>) -> Result<Vec<String>> {
    batch
        .into_iter()
        .map(|record| match record {
            CityRecord::Name { title } => Ok(title),
            other => Err(unexpected(stage, &other)),
        })
        .collect()
}
