//! Wikipedia city stages built on the etlflow engine.
//!
//! This crate provides:
//! - [`WikiClient`]: the MediaWiki API calls the stages need
//! - [`stages`]: batch processors: normalize names, fetch parse trees, expand counties
//! - [`parsetree`]: lookups over MediaWiki XML parse trees
//! - [`city_pipeline`]: the three stages chained into one pipeline

pub mod client;
pub mod parsetree;
pub mod record;
pub mod stages;

use std::sync::Arc;

use etlflow_core::{Pipeline, Step, StepOptions};
use etlflow_shared::AppConfig;

pub use client::{Resolution, WikiClient};
pub use record::CityRecord;
pub use stages::{ExpandCounty, FetchParseTree, NormalizeCityNames};

/// Chain normalization, parse-tree retrieval and county expansion, seeded
/// with `cities`.
///
/// Every step starts from the `[defaults]` options of `config`; each stage
/// then overrides what it needs.
pub fn city_pipeline(
    client: Arc<WikiClient>,
    config: &AppConfig,
    cities: impl IntoIterator<Item = String>,
) -> Pipeline<CityRecord> {
    let defaults = StepOptions::from(config);
    Pipeline::new([
        Step::with_defaults(
            "normalize",
            NormalizeCityNames::new(client.clone(), config.wikipedia.normalize_batch_size),
            defaults,
        ),
        Step::with_defaults("parse-tree", FetchParseTree::new(client.clone()), defaults),
        Step::with_defaults("county", ExpandCounty::new(client), defaults),
    ])
    .with_initial_data(cities.into_iter().map(CityRecord::name))
}
