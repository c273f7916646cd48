//! Shared error model and configuration for etlflow.
//!
//! This crate is the foundation depended on by all other etlflow crates.
//! It provides:
//! - [`EtlError`]: the unified error type
//! - Configuration ([`AppConfig`], [`StepOptions`], config loading)

pub mod config;
pub mod error;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DEFAULT_MAX_BATCH_SIZE, DefaultsConfig, StepOptions, WikipediaConfig, config_dir,
    config_file_path, init_config, load_config, load_config_from,
};
pub use error::{EtlError, Result};
