//! Application configuration for etlflow.
//!
//! User config lives at `~/.etlflow/etlflow.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{EtlError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "etlflow.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".etlflow";

/// Records drained per batch unless a step says otherwise.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 100;

// ---------------------------------------------------------------------------
// Config structs (matching etlflow.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Base step options; each stage overrides only what it needs.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// MediaWiki API settings.
    #[serde(default)]
    pub wikipedia: WikipediaConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Maximum records handed to one batch (0 drains the whole queue).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Drop records whose dedup key was already seen by the step.
    #[serde(default = "default_true")]
    pub drop_duplicates: bool,

    /// Allow overlapping batches within one step.
    #[serde(default)]
    pub concurrent_batches: bool,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            drop_duplicates: true,
            concurrent_batches: false,
        }
    }
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}
fn default_true() -> bool {
    true
}

/// `[wikipedia]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikipediaConfig {
    /// MediaWiki `api.php` endpoint.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Titles per `action=query` request (MediaWiki caps this at 50).
    #[serde(default = "default_normalize_batch_size")]
    pub normalize_batch_size: usize,
}

impl Default for WikipediaConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            timeout_secs: default_timeout_secs(),
            normalize_batch_size: default_normalize_batch_size(),
        }
    }
}

impl WikipediaConfig {
    /// Parse the configured endpoint.
    pub fn api_url(&self) -> Result<Url> {
        Url::parse(&self.api_url)
            .map_err(|e| EtlError::config(format!("invalid wikipedia.api_url '{}': {e}", self.api_url)))
    }
}

fn default_api_url() -> String {
    "https://en.wikipedia.org/w/api.php".into()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_normalize_batch_size() -> usize {
    50
}

// ---------------------------------------------------------------------------
// Step options (runtime, merged from config + processor overrides)
// ---------------------------------------------------------------------------

/// Runtime options of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepOptions {
    /// Upper bound on records drained per tick; `0` drains everything queued.
    pub max_batch_size: usize,
    /// Silently discard records whose hash was seen before.
    pub drop_duplicates: bool,
    /// Dispatch a new batch each tick even while earlier batches still run.
    pub concurrent_batches: bool,
}

impl Default for StepOptions {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            drop_duplicates: true,
            concurrent_batches: false,
        }
    }
}

impl StepOptions {
    /// Same options with a different batch bound.
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Same options with duplicate dropping toggled.
    pub fn with_drop_duplicates(mut self, drop_duplicates: bool) -> Self {
        self.drop_duplicates = drop_duplicates;
        self
    }

    /// Same options with overlapping batches toggled.
    pub fn with_concurrent_batches(mut self, concurrent_batches: bool) -> Self {
        self.concurrent_batches = concurrent_batches;
        self
    }
}

impl From<&AppConfig> for StepOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_batch_size: config.defaults.max_batch_size,
            drop_duplicates: config.defaults.drop_duplicates,
            concurrent_batches: config.defaults.concurrent_batches,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.etlflow/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| EtlError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.etlflow/etlflow.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| EtlError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| EtlError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| EtlError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| EtlError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| EtlError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_batch_size"));
        assert!(toml_str.contains("en.wikipedia.org"));
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[defaults]
concurrent_batches = true

[wikipedia]
api_url = "http://localhost:8080/w/api.php"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert!(config.defaults.concurrent_batches);
        assert!(config.defaults.drop_duplicates);
        assert_eq!(config.defaults.max_batch_size, 100);
        assert_eq!(config.wikipedia.timeout_secs, 30);
        assert_eq!(config.wikipedia.normalize_batch_size, 50);
        assert_eq!(
            config.wikipedia.api_url().unwrap().as_str(),
            "http://localhost:8080/w/api.php"
        );
    }

    #[test]
    fn step_options_from_app_config() {
        let mut app = AppConfig::default();
        assert_eq!(StepOptions::from(&app), StepOptions::default());

        app.defaults.max_batch_size = 10;
        app.defaults.drop_duplicates = false;
        let options = StepOptions::from(&app);
        assert_eq!(options.max_batch_size, 10);
        assert!(!options.drop_duplicates);
        assert!(!options.concurrent_batches);
    }

    #[test]
    fn invalid_api_url_is_config_error() {
        let mut config = WikipediaConfig::default();
        config.api_url = "not a url".into();
        let err = config.api_url().unwrap_err();
        assert!(err.to_string().starts_with("config error"));
    }

    #[test]
    fn load_config_from_missing_file_is_io_error() {
        let path = std::env::temp_dir().join("etlflow-does-not-exist/etlflow.toml");
        let err = load_config_from(&path).unwrap_err();
        assert!(matches!(err, EtlError::Io { .. }));
    }
}
