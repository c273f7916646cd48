//! Error types for etlflow.
//!
//! Library crates use [`EtlError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::sync::Arc;

/// Top-level error type for all etlflow operations.
#[derive(Debug, thiserror::Error)]
pub enum EtlError {
    /// Pipeline wiring or configuration error (e.g. starting an empty chain).
    #[error("config error: {message}")]
    Config { message: String },

    /// A batch-processing operation failed inside a step.
    ///
    /// The underlying failure is shared so every later completion check can
    /// surface it again.
    #[error("step '{step}' failed: {source}")]
    Processing {
        step: String,
        #[source]
        source: Arc<EtlError>,
    },

    /// A spawned batch task ended without producing an outcome (panic or cancellation).
    #[error("task error: {0}")]
    Task(String),

    /// Network/HTTP error raised by a processor.
    #[error("network error: {0}")]
    Network(String),

    /// Response or document parsing error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unexpected shape, missing page, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, EtlError>;

impl EtlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a retained batch failure with the name of the step that raised it.
    pub fn processing(step: impl Into<String>, source: Arc<EtlError>) -> Self {
        Self::Processing {
            step: step.into(),
            source,
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error came out of a step's batch operation.
    pub fn is_processing(&self) -> bool {
        matches!(self, Self::Processing { .. })
    }
}
