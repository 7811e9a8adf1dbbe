//! Error types for fetching, persistence and configuration.
//!
//! Only [`PersistenceError`] and [`ConfigError`] are allowed to abort a run.
//! [`FetchError`] is always absorbed by the retry controller, and "no prices
//! found" is an empty candidate list rather than an error.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures of a single fetch attempt against a page session.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Navigation failed: {0}")]
    Navigation(String),

    #[error("Page session error: {0}")]
    Session(String),
}

/// Failures reading or writing batch state and output files.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt state file {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to serialize state: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
