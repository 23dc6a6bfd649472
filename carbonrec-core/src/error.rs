//! Error types for the carbonrec-core crate.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for harness operations.
#[derive(Debug, Error)]
pub enum CarbonError {
    #[error("Grid specification error at line {line}: {reason} (`{text}`)")]
    Grid {
        line: usize,
        text: String,
        reason: String,
    },

    #[error("Grid size overflows u64")]
    GridOverflow,

    #[error("CSV header mismatch for {}: expected {expected:?}, found {found:?}", path.display())]
    HeaderMismatch {
        path: PathBuf,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Trainer error: {0}")]
    Trainer(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflicting cache targets: {0}")]
    CacheConflict(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl CarbonError {
    pub fn grid(line: usize, text: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Grid {
            line,
            text: text.into(),
            reason: reason.into(),
        }
    }

    pub fn trainer(msg: impl Into<String>) -> Self {
        Self::Trainer(msg.into())
    }

    pub fn dataset(msg: impl Into<String>) -> Self {
        Self::Dataset(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = CarbonError> = std::result::Result<T, E>;
