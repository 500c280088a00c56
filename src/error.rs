//! Error types for the Gamiforge generation backend.
//!
//! Individual remote jobs never surface these: a failed job is an
//! [`Outcome::Failure`](crate::job::Outcome) value. `ForgeError` is reserved for
//! configuration problems, malformed batches/pipelines and local storage faults.

use std::path::PathBuf;
use thiserror::Error;

/// Storage-related errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Another writer currently holds {0:?}")]
    ConcurrentWriter(PathBuf),

    #[error("Not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Crate-level errors
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid batch: {0}")]
    InvalidBatch(String),

    #[error("Invalid pipeline: {0}")]
    InvalidPipeline(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<config::ConfigError> for ForgeError {
    fn from(err: config::ConfigError) -> Self {
        ForgeError::ConfigError(err.to_string())
    }
}
