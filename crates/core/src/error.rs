//! Error types for Turnstore.
//!
//! This module defines a unified error enum covering the storage taxonomy
//! (I/O, embedding, on-disk format) along with configuration and
//! serialization failures.

use std::path::PathBuf;
use thiserror::Error;

/// Unified error type for Turnstore.
///
/// All fallible operations return `Result<T, AppError>`. Errors are
/// propagated to the caller of the public operation in progress; nothing
/// is retried or swallowed inside the store.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O and filesystem errors on the record log or the vector index
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The embedding provider failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// The persisted index (or a log record) could not be decoded
    #[error("Format error: {0}")]
    Format(String),

    /// Another live store holds the storage directory
    #[error("Storage directory is locked by another store: {0:?}")]
    Locked(PathBuf),

    /// Operation attempted on a store that has been closed
    #[error("Store is closed")]
    Closed,

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
