//! Error types for the store.

use canopy_tree::DirectoryError;
use thiserror::Error;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored bytes that cannot be decoded
    #[error("Corrupt record at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<Error> for DirectoryError {
    fn from(e: Error) -> Self {
        DirectoryError::Storage(e.to_string())
    }
}
