//! Error types for the cache adapter
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

use crate::store::StoreError;

// == Cache Error Enum ==
/// Unified error type for the cache adapter.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Store unreachable or the connection pool could not be built
    #[error("Connection error: {0}")]
    Connection(String),

    /// Key not found in the store
    #[error("Cache key [{0}] does not exist")]
    NotFound(String),

    /// Value could not be encoded for storage
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Stored bytes are neither a codec payload nor UTF-8 text
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Store rejected a command
    #[error("Store error: {0}")]
    Store(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<StoreError> for CacheError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => CacheError::Connection(msg),
            StoreError::WrongType(msg) | StoreError::Command(msg) => CacheError::Store(msg),
        }
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache adapter.
pub type Result<T> = std::result::Result<T, CacheError>;
