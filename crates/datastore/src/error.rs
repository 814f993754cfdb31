//! Entity store error types.

use thiserror::Error;

/// Entity store operation errors.
#[derive(Debug, Error)]
pub enum DatastoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for entity store operations.
pub type DatastoreResult<T> = std::result::Result<T, DatastoreError>;
