use thiserror::Error;

/// Error taxonomy for the storage layer: configuration, connection,
/// not-found, limit-exceeded, and storage write failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage configuration error: {0}")]
    Configuration(String),

    #[error("storage connection failed: {0}")]
    Connection(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("size limit exceeded (max {max})")]
    LimitExceeded { max: usize },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("{0}")]
    Other(String),
}

pub type StorageResult<T> = Result<T, StorageError>;
