//! Error types for the document store library.

use thiserror::Error;

/// Result type alias for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur while reading or writing documents.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// `update` targeted a document that does not exist
    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: String },

    /// A batch would exceed the store's per-commit operation limit
    #[error("Batch limit exceeded: at most {limit} operations per commit")]
    BatchLimitExceeded { limit: usize },

    /// Field path is empty or contains an empty segment
    #[error("Invalid field path: {0:?}")]
    InvalidPath(String),

    /// A nested write crossed a field that is not a map
    #[error("Field {path} in {collection}/{id} is not a map")]
    TypeMismatch {
        collection: String,
        id: String,
        path: String,
    },

    /// Failure injected by a test double
    #[error("Injected failure: {0}")]
    Injected(String),

    /// Generic error with context
    #[error("Store error: {0}")]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    /// Check if error is transient (a retry on the next run may succeed)
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Database(sqlx_err) => matches!(
                sqlx_err,
                sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_)
            ),
            StoreError::Injected(_) => true,
            _ => false,
        }
    }
}
