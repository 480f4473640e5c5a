//! Error types for the society-store crate.
//!
//! Backends return [`StoreError`] via [`StoreResult`]. These errors never
//! escape the [`Storage`](crate::Storage) boundary: the abstraction converts
//! them into `false` / `None` results after logging.

use thiserror::Error;

/// Alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur inside a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite operation failed.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization or deserialization failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A schema migration failed.
    #[error("migration v{version} failed: {message}")]
    Migration { version: u32, message: String },

    /// The backend cannot be used at all (missing permissions, simulated
    /// environment, quota exhausted).
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An invalid argument was provided to a backend operation.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A blocking task was cancelled or panicked.
    #[error("background task failed: {0}")]
    TaskJoin(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::TaskJoin(err.to_string())
    }
}
