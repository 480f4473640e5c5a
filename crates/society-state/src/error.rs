//! Runtime error types.
//!
//! Store operations themselves never fail: infrastructure problems degrade to
//! in-memory operation and domain problems land in each store's `error`
//! field. [`StateError`] covers the remaining construction-time failures:
//! wiring the registry and loading configuration.

use society_store::StoreError;

/// Unified error type for the society-state crate.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A store with the same id is already registered.
    #[error("store already registered: {store_id}")]
    DuplicateStore { store_id: String },

    /// No store with this id is registered.
    #[error("store not found: {store_id}")]
    UnknownStore { store_id: String },

    /// Configuration could not be read or is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Opening the storage backend failed.
    #[error("storage setup failed: {0}")]
    Storage(#[from] StoreError),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StateError>;
