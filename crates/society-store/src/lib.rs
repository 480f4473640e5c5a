//! # society-store
//!
//! Storage layer for the society app runtime.
//!
//! Every failure below this crate's public surface is absorbed: backends may
//! error, but [`Storage`] hands callers `None`/`false`, and
//! [`PersistenceAdapter`] treats corrupt payloads as "nothing persisted".
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  PersistenceAdapter  ("ns:store" envelopes) │
//! ├─────────────────────────────────────────────┤
//! │  Storage  (probe / get / set / remove)      │
//! ├─────────────────────────────────────────────┤
//! │  StorageBackend                             │
//! │    MemoryBackend       (DashMap)            │
//! │    SqliteBackend       (rusqlite WAL)       │
//! │    UnavailableBackend  (always fails)       │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use society_store::{PersistenceAdapter, SqliteBackend, Storage};
//!
//! let backend = SqliteBackend::open_and_migrate("data/society.db").await?;
//! let storage = Storage::new(backend);
//! let adapter = PersistenceAdapter::new(storage, "society");
//! ```

pub mod backend;
pub mod error;
pub mod migration;
pub mod persistence;
pub mod sqlite;
pub mod storage;

// ── re-exports ───────────────────────────────────────────────────────

pub use backend::{MemoryBackend, StorageBackend, UnavailableBackend};
pub use error::{StoreError, StoreResult};
pub use persistence::{DEFAULT_NAMESPACE, PersistenceAdapter, SCHEMA_VERSION};
pub use sqlite::SqliteBackend;
pub use storage::{PROBE_KEY, Storage};
