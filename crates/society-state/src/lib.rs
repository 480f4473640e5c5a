//! Store runtime for the society app.
//!
//! This crate holds the app's client-side state:
//!
//! - **[`store`]** -- The store contract: observable, resettable state over
//!   [`tokio::sync::watch`], with optional persisted slices.
//! - **[`domains`]** -- Auth, theme, society, admin and notification stores.
//! - **[`list`]** -- Shared paging, filtering and selection for list stores.
//! - **[`controller`]** -- Feature-flag store with single, batch, group and
//!   migration rollout, remote refresh and disable-all.
//! - **[`flags`]** -- Known flags, their defaults and groups.
//! - **[`remote`]** -- Remote flag source over [`reqwest`].
//! - **[`registry`]** -- Store registry, `reset_all_stores` and
//!   `emergency_rollback`.
//! - **[`events`]** -- Cross-store event bus backed by
//!   [`tokio::sync::broadcast`].
//! - **[`app`]** -- Wires every store over one persistence adapter.
//! - **[`config`]** -- TOML configuration with environment overrides.
//! - **[`error`]** -- Construction-time error types via [`thiserror`].
//!
//! Store operations do not return errors. Storage and network failures are
//! logged and degrade to in-memory behavior; validation failures land in the
//! store's `error` field.

pub mod app;
pub mod config;
pub mod controller;
pub mod domains;
pub mod error;
pub mod events;
pub mod flags;
pub mod list;
pub mod registry;
pub mod remote;
pub mod services;
pub mod store;

pub use app::{AppStores, FlushReport, HydrationReport};
pub use config::{BackendKind, FlagsConfig, StateConfig, StorageConfig};
pub use controller::{
    FeatureFlagController, FeatureFlagState, FlagUpdate, PersistOutcome, RefreshOutcome,
};
pub use error::{Result, StateError};
pub use events::{EventBus, StoreEvent};
pub use flags::{FeatureFlag, MigrationStatus};
pub use list::{ListItem, ListState, ListStore, SortOrder};
pub use registry::{ResetReport, RollbackReport, StoreRegistry};
pub use remote::{FlagSource, FlagSourceError, HttpFlagSource};
pub use services::{AuthService, Credentials, DirectoryService, NotificationService, ServiceError};
pub use store::{ManagedStore, PersistedState, Store, StoreState};
