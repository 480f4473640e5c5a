//! Application wiring.
//!
//! [`AppStores`] builds the six domain stores over one persistence adapter
//! and registers them with a [`StoreRegistry`] in a fixed order.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use society_store::{
    DEFAULT_NAMESPACE, MemoryBackend, PersistenceAdapter, SqliteBackend, Storage,
    UnavailableBackend,
};
use tracing::{info, warn};

use crate::config::{BackendKind, StateConfig, StorageConfig};
use crate::controller::{FeatureFlagController, PersistOutcome};
use crate::domains::{AdminStore, AuthStore, NotificationStore, SocietyStore, ThemeStore};
use crate::error::Result;
use crate::events::EventBus;
use crate::registry::{ResetReport, RollbackReport, StoreRegistry};
use crate::store::ManagedStore;

/// Which persisted slices were found during [`AppStores::hydrate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HydrationReport {
    pub auth: bool,
    pub feature_flags: bool,
    pub theme: bool,
}

/// Which persisted slices were written during [`AppStores::flush`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    pub auth: bool,
    pub feature_flags: bool,
    pub theme: bool,
}

impl FlushReport {
    pub fn all_written(&self) -> bool {
        self.auth && self.feature_flags && self.theme
    }
}

pub struct AppStores {
    pub auth: Arc<AuthStore>,
    pub flags: Arc<FeatureFlagController>,
    pub theme: Arc<ThemeStore>,
    pub society: Arc<SocietyStore>,
    pub admin: Arc<AdminStore>,
    pub notifications: Arc<NotificationStore>,
    registry: StoreRegistry,
    persistence: PersistenceAdapter,
}

impl AppStores {
    /// Build every store over `persistence`, with `overrides` layered on the
    /// flag defaults.
    pub fn new(
        persistence: PersistenceAdapter,
        overrides: &BTreeMap<String, bool>,
    ) -> Result<Self> {
        let events = EventBus::default();

        let auth = Arc::new(AuthStore::new().with_persistence(persistence.clone()));
        let flags = Arc::new(
            FeatureFlagController::with_overrides(overrides)
                .with_persistence(persistence.clone())
                .with_events(events.clone()),
        );
        let theme = Arc::new(ThemeStore::new().with_persistence(persistence.clone()));
        let society = Arc::new(SocietyStore::create());
        let admin = Arc::new(AdminStore::create());
        let notifications = Arc::new(NotificationStore::create());

        let mut registry = StoreRegistry::new(Arc::clone(&flags), events);
        let ordered: [Arc<dyn ManagedStore>; 6] = [
            auth.clone(),
            flags.clone(),
            theme.clone(),
            society.clone(),
            admin.clone(),
            notifications.clone(),
        ];
        for store in ordered {
            registry.register(store)?;
        }

        Ok(Self {
            auth,
            flags,
            theme,
            society,
            admin,
            notifications,
            registry,
            persistence,
        })
    }

    /// Memory-only stores with default flags.
    pub fn in_memory() -> Result<Self> {
        let persistence = PersistenceAdapter::new(Storage::in_memory(), DEFAULT_NAMESPACE);
        Self::new(persistence, &BTreeMap::new())
    }

    /// Open the configured storage and build the stores over it.
    ///
    /// Storage that cannot be opened or fails its probe is logged and the
    /// stores run memory-only.
    pub async fn from_config(config: &StateConfig) -> Result<Self> {
        let storage = open_storage(&config.storage).await;
        if !storage.probe().await {
            warn!(
                backend = storage.backend_name(),
                "storage unavailable, state will not survive restarts"
            );
        }
        let persistence = PersistenceAdapter::new(storage, config.storage.namespace.clone());
        Self::new(persistence, &config.flags.overrides)
    }

    pub fn registry(&self) -> &StoreRegistry {
        &self.registry
    }

    /// Mutable access for registering additional stores.
    pub fn registry_mut(&mut self) -> &mut StoreRegistry {
        &mut self.registry
    }

    pub fn persistence(&self) -> &PersistenceAdapter {
        &self.persistence
    }

    /// Load every persisted slice. Missing or corrupt slices leave the
    /// store at its defaults.
    pub async fn hydrate(&self) -> HydrationReport {
        let report = HydrationReport {
            auth: self.auth.hydrate().await,
            feature_flags: self.flags.hydrate().await,
            theme: self.theme.hydrate().await,
        };
        info!(
            auth = report.auth,
            feature_flags = report.feature_flags,
            theme = report.theme,
            "stores hydrated"
        );
        report
    }

    /// Write every persisted slice from the current in-memory state.
    pub async fn flush(&self) -> FlushReport {
        let report = FlushReport {
            auth: self.auth.flush().await,
            feature_flags: self.flags.flush().await == PersistOutcome::Written,
            theme: self.theme.flush().await,
        };
        info!(
            auth = report.auth,
            feature_flags = report.feature_flags,
            theme = report.theme,
            "stores flushed"
        );
        report
    }

    pub async fn reset_all_stores(&self) -> ResetReport {
        self.registry.reset_all_stores().await
    }

    pub async fn emergency_rollback(&self) -> RollbackReport {
        self.registry.emergency_rollback().await
    }
}

async fn open_storage(config: &StorageConfig) -> Storage {
    match config.backend {
        BackendKind::Memory => Storage::new(MemoryBackend::new()),
        BackendKind::Sqlite => {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    warn!(path = %parent.display(), error = %e, "cannot create storage directory");
                }
            }
            match SqliteBackend::open_and_migrate(config.path.clone()).await {
                Ok(backend) => Storage::new(backend),
                Err(e) => {
                    warn!(path = %config.path.display(), error = %e, "cannot open storage");
                    Storage::new(UnavailableBackend::new(e.to_string()))
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
