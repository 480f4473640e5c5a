//! Store registry and global coordinator.
//!
//! The registry is the one object that knows every store. It is built once
//! at startup (see [`crate::app::AppStores`]) and handed around by reference;
//! tests build a fresh one each.
//!
//! The coordinator never touches domain state itself. It only calls each
//! store's own `reset()` and the flag controller's disable-all step.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::controller::{FeatureFlagController, PersistOutcome};
use crate::error::{Result, StateError};
use crate::events::{EventBus, StoreEvent};
use crate::store::ManagedStore;

/// Stores reset by [`StoreRegistry::reset_all_stores`], in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResetReport {
    pub store_ids: Vec<String>,
}

/// Result of [`StoreRegistry::emergency_rollback`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    /// Flags whose value went from on to off.
    pub flags_disabled: Vec<String>,
    /// Whether the all-off flag set reached storage.
    pub persist: PersistOutcome,
    pub reset: ResetReport,
}

pub struct StoreRegistry {
    stores: Vec<Arc<dyn ManagedStore>>,
    flags: Arc<FeatureFlagController>,
    events: EventBus,
}

impl fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("stores", &self.store_ids())
            .finish_non_exhaustive()
    }
}

impl StoreRegistry {
    /// Empty registry coordinating `flags`. The controller is not registered
    /// as a store until [`register`](Self::register) is called with it, so
    /// the caller decides its place in the reset order.
    pub fn new(flags: Arc<FeatureFlagController>, events: EventBus) -> Self {
        Self {
            stores: Vec::new(),
            flags,
            events,
        }
    }

    /// Add a store at the end of the reset order.
    pub fn register(&mut self, store: Arc<dyn ManagedStore>) -> Result<()> {
        let id = store.id();
        if self.stores.iter().any(|s| s.id() == id) {
            return Err(StateError::DuplicateStore {
                store_id: id.to_string(),
            });
        }
        debug!(store_id = id, "store registered");
        self.stores.push(store);
        Ok(())
    }

    /// Registered ids in reset order.
    pub fn store_ids(&self) -> Vec<&'static str> {
        self.stores.iter().map(|s| s.id()).collect()
    }

    pub fn get(&self, id: &str) -> Result<Arc<dyn ManagedStore>> {
        self.stores
            .iter()
            .find(|s| s.id() == id)
            .cloned()
            .ok_or_else(|| StateError::UnknownStore {
                store_id: id.to_string(),
            })
    }

    pub fn flags(&self) -> &Arc<FeatureFlagController> {
        &self.flags
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn all_pristine(&self) -> bool {
        self.stores.iter().all(|s| s.is_pristine())
    }

    /// Ids of stores that differ from their initial state.
    pub fn dirty_stores(&self) -> Vec<&'static str> {
        self.stores
            .iter()
            .filter(|s| !s.is_pristine())
            .map(|s| s.id())
            .collect()
    }

    /// Reset every store in registration order, each awaited before the
    /// next starts.
    pub async fn reset_all_stores(&self) -> ResetReport {
        let mut store_ids = Vec::with_capacity(self.stores.len());
        for store in &self.stores {
            store.reset().await;
            self.events.publish(StoreEvent::StoreReset {
                store_id: store.id().to_string(),
                timestamp: Utc::now(),
            });
            store_ids.push(store.id().to_string());
        }
        info!(count = store_ids.len(), "all stores reset");
        self.events.publish(StoreEvent::AllStoresReset {
            store_ids: store_ids.clone(),
            timestamp: Utc::now(),
        });
        ResetReport { store_ids }
    }

    /// Switch every flag off, then reset every store.
    ///
    /// Flags go off first so that any reset logic reading flags sees the
    /// rolled-back configuration. The resets run whatever happened to the
    /// flag write: the in-memory flags are off either way.
    pub async fn emergency_rollback(&self) -> RollbackReport {
        warn!("emergency rollback started");
        let update = self.flags.disable_all_flags().await;
        if update.persist == PersistOutcome::Failed {
            warn!("rolled-back flags were not persisted, continuing with reset");
        }

        let reset = self.reset_all_stores().await;

        self.events.publish(StoreEvent::EmergencyRollback {
            flags_disabled: update.changed.len(),
            persisted: update.persist == PersistOutcome::Written,
            timestamp: Utc::now(),
        });
        warn!(
            flags_disabled = update.changed.len(),
            stores_reset = reset.store_ids.len(),
            "emergency rollback finished"
        );

        RollbackReport {
            flags_disabled: update.changed,
            persist: update.persist,
            reset,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
