//! Feature flag controller.
//!
//! The feature-flag store plus the rollout operations built on it: single
//! flags, batches, named groups, migration flags, remote refresh and the
//! disable-everything step of an emergency rollback.
//!
//! Every mutating operation follows the same two steps:
//!
//! 1. apply the whole change to the in-memory state in one transition, so
//!    observers are notified once and readers see the new values immediately;
//! 2. persist the flag slice, awaiting the write only to report the
//!    [`PersistOutcome`].
//!
//! No operation fails. A write that does not land leaves the in-memory
//! values in place; a refresh that cannot reach its source leaves every flag
//! as it was.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use society_store::PersistenceAdapter;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::events::{EventBus, StoreEvent};
use crate::flags::{FeatureFlag, MigrationStatus, default_flags, default_groups};
use crate::remote::FlagSource;
use crate::store::{ManagedStore, PersistedState, Store};

/// Store id of the feature-flag store.
pub const STORE_ID: &str = "feature_flags";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFlagState {
    /// Every flag value, known and remotely delivered.
    pub flags: BTreeMap<String, bool>,
    /// Group name to member keys.
    pub groups: BTreeMap<String, BTreeSet<String>>,
    /// When the last successful remote refresh finished.
    pub last_refreshed: Option<DateTime<Utc>>,
    pub is_loading: bool,
    pub error: Option<String>,
}

crate::impl_store_state!(FeatureFlagState);

impl FeatureFlagState {
    /// Defaults for every known flag with `overrides` applied on top.
    ///
    /// Migration flags always start off; they are only switched on through
    /// the rollout operations, so an emergency rollback can return the store
    /// to its initial state and still leave every migration flag off.
    pub fn with_overrides(overrides: &BTreeMap<String, bool>) -> Self {
        let mut flags = default_flags();
        for (key, enabled) in overrides {
            if FeatureFlag::from_key(key).is_some_and(FeatureFlag::is_migration) {
                debug!(key = %key, "ignoring override of migration flag");
                continue;
            }
            flags.insert(key.clone(), *enabled);
        }
        Self {
            flags,
            groups: default_groups(),
            last_refreshed: None,
            is_loading: false,
            error: None,
        }
    }

    fn value(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }
}

impl Default for FeatureFlagState {
    fn default() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }
}

/// Durable part of [`FeatureFlagState`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlagSlice {
    pub flags: BTreeMap<String, bool>,
    #[serde(default)]
    pub last_refreshed: Option<DateTime<Utc>>,
}

impl PersistedState for FeatureFlagState {
    type Slice = FeatureFlagSlice;

    fn to_slice(&self) -> FeatureFlagSlice {
        FeatureFlagSlice {
            flags: self.flags.clone(),
            last_refreshed: self.last_refreshed,
        }
    }

    fn apply_slice(&mut self, slice: FeatureFlagSlice) {
        // Persisted values win over defaults; keys added in newer builds keep
        // their defaults.
        self.flags.extend(slice.flags);
        self.last_refreshed = slice.last_refreshed;
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to the write that followed an in-memory change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PersistOutcome {
    /// The flag slice reached storage.
    Written,
    /// Storage rejected the write; memory holds the new values regardless.
    Failed,
    /// Nothing was written (no persistence configured, or nothing to apply).
    #[default]
    Skipped,
}

impl PersistOutcome {
    fn from_written(written: bool) -> Self {
        if written { Self::Written } else { Self::Failed }
    }
}

/// Result of a flag mutation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlagUpdate {
    /// Keys whose value actually changed, sorted.
    pub changed: Vec<String>,
    pub persist: PersistOutcome,
}

/// Result of [`FeatureFlagController::refresh_flags`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The source answered and its values were applied.
    Updated(FlagUpdate),
    /// The source failed; flags are unchanged.
    Failed { reason: String },
}

impl RefreshOutcome {
    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated(_))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Feature-flag store with group and migration rollout operations.
pub struct FeatureFlagController {
    store: Store<FeatureFlagState>,
    persistence: Option<PersistenceAdapter>,
    events: Option<EventBus>,
}

impl FeatureFlagController {
    /// Controller over the built-in defaults, memory only.
    pub fn new() -> Self {
        Self::with_overrides(&BTreeMap::new())
    }

    /// Controller whose initial state is the defaults plus `overrides`.
    pub fn with_overrides(overrides: &BTreeMap<String, bool>) -> Self {
        Self {
            store: Store::new(STORE_ID, FeatureFlagState::with_overrides(overrides)),
            persistence: None,
            events: None,
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, adapter: PersistenceAdapter) -> Self {
        self.persistence = Some(adapter);
        self
    }

    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    // -- observation --------------------------------------------------------

    pub fn snapshot(&self) -> FeatureFlagState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeatureFlagState> {
        self.store.subscribe()
    }

    pub fn initial_state(&self) -> &FeatureFlagState {
        self.store.initial_state()
    }

    /// Current value of `key`. Unknown keys are `false`.
    pub fn is_feature_enabled(&self, key: &str) -> bool {
        self.store.with_state(|s| s.value(key))
    }

    pub fn is_enabled(&self, flag: FeatureFlag) -> bool {
        self.is_feature_enabled(flag.key())
    }

    pub fn flags(&self) -> BTreeMap<String, bool> {
        self.store.with_state(|s| s.flags.clone())
    }

    pub fn groups(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.store.with_state(|s| s.groups.clone())
    }

    /// Current value of every member of `name`. Unknown group is empty.
    pub fn get_feature_group(&self, name: &str) -> BTreeMap<String, bool> {
        self.store.with_state(|s| {
            s.groups
                .get(name)
                .map(|members| members.iter().map(|k| (k.clone(), s.value(k))).collect())
                .unwrap_or_default()
        })
    }

    /// Snapshot of every migration flag.
    pub fn get_migration_status(&self) -> MigrationStatus {
        self.store
            .with_state(|s| MigrationStatus::from_lookup(|flag| s.value(flag.key())))
    }

    // -- single flags -------------------------------------------------------

    pub async fn enable_feature(&self, key: &str) -> FlagUpdate {
        self.update_flags([(key.to_string(), true)]).await
    }

    pub async fn disable_feature(&self, key: &str) -> FlagUpdate {
        self.update_flags([(key.to_string(), false)]).await
    }

    // -- batches ------------------------------------------------------------

    /// Apply several flag values as one transition, then persist once.
    pub async fn update_flags<K>(&self, partial: impl IntoIterator<Item = (K, bool)>) -> FlagUpdate
    where
        K: Into<String>,
    {
        let partial: Vec<(String, bool)> =
            partial.into_iter().map(|(k, v)| (k.into(), v)).collect();
        if partial.is_empty() {
            return FlagUpdate::default();
        }

        let changed = self.apply(partial, None);
        let persist = self.persist().await;
        FlagUpdate { changed, persist }
    }

    /// Enable the recognized migration flags among `keys`.
    ///
    /// Unknown keys, and known keys that are not migration flags, are ignored
    /// so that flag lists from other app versions remain usable.
    pub async fn enable_migration_flags<K: AsRef<str>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> FlagUpdate {
        self.set_migration_flags(keys, true).await
    }

    pub async fn disable_migration_flags<K: AsRef<str>>(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> FlagUpdate {
        self.set_migration_flags(keys, false).await
    }

    async fn set_migration_flags<K: AsRef<str>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        enabled: bool,
    ) -> FlagUpdate {
        let mut recognized = Vec::new();
        for key in keys {
            let key = key.as_ref();
            match FeatureFlag::from_key(key).filter(|f| f.is_migration()) {
                Some(flag) => recognized.push((flag.key(), enabled)),
                None => debug!(key, "ignoring unrecognized migration flag"),
            }
        }
        self.update_flags(recognized).await
    }

    // -- groups -------------------------------------------------------------

    pub async fn enable_feature_group(&self, name: &str) -> FlagUpdate {
        self.set_group(name, true).await
    }

    pub async fn disable_feature_group(&self, name: &str) -> FlagUpdate {
        self.set_group(name, false).await
    }

    async fn set_group(&self, name: &str, enabled: bool) -> FlagUpdate {
        let members = self
            .store
            .with_state(|s| s.groups.get(name).cloned().unwrap_or_default());
        if members.is_empty() {
            debug!(group = name, "unknown or empty flag group");
            return FlagUpdate::default();
        }
        info!(group = name, enabled, members = members.len(), "setting flag group");
        self.update_flags(members.into_iter().map(|k| (k, enabled)))
            .await
    }

    /// Define or replace a group. Members need not be known flags.
    pub fn register_group<K: Into<String>>(
        &self,
        name: impl Into<String>,
        members: impl IntoIterator<Item = K>,
    ) {
        let name = name.into();
        let members: BTreeSet<String> = members.into_iter().map(Into::into).collect();
        debug!(group = %name, members = members.len(), "flag group registered");
        self.store.update(|s| {
            s.groups.insert(name, members);
        });
    }

    /// Switch off every flag and every group member in one transition.
    pub async fn disable_all_flags(&self) -> FlagUpdate {
        let keys: BTreeSet<String> = self.store.with_state(|s| {
            s.flags
                .keys()
                .chain(s.groups.values().flatten())
                .cloned()
                .collect()
        });
        warn!(flags = keys.len(), "disabling all feature flags");
        self.update_flags(keys.into_iter().map(|k| (k, false))).await
    }

    // -- remote -------------------------------------------------------------

    /// Pull authoritative values from `source`.
    ///
    /// Never fails. On any source error the flags stay exactly as they were.
    pub async fn refresh_flags(&self, source: &dyn FlagSource) -> RefreshOutcome {
        self.store.set_loading(true);

        let outcome = match source.fetch_flags().await {
            Ok(remote) => {
                let changed = self.apply(remote.into_iter().collect(), Some(Utc::now()));
                let persist = self.persist().await;
                info!(changed = changed.len(), "feature flags refreshed");
                RefreshOutcome::Updated(FlagUpdate { changed, persist })
            }
            Err(err) => {
                self.store.set_loading(false);
                warn!(%err, "flag refresh failed, keeping current flags");
                RefreshOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        if let Some(events) = &self.events {
            let (success, changed) = match &outcome {
                RefreshOutcome::Updated(update) => (true, update.changed.len()),
                RefreshOutcome::Failed { .. } => (false, 0),
            };
            events.publish(StoreEvent::FlagsRefreshed {
                success,
                changed,
                timestamp: Utc::now(),
            });
        }
        outcome
    }

    // -- persistence --------------------------------------------------------

    /// Merge persisted values over the current flags. Returns whether a
    /// usable slice was found.
    pub async fn hydrate(&self) -> bool {
        match &self.persistence {
            Some(adapter) => self.store.hydrate(adapter).await,
            None => false,
        }
    }

    /// Write the current flags and report the outcome.
    pub async fn flush(&self) -> PersistOutcome {
        self.persist().await
    }

    async fn persist(&self) -> PersistOutcome {
        match &self.persistence {
            Some(adapter) => PersistOutcome::from_written(self.store.persist(adapter).await),
            None => PersistOutcome::Skipped,
        }
    }

    // -- internals ----------------------------------------------------------

    /// Apply values in one transition and return the keys that changed.
    ///
    /// A refresh passes `refreshed_at`, which also ends the loading state in
    /// the same transition.
    fn apply(&self, values: Vec<(String, bool)>, refreshed_at: Option<DateTime<Utc>>) -> Vec<String> {
        let mut changed = Vec::new();
        self.store.update(|s| {
            for (key, enabled) in values {
                let previous = s.flags.insert(key.clone(), enabled);
                if previous != Some(enabled) {
                    changed.push(key);
                }
            }
            if let Some(at) = refreshed_at {
                s.last_refreshed = Some(at);
                s.is_loading = false;
            }
        });
        changed.sort();
        changed.dedup();

        if !changed.is_empty() {
            debug!(changed = ?changed, "feature flags updated");
            if let Some(events) = &self.events {
                events.publish(StoreEvent::FlagsChanged {
                    keys: changed.clone(),
                    timestamp: Utc::now(),
                });
            }
        }
        changed
    }
}

impl Default for FeatureFlagController {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagedStore for FeatureFlagController {
    fn id(&self) -> &'static str {
        STORE_ID
    }

    async fn reset(&self) {
        self.store.reset();
    }

    fn is_pristine(&self) -> bool {
        self.store.is_pristine()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
