//! Namespaced slice persistence.
//!
//! A store's persisted slice is written as a JSON envelope
//!
//! ```text
//! "{namespace}:{store_id}" => {"version": 1, "state": { ...slice fields... }}
//! ```
//!
//! Loading is strict: a missing key, unparsable JSON, a malformed envelope or
//! a schema version mismatch all read as "nothing persisted". Nothing from a
//! rejected payload is ever handed back to the caller. Saving is best-effort;
//! the caller's in-memory state stays authoritative whether or not the write
//! lands.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::storage::Storage;

/// Namespace used when none is configured.
pub const DEFAULT_NAMESPACE: &str = "society";

/// Envelope version written by this build.
pub const SCHEMA_VERSION: u64 = 1;

/// Reads and writes store slices through a [`Storage`].
#[derive(Debug, Clone)]
pub struct PersistenceAdapter {
    storage: Storage,
    namespace: String,
    schema_version: u64,
}

impl PersistenceAdapter {
    pub fn new(storage: Storage, namespace: impl Into<String>) -> Self {
        Self {
            storage,
            namespace: namespace.into(),
            schema_version: SCHEMA_VERSION,
        }
    }

    /// Override the envelope version (used when a slice layout changes).
    #[must_use]
    pub fn with_schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Storage key for `store_id`.
    pub fn key_for(&self, store_id: &str) -> String {
        format!("{}:{store_id}", self.namespace)
    }

    /// Load the raw slice for `store_id`.
    pub async fn load(&self, store_id: &str) -> Option<Map<String, Value>> {
        let key = self.key_for(store_id);
        let Some(raw) = self.storage.get(&key).await else {
            debug!(store_id, "no persisted slice");
            return None;
        };

        let parsed: Value = match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(store_id, %err, "persisted slice is not valid json, ignoring");
                return None;
            }
        };

        let Value::Object(mut envelope) = parsed else {
            warn!(store_id, "persisted slice is not an envelope object, ignoring");
            return None;
        };

        let Some(version) = envelope.get("version").and_then(Value::as_u64) else {
            warn!(store_id, "persisted slice has no version, ignoring");
            return None;
        };
        if version != self.schema_version {
            warn!(
                store_id,
                found = version,
                expected = self.schema_version,
                "persisted slice version mismatch, ignoring"
            );
            return None;
        }

        match envelope.remove("state") {
            Some(Value::Object(state)) => {
                debug!(store_id, fields = state.len(), "persisted slice loaded");
                Some(state)
            }
            _ => {
                warn!(store_id, "persisted slice state is not an object, ignoring");
                None
            }
        }
    }

    /// Load and deserialize the slice for `store_id`.
    ///
    /// A slice whose fields do not match `T` is treated like a corrupt one.
    pub async fn load_slice<T: DeserializeOwned>(&self, store_id: &str) -> Option<T> {
        let state = self.load(store_id).await?;
        match serde_json::from_value(Value::Object(state)) {
            Ok(slice) => Some(slice),
            Err(err) => {
                warn!(store_id, %err, "persisted slice has unexpected shape, ignoring");
                None
            }
        }
    }

    /// Write the slice for `store_id`. Returns whether the write landed.
    pub async fn save(&self, store_id: &str, slice: &Map<String, Value>) -> bool {
        let envelope = json!({
            "version": self.schema_version,
            "state": slice,
        });
        let payload = envelope.to_string();
        let written = self.storage.set(&self.key_for(store_id), &payload).await;
        if written {
            debug!(store_id, bytes = payload.len(), "slice persisted");
        } else {
            warn!(store_id, "slice not persisted, continuing in memory");
        }
        written
    }

    /// Serialize `slice` and write it. `T` must serialize to a JSON object.
    pub async fn save_slice<T: Serialize>(&self, store_id: &str, slice: &T) -> bool {
        match serde_json::to_value(slice) {
            Ok(Value::Object(map)) => self.save(store_id, &map).await,
            Ok(_) => {
                warn!(store_id, "slice does not serialize to an object, not persisted");
                false
            }
            Err(err) => {
                warn!(store_id, %err, "slice serialization failed, not persisted");
                false
            }
        }
    }

    /// Drop the persisted slice for `store_id`.
    pub async fn clear(&self, store_id: &str) -> bool {
        self.storage.remove(&self.key_for(store_id)).await
    }

    /// Ids of every store with a slice under this namespace.
    pub async fn persisted_store_ids(&self) -> Vec<String> {
        let prefix = format!("{}:", self.namespace);
        self.storage
            .keys_with_prefix(&prefix)
            .await
            .into_iter()
            .map(|k| k[prefix.len()..].to_string())
            .collect()
    }
}

// ── tests ────────────────────────────────────────────────────────────
