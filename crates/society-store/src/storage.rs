//! Failure-absorbing storage abstraction.
//!
//! [`Storage`] wraps any [`StorageBackend`] and converts every backend error
//! into a plain value: reads yield `None` (or an empty list), writes yield
//! `false`. Errors are logged here and go no further, so callers above this
//! layer can always continue in memory.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{MemoryBackend, StorageBackend};

/// Key used by [`Storage::probe`].
pub const PROBE_KEY: &str = "__storage_probe__";

/// Cheaply cloneable handle over a shared backend.
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl fmt::Debug for Storage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl Storage {
    pub fn new(backend: impl StorageBackend + 'static) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn from_arc(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Storage over a fresh [`MemoryBackend`].
    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::new())
    }

    /// Name of the wrapped backend.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Check that the backend can round-trip a value.
    ///
    /// Writes a unique sentinel, reads it back and deletes it. Returns `true`
    /// only if all three steps succeed and the read-back matches.
    pub async fn probe(&self) -> bool {
        let sentinel = Uuid::now_v7().to_string();

        if let Err(err) = self.backend.set_item(PROBE_KEY, &sentinel).await {
            warn!(backend = self.backend.name(), %err, "storage probe write failed");
            return false;
        }

        let read_back = self.backend.get_item(PROBE_KEY).await;

        // Attempt the delete even when the read failed.
        if let Err(err) = self.backend.remove_item(PROBE_KEY).await {
            warn!(backend = self.backend.name(), %err, "storage probe delete failed");
            return false;
        }

        let read_back = match read_back {
            Ok(value) => value,
            Err(err) => {
                warn!(backend = self.backend.name(), %err, "storage probe read failed");
                return false;
            }
        };

        let available = read_back.as_deref() == Some(sentinel.as_str());
        if !available {
            warn!(backend = self.backend.name(), "storage probe read back a different value");
        }
        debug!(backend = self.backend.name(), available, "storage probed");
        available
    }

    /// Read a value; `None` when absent or when the backend fails.
    pub async fn get(&self, key: &str) -> Option<String> {
        match self.backend.get_item(key).await {
            Ok(value) => value,
            Err(err) => {
                warn!(backend = self.backend.name(), key, %err, "storage read failed");
                None
            }
        }
    }

    /// Write a value; `false` on failure.
    pub async fn set(&self, key: &str, value: &str) -> bool {
        match self.backend.set_item(key, value).await {
            Ok(()) => true,
            Err(err) => {
                warn!(backend = self.backend.name(), key, %err, "storage write failed");
                false
            }
        }
    }

    /// Delete a key; `false` on failure.
    pub async fn remove(&self, key: &str) -> bool {
        match self.backend.remove_item(key).await {
            Ok(()) => true,
            Err(err) => {
                warn!(backend = self.backend.name(), key, %err, "storage delete failed");
                false
            }
        }
    }

    /// Batch read. On failure every key maps to `None`.
    pub async fn multi_get(&self, keys: &[String]) -> Vec<(String, Option<String>)> {
        match self.backend.multi_get(keys).await {
            Ok(pairs) => pairs,
            Err(err) => {
                warn!(backend = self.backend.name(), count = keys.len(), %err, "storage batch read failed");
                keys.iter().map(|k| (k.clone(), None)).collect()
            }
        }
    }

    /// Batch write; `false` on failure.
    pub async fn multi_set(&self, pairs: &[(String, String)]) -> bool {
        match self.backend.multi_set(pairs).await {
            Ok(()) => true,
            Err(err) => {
                warn!(backend = self.backend.name(), count = pairs.len(), %err, "storage batch write failed");
                false
            }
        }
    }

    /// Batch delete; `false` on failure.
    pub async fn multi_remove(&self, keys: &[String]) -> bool {
        match self.backend.multi_remove(keys).await {
            Ok(()) => true,
            Err(err) => {
                warn!(backend = self.backend.name(), count = keys.len(), %err, "storage batch delete failed");
                false
            }
        }
    }

    /// All keys; empty on failure.
    pub async fn keys(&self) -> Vec<String> {
        match self.backend.get_all_keys().await {
            Ok(keys) => keys,
            Err(err) => {
                warn!(backend = self.backend.name(), %err, "storage key listing failed");
                Vec::new()
            }
        }
    }

    /// Keys starting with `prefix`; empty on failure.
    pub async fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys()
            .await
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect()
    }

    /// Delete every key; `false` on failure.
    pub async fn clear(&self) -> bool {
        match self.backend.clear().await {
            Ok(()) => true,
            Err(err) => {
                warn!(backend = self.backend.name(), %err, "storage clear failed");
                false
            }
        }
    }
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::backend::UnavailableBackend;
    use crate::error::{StoreError, StoreResult};

    /// Stores writes, but every read fails.
    #[derive(Clone, Default)]
    struct WriteOnlyBackend(MemoryBackend);

    #[async_trait]
    impl StorageBackend for WriteOnlyBackend {
        fn name(&self) -> &'static str {
            "write-only"
        }
        async fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
            Err(StoreError::Unavailable("read refused".into()))
        }
        async fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
            self.0.set_item(key, value).await
        }
        async fn remove_item(&self, key: &str) -> StoreResult<()> {
            self.0.remove_item(key).await
        }
        async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
            self.0.get_all_keys().await
        }
        async fn clear(&self) -> StoreResult<()> {
            self.0.clear().await
        }
    }

    /// Accepts writes but returns garbage on read.
    struct LyingBackend;

    #[async_trait]
    impl StorageBackend for LyingBackend {
        fn name(&self) -> &'static str {
            "lying"
        }
        async fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
            Ok(Some("not what you wrote".into()))
        }
        async fn set_item(&self, _key: &str, _value: &str) -> StoreResult<()> {
            Ok(())
        }
        async fn remove_item(&self, _key: &str) -> StoreResult<()> {
            Ok(())
        }
        async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
            Ok(Vec::new())
        }
        async fn clear(&self) -> StoreResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn probe_succeeds_on_memory() {
        let storage = Storage::in_memory();
        assert!(storage.probe().await);
        // The sentinel does not linger.
        assert!(storage.get(PROBE_KEY).await.is_none());
    }

    #[tokio::test]
    async fn probe_fails_on_unavailable() {
        let storage = Storage::new(UnavailableBackend::default());
        assert!(!storage.probe().await);
    }

    #[tokio::test]
    async fn probe_fails_on_mismatched_read() {
        let storage = Storage::new(LyingBackend);
        assert!(!storage.probe().await);
    }

    #[tokio::test]
    async fn failed_read_still_removes_sentinel() {
        let backend = WriteOnlyBackend::default();
        let storage = Storage::new(backend.clone());
        assert!(!storage.probe().await);
        assert!(backend.0.get_all_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failures_become_values() {
        let storage = Storage::new(UnavailableBackend::default());
        assert_eq!(storage.get("k").await, None);
        assert!(!storage.set("k", "v").await);
        assert!(!storage.remove("k").await);
        assert!(!storage.multi_set(&[("k".into(), "v".into())]).await);
        assert!(!storage.multi_remove(&["k".into()]).await);
        assert!(storage.keys().await.is_empty());
        assert!(!storage.clear().await);
        assert_eq!(
            storage.multi_get(&["a".into(), "b".into()]).await,
            vec![("a".to_string(), None), ("b".to_string(), None)]
        );
    }

    #[tokio::test]
    async fn keys_with_prefix_filters() {
        let storage = Storage::in_memory();
        assert!(storage.set("society:auth", "{}").await);
        assert!(storage.set("society:theme", "{}").await);
        assert!(storage.set("other", "{}").await);

        let keys = storage.keys_with_prefix("society:").await;
        assert_eq!(keys, vec!["society:auth".to_string(), "society:theme".to_string()]);
    }
}
