//! Key-value backend trait and the in-process implementations.
//!
//! [`StorageBackend`] mirrors the async key-value interface the app runs on
//! (`getItem`, `setItem`, `removeItem`, the `multi*` batch calls,
//! `getAllKeys`, `clear`). Backends are free to fail; the
//! [`Storage`](crate::Storage) wrapper is responsible for turning those
//! failures into plain values.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::trace;

use crate::error::{StoreError, StoreResult};

// ── trait ────────────────────────────────────────────────────────────

/// Async key-value store with string keys and string values.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short name used in log fields.
    fn name(&self) -> &'static str;

    /// Read a value, `Ok(None)` if the key is absent.
    async fn get_item(&self, key: &str) -> StoreResult<Option<String>>;

    /// Insert or overwrite a value.
    async fn set_item(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a key. Deleting an absent key is not an error.
    async fn remove_item(&self, key: &str) -> StoreResult<()>;

    /// Return every key currently stored.
    async fn get_all_keys(&self) -> StoreResult<Vec<String>>;

    /// Delete every key.
    async fn clear(&self) -> StoreResult<()>;

    /// Read several keys, preserving the order of `keys`.
    async fn multi_get(&self, keys: &[String]) -> StoreResult<Vec<(String, Option<String>)>> {
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            out.push((key.clone(), self.get_item(key).await?));
        }
        Ok(out)
    }

    /// Write several pairs.
    async fn multi_set(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        for (key, value) in pairs {
            self.set_item(key, value).await?;
        }
        Ok(())
    }

    /// Delete several keys.
    async fn multi_remove(&self, keys: &[String]) -> StoreResult<()> {
        for key in keys {
            self.remove_item(key).await?;
        }
        Ok(())
    }
}

// ── memory backend ───────────────────────────────────────────────────

/// Process-local backend backed by [`DashMap`].
///
/// Cheaply cloneable; clones share the same map, which lets tests inspect
/// what a store wrote.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<DashMap<String, String>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the backend holds no keys.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.inner.get(key).map(|entry| entry.value().clone()))
    }

    async fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        self.inner.insert(key.to_string(), value.to_string());
        trace!(key, "memory backend write");
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self.inner.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear(&self) -> StoreResult<()> {
        self.inner.clear();
        Ok(())
    }
}

// ── unavailable backend ──────────────────────────────────────────────

/// Backend for environments without usable storage.
///
/// Every call fails with [`StoreError::Unavailable`], which lets the rest of
/// the runtime operate purely in memory.
#[derive(Debug, Clone)]
pub struct UnavailableBackend {
    reason: String,
}

impl UnavailableBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> StoreResult<T> {
        Err(StoreError::Unavailable(self.reason.clone()))
    }
}

impl Default for UnavailableBackend {
    fn default() -> Self {
        Self::new("no storage backend configured")
    }
}

#[async_trait]
impl StorageBackend for UnavailableBackend {
    fn name(&self) -> &'static str {
        "unavailable"
    }

    async fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
        self.fail()
    }

    async fn set_item(&self, _key: &str, _value: &str) -> StoreResult<()> {
        self.fail()
    }

    async fn remove_item(&self, _key: &str) -> StoreResult<()> {
        self.fail()
    }

    async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
        self.fail()
    }

    async fn clear(&self) -> StoreResult<()> {
        self.fail()
    }
}

// ── tests ────────────────────────────────────────────────────────────
