//! The store contract shared by every domain.
//!
//! A [`Store`] owns one domain state value, an immutable copy of its initial
//! state, and a [`tokio::sync::watch`] sender through which observers are
//! notified. All mutation goes through [`Store::update`], which applies the
//! change and notifies exactly once, so observers never see a half-applied
//! transition.
//!
//! Stores with a persisted slice implement [`PersistedState`]; the store then
//! gains `hydrate`, `persist` and `persist_in_background`. Persistence is
//! always secondary: the in-memory state is updated first and a failed write
//! only produces a log line.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use society_store::PersistenceAdapter;
use tokio::sync::{Mutex, watch};
use tracing::debug;

// ---------------------------------------------------------------------------
// State traits
// ---------------------------------------------------------------------------

/// Requirements on a domain state value.
///
/// Every state carries a user-visible `error` and an `is_loading` flag.
pub trait StoreState: Clone + PartialEq + fmt::Debug + Send + Sync + 'static {
    fn error(&self) -> Option<&str>;
    fn set_error(&mut self, error: Option<String>);
    fn is_loading(&self) -> bool;
    fn set_loading(&mut self, loading: bool);
}

/// Implements [`StoreState`] for a struct with `error: Option<String>` and
/// `is_loading: bool` fields.
#[macro_export]
macro_rules! impl_store_state {
    ($ty:ty) => {
        impl $crate::store::StoreState for $ty {
            fn error(&self) -> Option<&str> {
                self.error.as_deref()
            }
            fn set_error(&mut self, error: Option<String>) {
                self.error = error;
            }
            fn is_loading(&self) -> bool {
                self.is_loading
            }
            fn set_loading(&mut self, loading: bool) {
                self.is_loading = loading;
            }
        }
    };
}

/// A state with a durable subset of fields.
pub trait PersistedState: StoreState {
    /// Serializable view of the durable fields.
    type Slice: Serialize + DeserializeOwned + Send + Sync + 'static;

    fn to_slice(&self) -> Self::Slice;

    /// Overwrite the durable fields from a loaded slice.
    fn apply_slice(&mut self, slice: Self::Slice);
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct StoreInner<S> {
    id: &'static str,
    initial: S,
    sender: watch::Sender<S>,
    /// Sequence handed to the most recently captured slice.
    captured: AtomicU64,
    /// Sequence of the newest slice handed to storage.
    written: Mutex<u64>,
}

/// Observable, resettable state container.
///
/// Cheaply cloneable; clones share the same state.
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: StoreState> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("id", &self.inner.id)
            .field("state", &*self.inner.sender.borrow())
            .finish()
    }
}

impl<S: StoreState> Store<S> {
    /// Create a store whose initial (and current) state is `initial`.
    pub fn new(id: &'static str, initial: S) -> Self {
        let (sender, _) = watch::channel(initial.clone());
        Self {
            inner: Arc::new(StoreInner {
                id,
                initial,
                sender,
                captured: AtomicU64::new(0),
                written: Mutex::new(0),
            }),
        }
    }

    pub fn id(&self) -> &'static str {
        self.inner.id
    }

    /// The snapshot replayed by [`Store::reset`].
    pub fn initial_state(&self) -> &S {
        &self.inner.initial
    }

    /// Clone of the current state.
    pub fn snapshot(&self) -> S {
        self.inner.sender.borrow().clone()
    }

    /// Read the current state without cloning it.
    ///
    /// The closure must not call back into this store.
    pub fn with_state<R>(&self, f: impl FnOnce(&S) -> R) -> R {
        f(&self.inner.sender.borrow())
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<S> {
        self.inner.sender.subscribe()
    }

    /// Apply a transition and notify observers once.
    ///
    /// The closure must not call back into this store.
    pub fn update(&self, f: impl FnOnce(&mut S)) {
        self.inner.sender.send_modify(f);
    }

    /// Set or clear the user-visible error. Touches nothing else.
    pub fn set_error(&self, error: Option<String>) {
        self.update(|s| s.set_error(error));
    }

    pub fn set_loading(&self, loading: bool) {
        self.update(|s| s.set_loading(loading));
    }

    /// Restore the initial state. No I/O.
    pub fn reset(&self) {
        self.inner.sender.send_replace(self.inner.initial.clone());
        debug!(store_id = self.inner.id, "store reset");
    }

    /// Whether the current state equals the initial state.
    pub fn is_pristine(&self) -> bool {
        *self.inner.sender.borrow() == self.inner.initial
    }
}

impl<S: PersistedState> Store<S> {
    /// Load the persisted slice and apply it. Returns whether a slice was
    /// found; a missing or corrupt slice leaves the state untouched.
    pub async fn hydrate(&self, adapter: &PersistenceAdapter) -> bool {
        match adapter.load_slice::<S::Slice>(self.inner.id).await {
            Some(slice) => {
                self.update(|s| s.apply_slice(slice));
                debug!(store_id = self.inner.id, "store hydrated");
                true
            }
            None => false,
        }
    }

    /// Write the current slice. The result only reports whether it landed.
    pub async fn persist(&self, adapter: &PersistenceAdapter) -> bool {
        let (seq, slice) = self.capture_slice();
        self.write_slice(adapter, seq, slice).await
    }

    /// Persist on a background task without awaiting it.
    ///
    /// The slice is captured now, so a later [`Store::reset`] cannot leak
    /// into the write. A write older than one already stored is dropped.
    /// Outside a tokio runtime the write is skipped.
    pub fn persist_in_background(&self, adapter: &PersistenceAdapter) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(
                store_id = self.inner.id,
                "no async runtime, skipping background persist"
            );
            return;
        };
        let (seq, slice) = self.capture_slice();
        let store = self.clone();
        let adapter = adapter.clone();
        handle.spawn(async move {
            store.write_slice(&adapter, seq, slice).await;
        });
    }

    /// Snapshot the durable fields with a sequence number. Holding the watch
    /// borrow keeps sequence order identical to state order.
    fn capture_slice(&self) -> (u64, S::Slice) {
        self.with_state(|s| {
            let seq = self.inner.captured.fetch_add(1, Ordering::SeqCst) + 1;
            (seq, s.to_slice())
        })
    }

    async fn write_slice(&self, adapter: &PersistenceAdapter, seq: u64, slice: S::Slice) -> bool {
        let mut written = self.inner.written.lock().await;
        if seq <= *written {
            debug!(store_id = self.inner.id, seq, "stale slice, skipping write");
            return false;
        }
        *written = seq;
        adapter.save_slice(self.inner.id, &slice).await
    }
}

// ---------------------------------------------------------------------------
// Managed stores
// ---------------------------------------------------------------------------

/// The view of a store the coordinator works with.
#[async_trait]
pub trait ManagedStore: Send + Sync {
    /// Unique store id.
    fn id(&self) -> &'static str;

    /// Return to the initial state, clearing derived caches.
    ///
    /// Must be total: it cannot fail.
    async fn reset(&self);

    /// Whether the store currently equals its initial state.
    fn is_pristine(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use society_store::{DEFAULT_NAMESPACE, Storage, UnavailableBackend};

    use super::*;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct CounterState {
        count: u32,
        label: String,
        is_loading: bool,
        error: Option<String>,
    }

    crate::impl_store_state!(CounterState);

    #[derive(Serialize, Deserialize)]
    struct CounterSlice {
        count: u32,
    }

    impl PersistedState for CounterState {
        type Slice = CounterSlice;

        fn to_slice(&self) -> CounterSlice {
            CounterSlice { count: self.count }
        }

        fn apply_slice(&mut self, slice: CounterSlice) {
            self.count = slice.count;
        }
    }

    fn store() -> Store<CounterState> {
        Store::new("counter", CounterState::default())
    }

    #[test]
    fn update_is_visible_in_snapshot() {
        let store = store();
        store.update(|s| s.count = 3);
        assert_eq!(store.snapshot().count, 3);
        assert!(!store.is_pristine());
    }

    #[test]
    fn set_error_touches_only_error() {
        let store = store();
        store.update(|s| s.count = 7);
        store.set_error(Some("boom".into()));
        let state = store.snapshot();
        assert_eq!(state.error(), Some("boom"));
        assert_eq!(state.count, 7);

        store.set_error(None);
        assert_eq!(store.snapshot().error(), None);
    }

    #[test]
    fn reset_restores_initial_and_is_idempotent() {
        let store = store();
        store.update(|s| {
            s.count = 9;
            s.label = "changed".into();
        });
        store.set_loading(true);
        store.set_error(Some("x".into()));

        store.reset();
        assert_eq!(&store.snapshot(), store.initial_state());
        store.reset();
        assert_eq!(&store.snapshot(), store.initial_state());
        assert!(store.is_pristine());
    }

    #[tokio::test]
    async fn subscribers_observe_each_update() {
        let store = store();
        let mut rx = store.subscribe();

        store.update(|s| s.count = 1);
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().count, 1);

        store.reset();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().count, 0);
    }

    #[tokio::test]
    async fn persist_and_hydrate_round_trip() {
        let adapter = PersistenceAdapter::new(Storage::in_memory(), DEFAULT_NAMESPACE);
        let first = store();
        first.update(|s| {
            s.count = 42;
            s.label = "not persisted".into();
        });
        assert!(first.persist(&adapter).await);

        let second = store();
        assert!(second.hydrate(&adapter).await);
        let state = second.snapshot();
        assert_eq!(state.count, 42);
        assert_eq!(state.label, "");
    }

    #[tokio::test]
    async fn hydrate_from_unavailable_storage_keeps_defaults() {
        let adapter = PersistenceAdapter::new(
            Storage::new(UnavailableBackend::default()),
            DEFAULT_NAMESPACE,
        );
        let store = store();
        assert!(!store.hydrate(&adapter).await);
        assert!(store.is_pristine());
    }

    #[test]
    fn background_persist_without_runtime_is_skipped() {
        let adapter = PersistenceAdapter::new(Storage::in_memory(), DEFAULT_NAMESPACE);
        let store = store();
        store.update(|s| s.count = 1);
        store.persist_in_background(&adapter);
        assert_eq!(store.snapshot().count, 1);
    }

    #[tokio::test]
    async fn queued_write_keeps_pre_reset_slice() {
        let adapter = PersistenceAdapter::new(Storage::in_memory(), DEFAULT_NAMESPACE);
        let store = store();
        store.update(|s| s.count = 5);
        store.persist_in_background(&adapter);
        store.reset();
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let restarted = self::store();
        assert!(restarted.hydrate(&adapter).await);
        assert_eq!(restarted.snapshot().count, 5);
    }

    #[tokio::test]
    async fn older_background_write_never_overwrites_newer_flush() {
        let adapter = PersistenceAdapter::new(Storage::in_memory(), DEFAULT_NAMESPACE);
        let store = store();
        store.update(|s| s.count = 1);
        store.persist_in_background(&adapter);
        store.update(|s| s.count = 2);
        assert!(store.persist(&adapter).await);
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }

        let restarted = self::store();
        assert!(restarted.hydrate(&adapter).await);
        assert_eq!(restarted.snapshot().count, 2);
    }
}
