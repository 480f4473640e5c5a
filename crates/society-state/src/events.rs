//! Runtime event bus.
//!
//! Per-store state changes are observed through each store's `watch`
//! channel. Cross-store happenings (flag changes, resets, rollbacks) are
//! broadcast here so that UI shells and diagnostics can follow what the
//! coordinator does.
//!
//! # Usage
//!
//! ```rust,no_run
//! # use society_state::events::{EventBus, StoreEvent};
//! # async fn example() {
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(StoreEvent::StoreReset {
//!     store_id: "theme".into(),
//!     timestamp: chrono::Utc::now(),
//! });
//!
//! let event = rx.recv().await.unwrap();
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Something that happened across the store runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StoreEvent {
    /// One or more flags changed value.
    FlagsChanged {
        /// Keys whose value actually changed, sorted.
        keys: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// A remote refresh completed (successfully or not).
    FlagsRefreshed {
        /// Whether the remote source answered with a usable payload.
        success: bool,
        /// Number of keys whose value changed.
        changed: usize,
        timestamp: DateTime<Utc>,
    },

    /// A single store returned to its initial state.
    StoreReset {
        store_id: String,
        timestamp: DateTime<Utc>,
    },

    /// The coordinator finished resetting every store.
    AllStoresReset {
        /// Store ids in the order they were reset.
        store_ids: Vec<String>,
        timestamp: DateTime<Utc>,
    },

    /// An emergency rollback completed.
    EmergencyRollback {
        /// Number of flags switched off.
        flags_disabled: usize,
        /// Whether the all-off flag set reached storage.
        persisted: bool,
        timestamp: DateTime<Utc>,
    },
}

/// Publish/subscribe bus backed by [`tokio::sync::broadcast`].
///
/// Cheaply cloneable; subscribers receive [`Arc<StoreEvent>`].
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<StoreEvent>>,
}

impl EventBus {
    /// Create a bus with the given channel capacity.
    ///
    /// Subscribers that fall more than `capacity` events behind observe
    /// [`broadcast::error::RecvError::Lagged`].
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers and return how many will see it.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: StoreEvent) -> usize {
        match self.sender.send(Arc::new(event)) {
            Ok(n) => {
                tracing::trace!(receivers = n, "store event published");
                n
            }
            Err(_) => {
                tracing::trace!("store event published but no active receivers");
                0
            }
        }
    }

    /// Subscribe to future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<StoreEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
