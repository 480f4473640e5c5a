//! Notification inbox store.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domains::UnknownVariant;
use crate::list::{ListItem, ListState, ListStore, SortOrder};
use crate::services::NotificationService;

pub const STORE_ID: &str = "notification";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationCategory {
    Billing,
    Maintenance,
    Visitor,
    Governance,
    #[default]
    General,
}

impl FromStr for NotificationCategory {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "billing" => Ok(Self::Billing),
            "maintenance" => Ok(Self::Maintenance),
            "visitor" => Ok(Self::Visitor),
            "governance" => Ok(Self::Governance),
            "general" => Ok(Self::General),
            other => Err(UnknownVariant::new("notification category", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NotificationSortKey {
    #[default]
    CreatedAt,
    Title,
    Unread,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub body: String,
    #[serde(default)]
    pub category: NotificationCategory,
    #[serde(default)]
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl ListItem for Notification {
    type Filter = NotificationCategory;
    type SortKey = NotificationSortKey;

    fn id(&self) -> &str {
        &self.id
    }

    fn matches_search(&self, query: &str) -> bool {
        self.title.to_lowercase().contains(query) || self.body.to_lowercase().contains(query)
    }

    fn matches_filter(&self, filter: NotificationCategory) -> bool {
        self.category == filter
    }

    fn compare(&self, other: &Self, key: NotificationSortKey) -> Ordering {
        match key {
            NotificationSortKey::CreatedAt => self.created_at.cmp(&other.created_at),
            NotificationSortKey::Title => self.title.cmp(&other.title),
            // Unread first when ascending.
            NotificationSortKey::Unread => self
                .read
                .cmp(&other.read)
                .then_with(|| other.created_at.cmp(&self.created_at)),
        }
    }
}

pub type NotificationStore = ListStore<Notification>;

impl ListStore<Notification> {
    /// Newest first.
    pub fn create() -> Self {
        ListStore::new(
            STORE_ID,
            ListState::new(NotificationSortKey::CreatedAt, SortOrder::Desc),
        )
    }

    pub async fn load_notifications(&self, service: &dyn NotificationService) -> bool {
        self.load_with(service.fetch_notifications()).await
    }

    pub fn unread_count(&self) -> usize {
        self.with_state(|s| s.items.iter().filter(|n| !n.read).count())
    }

    /// Mark one notification read. Returns whether it exists.
    pub fn mark_read(&self, id: &str) -> bool {
        let mut found = false;
        self.update(|s| {
            if let Some(n) = s.items.iter_mut().find(|n| n.id == id) {
                n.read = true;
                found = true;
            }
        });
        found
    }

    pub fn mark_all_read(&self) {
        self.update(|s| s.items.iter_mut().for_each(|n| n.read = true));
    }

    /// Mark read locally, then tell the service. A remote failure keeps the
    /// local change and is only logged.
    pub async fn mark_read_remote(&self, id: &str, service: &dyn NotificationService) -> bool {
        if !self.mark_read(id) {
            return false;
        }
        if let Err(err) = service.mark_read(id).await {
            warn!(notification_id = %id, %err, "remote mark-read failed");
        }
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
