//! Society admin management store.

use std::cmp::Ordering;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::domains::auth::UserRole;
use crate::domains::UnknownVariant;
use crate::list::{ListItem, ListState, ListStore, SortOrder};
use crate::services::DirectoryService;

pub const STORE_ID: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdminStatus {
    #[default]
    Active,
    Invited,
    Suspended,
}

impl FromStr for AdminStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "invited" => Ok(Self::Invited),
            "suspended" => Ok(Self::Suspended),
            other => Err(UnknownVariant::new("admin status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdminSortKey {
    #[default]
    Name,
    Email,
    InvitedAt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub society_id: String,
    #[serde(default = "admin_role")]
    pub role: UserRole,
    #[serde(default)]
    pub status: AdminStatus,
    pub invited_at: DateTime<Utc>,
}

fn admin_role() -> UserRole {
    UserRole::Admin
}

impl ListItem for AdminProfile {
    type Filter = AdminStatus;
    type SortKey = AdminSortKey;

    fn id(&self) -> &str {
        &self.id
    }

    fn matches_search(&self, query: &str) -> bool {
        self.name.to_lowercase().contains(query)
            || self.email.to_lowercase().contains(query)
            || self.phone.as_deref().is_some_and(|p| p.contains(query))
    }

    fn matches_filter(&self, filter: AdminStatus) -> bool {
        self.status == filter
    }

    fn compare(&self, other: &Self, key: AdminSortKey) -> Ordering {
        match key {
            AdminSortKey::Name => self.name.to_lowercase().cmp(&other.name.to_lowercase()),
            AdminSortKey::Email => self.email.cmp(&other.email),
            AdminSortKey::InvitedAt => self.invited_at.cmp(&other.invited_at),
        }
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

pub type AdminStore = ListStore<AdminProfile>;

impl ListStore<AdminProfile> {
    pub fn create() -> Self {
        ListStore::new(STORE_ID, ListState::new(AdminSortKey::Name, SortOrder::Asc))
    }

    pub async fn load_admins(&self, directory: &dyn DirectoryService) -> bool {
        self.load_with(directory.fetch_admins()).await
    }

    /// Add a newly invited admin. Rejects malformed emails and duplicate ids
    /// through `error`.
    pub fn onboard_admin(&self, admin: AdminProfile) -> bool {
        if !looks_like_email(&admin.email) {
            self.set_error(Some(format!("invalid admin email: {}", admin.email)));
            return false;
        }
        if self.with_state(|s| s.items.iter().any(|a| a.id == admin.id)) {
            self.set_error(Some(format!("admin {} already exists", admin.id)));
            return false;
        }
        info!(admin_id = %admin.id, society_id = %admin.society_id, "admin onboarded");
        self.update(|s| {
            s.items.push(admin);
            s.error = None;
        });
        true
    }

    pub fn set_admin_status(&self, id: &str, status: AdminStatus) -> bool {
        let mut found = false;
        self.update(|s| {
            if let Some(admin) = s.items.iter_mut().find(|a| a.id == id) {
                admin.status = status;
                found = true;
            }
        });
        if !found {
            self.set_error(Some(format!("unknown admin: {id}")));
        }
        found
    }

    pub fn admins_for_society(&self, society_id: &str) -> Vec<AdminProfile> {
        self.with_state(|s| {
            s.items
                .iter()
                .filter(|a| a.society_id == society_id)
                .cloned()
                .collect()
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::store::ManagedStore;

    fn admin(id: &str, name: &str, email: &str) -> AdminProfile {
        AdminProfile {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            phone: None,
            society_id: "s1".into(),
            role: UserRole::Admin,
            status: AdminStatus::Invited,
            invited_at: Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn onboard_validates_email_and_uniqueness() {
        let store = AdminStore::create();
        assert!(store.onboard_admin(admin("a1", "Ravi", "ravi@example.com")));
        assert!(store.snapshot().error.is_none());

        assert!(!store.onboard_admin(admin("a2", "Meera", "meera.example.com")));
        assert!(store.snapshot().error.unwrap().contains("invalid admin email"));

        assert!(!store.onboard_admin(admin("a1", "Ravi again", "ravi2@example.com")));
        assert!(store.snapshot().error.unwrap().contains("already exists"));
        assert_eq!(store.snapshot().items.len(), 1);
    }

    #[test]
    fn status_updates_and_filters() {
        let store = AdminStore::create();
        store.onboard_admin(admin("a1", "Ravi", "ravi@example.com"));
        store.onboard_admin(admin("a2", "Meera", "meera@example.com"));

        assert!(store.set_admin_status("a2", AdminStatus::Active));
        store.set_filter_param("active");
        let visible = store.visible_items();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].id, "a2");

        assert!(!store.set_admin_status("zz", AdminStatus::Suspended));
        assert!(store.snapshot().error.is_some());
    }

    #[test]
    fn search_by_email() {
        let store = AdminStore::create();
        store.set_items(vec![
            admin("a1", "Ravi", "ravi@example.com"),
            admin("a2", "Meera", "meera@example.org"),
        ]);
        store.set_search_query("example.org");
        assert_eq!(store.filtered_count(), 1);
        assert_eq!(store.admins_for_society("s1").len(), 2);
    }

    #[tokio::test]
    async fn reset_drops_onboarded_admins() {
        let store = AdminStore::create();
        store.onboard_admin(admin("a1", "Ravi", "ravi@example.com"));
        ManagedStore::reset(&store).await;
        assert_eq!(&store.snapshot(), store.initial_state());
    }
}
