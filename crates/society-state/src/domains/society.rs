//! Society directory store.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domains::UnknownVariant;
use crate::list::{ListItem, ListState, ListStore, SortOrder};
use crate::services::DirectoryService;

pub const STORE_ID: &str = "society";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocietyStatus {
    #[default]
    Active,
    Pending,
    Inactive,
}

impl SocietyStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Inactive => "inactive",
        }
    }
}

impl fmt::Display for SocietyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SocietyStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "active" => Ok(Self::Active),
            "pending" => Ok(Self::Pending),
            "inactive" => Ok(Self::Inactive),
            other => Err(UnknownVariant::new("society status", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SocietySortKey {
    #[default]
    Name,
    City,
    TotalUnits,
    CreatedAt,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Society {
    pub id: String,
    pub name: String,
    pub city: String,
    pub address: String,
    pub total_units: u32,
    #[serde(default)]
    pub status: SocietyStatus,
    pub created_at: DateTime<Utc>,
}

impl ListItem for Society {
    type Filter = SocietyStatus;
    type SortKey = SocietySortKey;

    fn id(&self) -> &str {
        &self.id
    }

    fn matches_search(&self, query: &str) -> bool {
        [&self.name, &self.city, &self.address]
            .iter()
            .any(|field| field.to_lowercase().contains(query))
    }

    fn matches_filter(&self, filter: SocietyStatus) -> bool {
        self.status == filter
    }

    fn compare(&self, other: &Self, key: SocietySortKey) -> Ordering {
        match key {
            SocietySortKey::Name => self.name.to_lowercase().cmp(&other.name.to_lowercase()),
            SocietySortKey::City => self.city.to_lowercase().cmp(&other.city.to_lowercase()),
            SocietySortKey::TotalUnits => self.total_units.cmp(&other.total_units),
            SocietySortKey::CreatedAt => self.created_at.cmp(&other.created_at),
        }
    }
}

pub type SocietyStore = ListStore<Society>;

impl ListStore<Society> {
    /// Societies sorted by name, ascending.
    pub fn create() -> Self {
        ListStore::new(
            STORE_ID,
            ListState::new(SocietySortKey::Name, SortOrder::Asc),
        )
    }

    pub async fn load_societies(&self, directory: &dyn DirectoryService) -> bool {
        self.load_with(directory.fetch_societies()).await
    }

    pub fn society(&self, id: &str) -> Option<Society> {
        self.with_state(|s| s.items.iter().find(|soc| soc.id == id).cloned())
    }

    /// Total units across societies passing the current search and filter.
    pub fn total_units(&self) -> u64 {
        self.with_state(|s| s.filtered().iter().map(|soc| u64::from(soc.total_units)).sum())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
