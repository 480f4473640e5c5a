//! Flag catalogue: known flags, default groups and migration status.
//!
//! Known flags form a closed enum so callers get exhaustiveness checks. The
//! controller still stores values in a string-keyed map, which is where
//! remotely delivered keys unknown to this build end up.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Names of the built-in flag groups.
pub mod group {
    pub const MIGRATION: &str = "migration";
    pub const ADMIN: &str = "admin";
    pub const BILLING: &str = "billing";
    pub const EXPERIMENTAL: &str = "experimental";
}

/// Every flag this build knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FeatureFlag {
    #[serde(rename = "USE_AUTH_STORE")]
    UseAuthStore,
    #[serde(rename = "USE_FEATURE_FLAG_STORE")]
    UseFeatureFlagStore,
    #[serde(rename = "USE_THEME_STORE")]
    UseThemeStore,
    #[serde(rename = "USE_SOCIETY_STORE")]
    UseSocietyStore,
    #[serde(rename = "USE_ADMIN_STORE")]
    UseAdminStore,
    #[serde(rename = "USE_NOTIFICATION_STORE")]
    UseNotificationStore,
    #[serde(rename = "analytics_dashboard")]
    AnalyticsDashboard,
    #[serde(rename = "biometric_login")]
    BiometricLogin,
    #[serde(rename = "online_payments")]
    OnlinePayments,
    #[serde(rename = "visitor_pre_approval")]
    VisitorPreApproval,
    #[serde(rename = "governance_voting")]
    GovernanceVoting,
    #[serde(rename = "maintenance_tracking")]
    MaintenanceTracking,
    #[serde(rename = "push_notifications")]
    PushNotifications,
}

impl FeatureFlag {
    pub const ALL: [FeatureFlag; 13] = [
        Self::UseAuthStore,
        Self::UseFeatureFlagStore,
        Self::UseThemeStore,
        Self::UseSocietyStore,
        Self::UseAdminStore,
        Self::UseNotificationStore,
        Self::AnalyticsDashboard,
        Self::BiometricLogin,
        Self::OnlinePayments,
        Self::VisitorPreApproval,
        Self::GovernanceVoting,
        Self::MaintenanceTracking,
        Self::PushNotifications,
    ];

    /// Flags gating the cutover from legacy state handling to the stores.
    pub const MIGRATION: [FeatureFlag; 6] = [
        Self::UseAuthStore,
        Self::UseFeatureFlagStore,
        Self::UseThemeStore,
        Self::UseSocietyStore,
        Self::UseAdminStore,
        Self::UseNotificationStore,
    ];

    /// Wire key of this flag.
    pub fn key(self) -> &'static str {
        match self {
            Self::UseAuthStore => "USE_AUTH_STORE",
            Self::UseFeatureFlagStore => "USE_FEATURE_FLAG_STORE",
            Self::UseThemeStore => "USE_THEME_STORE",
            Self::UseSocietyStore => "USE_SOCIETY_STORE",
            Self::UseAdminStore => "USE_ADMIN_STORE",
            Self::UseNotificationStore => "USE_NOTIFICATION_STORE",
            Self::AnalyticsDashboard => "analytics_dashboard",
            Self::BiometricLogin => "biometric_login",
            Self::OnlinePayments => "online_payments",
            Self::VisitorPreApproval => "visitor_pre_approval",
            Self::GovernanceVoting => "governance_voting",
            Self::MaintenanceTracking => "maintenance_tracking",
            Self::PushNotifications => "push_notifications",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.key() == key)
    }

    pub fn is_migration(self) -> bool {
        Self::MIGRATION.contains(&self)
    }

    /// Value before any override, persisted state or remote refresh.
    pub fn default_enabled(self) -> bool {
        matches!(self, Self::MaintenanceTracking | Self::PushNotifications)
    }

    /// Built-in groups this flag belongs to.
    pub fn groups(self) -> &'static [&'static str] {
        match self {
            Self::UseAdminStore => &[group::MIGRATION, group::ADMIN],
            Self::UseAuthStore
            | Self::UseFeatureFlagStore
            | Self::UseThemeStore
            | Self::UseSocietyStore
            | Self::UseNotificationStore => &[group::MIGRATION],
            Self::AnalyticsDashboard => &[group::ADMIN, group::EXPERIMENTAL],
            Self::BiometricLogin | Self::VisitorPreApproval | Self::GovernanceVoting => {
                &[group::EXPERIMENTAL]
            }
            Self::OnlinePayments | Self::MaintenanceTracking => &[group::BILLING],
            Self::PushNotifications => &[],
        }
    }
}

impl fmt::Display for FeatureFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Returned when parsing a key this build does not know.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature flag: {0}")]
pub struct UnknownFlag(pub String);

impl FromStr for FeatureFlag {
    type Err = UnknownFlag;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s).ok_or_else(|| UnknownFlag(s.to_string()))
    }
}

/// Default value of every known flag, keyed by wire key.
pub fn default_flags() -> BTreeMap<String, bool> {
    FeatureFlag::ALL
        .into_iter()
        .map(|f| (f.key().to_string(), f.default_enabled()))
        .collect()
}

/// Built-in group definitions.
pub fn default_groups() -> BTreeMap<String, BTreeSet<String>> {
    let mut groups: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for flag in FeatureFlag::ALL {
        for name in flag.groups() {
            groups
                .entry((*name).to_string())
                .or_default()
                .insert(flag.key().to_string());
        }
    }
    groups
}

// ---------------------------------------------------------------------------
// Migration status
// ---------------------------------------------------------------------------

/// Read-only view of the migration flags, computed on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MigrationStatus {
    #[serde(rename = "USE_AUTH_STORE")]
    pub use_auth_store: bool,
    #[serde(rename = "USE_FEATURE_FLAG_STORE")]
    pub use_feature_flag_store: bool,
    #[serde(rename = "USE_THEME_STORE")]
    pub use_theme_store: bool,
    #[serde(rename = "USE_SOCIETY_STORE")]
    pub use_society_store: bool,
    #[serde(rename = "USE_ADMIN_STORE")]
    pub use_admin_store: bool,
    #[serde(rename = "USE_NOTIFICATION_STORE")]
    pub use_notification_store: bool,
}

impl MigrationStatus {
    /// Build from a lookup over migration flags.
    pub fn from_lookup(lookup: impl Fn(FeatureFlag) -> bool) -> Self {
        Self {
            use_auth_store: lookup(FeatureFlag::UseAuthStore),
            use_feature_flag_store: lookup(FeatureFlag::UseFeatureFlagStore),
            use_theme_store: lookup(FeatureFlag::UseThemeStore),
            use_society_store: lookup(FeatureFlag::UseSocietyStore),
            use_admin_store: lookup(FeatureFlag::UseAdminStore),
            use_notification_store: lookup(FeatureFlag::UseNotificationStore),
        }
    }

    /// Value of a migration flag; `None` for non-migration flags.
    pub fn get(&self, flag: FeatureFlag) -> Option<bool> {
        match flag {
            FeatureFlag::UseAuthStore => Some(self.use_auth_store),
            FeatureFlag::UseFeatureFlagStore => Some(self.use_feature_flag_store),
            FeatureFlag::UseThemeStore => Some(self.use_theme_store),
            FeatureFlag::UseSocietyStore => Some(self.use_society_store),
            FeatureFlag::UseAdminStore => Some(self.use_admin_store),
            FeatureFlag::UseNotificationStore => Some(self.use_notification_store),
            _ => None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureFlag, bool)> + '_ {
        FeatureFlag::MIGRATION
            .into_iter()
            .map(|f| (f, self.get(f).unwrap_or(false)))
    }

    pub fn enabled_count(&self) -> usize {
        self.iter().filter(|(_, on)| *on).count()
    }

    pub fn all_enabled(&self) -> bool {
        self.enabled_count() == FeatureFlag::MIGRATION.len()
    }

    pub fn all_disabled(&self) -> bool {
        self.enabled_count() == 0
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
