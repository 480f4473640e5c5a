//! Per-domain stores.

pub mod admin;
pub mod auth;
pub mod notification;
pub mod society;
pub mod theme;

pub use admin::{AdminProfile, AdminSortKey, AdminStatus, AdminStore};
pub use auth::{AuthState, AuthStore, ProfilePatch, UserProfile, UserRole};
pub use notification::{Notification, NotificationCategory, NotificationSortKey, NotificationStore};
pub use society::{Society, SocietySortKey, SocietyStatus, SocietyStore};
pub use theme::{ColorToken, Palette, ThemeMode, ThemeState, ThemeStore, UserMode};

/// Returned when parsing a domain enum from an unrecognised string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
}

impl UnknownVariant {
    pub(crate) fn new(kind: &'static str, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }
}
