//! External service collaborators.
//!
//! Network clients for authentication, the society directory and
//! notifications live outside this crate. Stores only need them to resolve
//! or reject; these traits are that contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domains::admin::AdminProfile;
use crate::domains::auth::UserProfile;
use crate::domains::notification::Notification;
use crate::domains::society::Society;

/// Failure reported by an external service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out")]
    Timeout,

    #[error("not authorized")]
    Unauthorized,

    /// The service answered with an application-level error.
    #[error("{0}")]
    Rejected(String),
}

/// Login credentials handed to [`AuthService::login`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Phone number or email.
    pub identifier: String,
    /// Password or one-time code.
    pub secret: String,
}

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<UserProfile, ServiceError>;

    /// Invalidate the remote session of `user_id`.
    async fn logout(&self, user_id: &str) -> Result<(), ServiceError>;
}

#[async_trait]
pub trait DirectoryService: Send + Sync {
    async fn fetch_societies(&self) -> Result<Vec<Society>, ServiceError>;

    async fn fetch_admins(&self) -> Result<Vec<AdminProfile>, ServiceError>;
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn fetch_notifications(&self) -> Result<Vec<Notification>, ServiceError>;

    async fn mark_read(&self, notification_id: &str) -> Result<(), ServiceError>;
}
