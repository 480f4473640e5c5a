//! Authentication store.
//!
//! Holds the signed-in resident or admin. Logging out always clears the
//! local session, whether or not the remote session could be invalidated:
//! a device must never look signed in after the user asked to leave.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use society_store::PersistenceAdapter;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::services::{AuthService, Credentials};
use crate::store::{ManagedStore, PersistedState, Store};

pub const STORE_ID: &str = "auth";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    #[default]
    Resident,
    Admin,
    SuperAdmin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub society_id: Option<String>,
    pub flat_number: Option<String>,
    #[serde(default)]
    pub role: UserRole,
    pub avatar_url: Option<String>,
}

/// Partial profile update; `None` fields are left as they are.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub flat_number: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthState {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub last_login_time: Option<DateTime<Utc>>,
    pub biometric_enabled: bool,
    pub is_loading: bool,
    pub error: Option<String>,
}

crate::impl_store_state!(AuthState);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSlice {
    pub user: Option<UserProfile>,
    pub is_authenticated: bool,
    pub last_login_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub biometric_enabled: bool,
}

impl PersistedState for AuthState {
    type Slice = AuthSlice;

    fn to_slice(&self) -> AuthSlice {
        AuthSlice {
            user: self.user.clone(),
            is_authenticated: self.is_authenticated,
            last_login_time: self.last_login_time,
            biometric_enabled: self.biometric_enabled,
        }
    }

    fn apply_slice(&mut self, slice: AuthSlice) {
        // A session without a user is not a session.
        self.is_authenticated = slice.is_authenticated && slice.user.is_some();
        self.user = slice.user;
        self.last_login_time = slice.last_login_time;
        self.biometric_enabled = slice.biometric_enabled;
    }
}

pub struct AuthStore {
    store: Store<AuthState>,
    persistence: Option<PersistenceAdapter>,
}

impl AuthStore {
    pub fn new() -> Self {
        Self {
            store: Store::new(STORE_ID, AuthState::default()),
            persistence: None,
        }
    }

    #[must_use]
    pub fn with_persistence(mut self, adapter: PersistenceAdapter) -> Self {
        self.persistence = Some(adapter);
        self
    }

    pub fn snapshot(&self) -> AuthState {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.store.subscribe()
    }

    pub fn initial_state(&self) -> &AuthState {
        self.store.initial_state()
    }

    pub fn is_authenticated(&self) -> bool {
        self.store.with_state(|s| s.is_authenticated)
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.store.with_state(|s| s.user.clone())
    }

    pub fn is_admin(&self) -> bool {
        self.store.with_state(|s| {
            s.user
                .as_ref()
                .is_some_and(|u| matches!(u.role, UserRole::Admin | UserRole::SuperAdmin))
        })
    }

    pub fn set_error(&self, error: Option<String>) {
        self.store.set_error(error);
    }

    pub fn set_loading(&self, loading: bool) {
        self.store.set_loading(loading);
    }

    /// Record a successful sign-in.
    pub fn login(&self, profile: UserProfile) {
        info!(user_id = %profile.id, "user logged in");
        self.store.update(|s| {
            s.user = Some(profile);
            s.is_authenticated = true;
            s.last_login_time = Some(Utc::now());
            s.is_loading = false;
            s.error = None;
        });
        self.persist_in_background();
    }

    /// Sign in through the auth service. A rejection is recorded in `error`
    /// and leaves the session as it was.
    pub async fn login_with(&self, service: &dyn AuthService, credentials: &Credentials) -> bool {
        self.store.update(|s| {
            s.is_loading = true;
            s.error = None;
        });
        match service.login(credentials).await {
            Ok(profile) => {
                self.login(profile);
                true
            }
            Err(err) => {
                warn!(%err, "login rejected");
                self.store.update(|s| {
                    s.is_loading = false;
                    s.error = Some(err.to_string());
                });
                false
            }
        }
    }

    /// Sign out. Local state is cleared first; the remote session is then
    /// invalidated on a best-effort basis.
    pub async fn logout(&self, service: &dyn AuthService) {
        let user_id = self.store.with_state(|s| s.user.as_ref().map(|u| u.id.clone()));

        self.store.update(|s| {
            s.user = None;
            s.is_authenticated = false;
            s.last_login_time = None;
            s.is_loading = false;
            s.error = None;
        });
        self.flush().await;

        if let Some(user_id) = user_id {
            match service.logout(&user_id).await {
                Ok(()) => info!(user_id = %user_id, "user logged out"),
                Err(err) => warn!(
                    user_id = %user_id,
                    %err,
                    "remote logout failed, local session cleared anyway"
                ),
            }
        }
    }

    /// Merge `patch` into the signed-in profile.
    pub fn update_profile(&self, patch: ProfilePatch) {
        if !self.is_authenticated() {
            self.store
                .set_error(Some("cannot update profile: no user is signed in".into()));
            return;
        }
        self.store.update(|s| {
            if let Some(user) = s.user.as_mut() {
                if let Some(name) = patch.name {
                    user.name = name;
                }
                if let Some(email) = patch.email {
                    user.email = Some(email);
                }
                if let Some(phone) = patch.phone {
                    user.phone = Some(phone);
                }
                if let Some(flat) = patch.flat_number {
                    user.flat_number = Some(flat);
                }
                if let Some(avatar) = patch.avatar_url {
                    user.avatar_url = Some(avatar);
                }
            }
        });
        self.persist_in_background();
    }

    pub fn set_biometric_enabled(&self, enabled: bool) {
        self.store.update(|s| s.biometric_enabled = enabled);
        self.persist_in_background();
    }

    /// Load the persisted session.
    pub async fn hydrate(&self) -> bool {
        match &self.persistence {
            Some(adapter) => self.store.hydrate(adapter).await,
            None => false,
        }
    }

    /// Write the current session and wait for the result.
    pub async fn flush(&self) -> bool {
        match &self.persistence {
            Some(adapter) => self.store.persist(adapter).await,
            None => false,
        }
    }

    fn persist_in_background(&self) {
        if let Some(adapter) = &self.persistence {
            self.store.persist_in_background(adapter);
        }
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManagedStore for AuthStore {
    fn id(&self) -> &'static str {
        STORE_ID
    }

    async fn reset(&self) {
        self.store.reset();
    }

    fn is_pristine(&self) -> bool {
        self.store.is_pristine()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
