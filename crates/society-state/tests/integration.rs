//! End-to-end tests for the society store runtime.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use society_state::domains::{
    AdminProfile, AdminStatus, ColorToken, Notification, NotificationCategory, ProfilePatch,
    Society, SocietyStatus, ThemeMode, UserMode, UserProfile, UserRole,
};
use society_state::flags::group;
use society_state::{
    AppStores, AuthService, Credentials, EventBus, FeatureFlag, FeatureFlagController,
    FlagSource, FlagSourceError, HttpFlagSource, ManagedStore, PersistOutcome, RefreshOutcome,
    ServiceError, StoreEvent, StoreRegistry,
};
use society_store::{
    DEFAULT_NAMESPACE, MemoryBackend, PersistenceAdapter, SqliteBackend, Storage,
    StorageBackend, StoreError, StoreResult,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use url::Url;

// ---------------------------------------------------------------------------
// Test doubles
// ---------------------------------------------------------------------------

/// Reads succeed (nothing is stored), every write is rejected.
struct RejectingWrites;

#[async_trait]
impl StorageBackend for RejectingWrites {
    fn name(&self) -> &'static str {
        "rejecting-writes"
    }

    async fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
        Ok(None)
    }

    async fn set_item(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("quota exceeded".into()))
    }

    async fn remove_item(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("quota exceeded".into()))
    }

    async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn clear(&self) -> StoreResult<()> {
        Err(StoreError::Unavailable("quota exceeded".into()))
    }
}

/// Every call fails.
struct BrokenBackend;

#[async_trait]
impl StorageBackend for BrokenBackend {
    fn name(&self) -> &'static str {
        "broken"
    }

    async fn get_item(&self, _key: &str) -> StoreResult<Option<String>> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn set_item(&self, _key: &str, _value: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn remove_item(&self, _key: &str) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }

    async fn clear(&self) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk on fire".into()))
    }
}

struct RejectingAuth;

#[async_trait]
impl AuthService for RejectingAuth {
    async fn login(&self, _credentials: &Credentials) -> Result<UserProfile, ServiceError> {
        Err(ServiceError::Unauthorized)
    }

    async fn logout(&self, _user_id: &str) -> Result<(), ServiceError> {
        Err(ServiceError::Network("gateway timeout".into()))
    }
}

struct FailingSource;

#[async_trait]
impl FlagSource for FailingSource {
    async fn fetch_flags(&self) -> Result<BTreeMap<String, bool>, FlagSourceError> {
        Err(FlagSourceError::Request("connection reset by peer".into()))
    }
}

/// A store whose reset reads the flag controller.
struct FlagReadingStore {
    flags: Arc<FeatureFlagController>,
    seen: Mutex<Vec<(bool, bool)>>,
}

#[async_trait]
impl ManagedStore for FlagReadingStore {
    fn id(&self) -> &'static str {
        "flag_reader"
    }

    async fn reset(&self) {
        let migration_off = self.flags.get_migration_status().all_disabled();
        let push_on = self.flags.is_enabled(FeatureFlag::PushNotifications);
        self.seen.lock().unwrap().push((migration_off, push_on));
    }

    fn is_pristine(&self) -> bool {
        true
    }
}

fn app_over(backend: impl StorageBackend + 'static) -> AppStores {
    let adapter = PersistenceAdapter::new(Storage::new(backend), DEFAULT_NAMESPACE);
    AppStores::new(adapter, &BTreeMap::new()).unwrap()
}

/// Let spawned background writes run to completion.
async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

fn resident() -> UserProfile {
    UserProfile {
        id: "u-42".into(),
        name: "Kiran Shah".into(),
        email: Some("kiran@example.com".into()),
        phone: Some("+91 90000 00000".into()),
        society_id: Some("s-1".into()),
        flat_number: Some("A-1203".into()),
        role: UserRole::Resident,
        avatar_url: None,
    }
}

/// Put every store of `app` away from its initial state.
async fn dirty_everything(app: &AppStores) {
    app.auth.login(resident());
    app.auth.set_biometric_enabled(true);
    app.flags
        .enable_migration_flags(FeatureFlag::MIGRATION.iter().map(|f| f.key()))
        .await;
    app.flags.enable_feature_group(group::EXPERIMENTAL).await;
    app.theme.toggle_theme();
    app.theme.set_user_mode(UserMode::Admin);
    app.theme.set_custom_color(ColorToken::Primary, "#112233");
    let _ = app.theme.resolved_palette(true);

    app.society.set_items(vec![Society {
        id: "s-1".into(),
        name: "Lake View".into(),
        city: "Bengaluru".into(),
        address: "Outer Ring Road".into(),
        total_units: 240,
        status: SocietyStatus::Active,
        created_at: Utc::now(),
    }]);
    app.society.set_search_query("lake");
    app.admin.onboard_admin(AdminProfile {
        id: "a-1".into(),
        name: "Farah".into(),
        email: "farah@example.com".into(),
        phone: None,
        society_id: "s-1".into(),
        role: UserRole::Admin,
        status: AdminStatus::Invited,
        invited_at: Utc::now(),
    });
    app.notifications.set_items(vec![Notification {
        id: "n-1".into(),
        title: "Lift maintenance".into(),
        body: "Tower B lift offline Saturday".into(),
        category: NotificationCategory::Maintenance,
        read: false,
        created_at: Utc::now(),
    }]);
    app.notifications.toggle_selection("n-1");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enabling_one_migration_flag_leaves_the_others() {
    let app = AppStores::in_memory().unwrap();
    let before = app.flags.get_migration_status();
    assert!(before.all_disabled());

    app.flags.enable_migration_flags(["USE_AUTH_STORE"]).await;

    let after = app.flags.get_migration_status();
    assert!(after.use_auth_store);
    assert_eq!(after.enabled_count(), 1);
    assert_eq!(after.get(FeatureFlag::UseThemeStore), Some(false));
}

#[tokio::test]
async fn theme_toggle_from_system() {
    let app = AppStores::in_memory().unwrap();
    assert_eq!(app.theme.theme_mode(), ThemeMode::System);
    app.theme.toggle_theme();
    assert_eq!(app.theme.theme_mode(), ThemeMode::Light);
    app.theme.toggle_theme();
    assert_eq!(app.theme.theme_mode(), ThemeMode::Dark);
}

#[tokio::test]
async fn rejected_writes_do_not_block_flag_changes() {
    let app = app_over(RejectingWrites);
    let update = app.flags.enable_feature("analytics_dashboard").await;
    assert_eq!(update.persist, PersistOutcome::Failed);
    assert!(app.flags.is_feature_enabled("analytics_dashboard"));
}

#[tokio::test]
async fn corrupt_payloads_hydrate_to_defaults() {
    let backend = MemoryBackend::new();
    for store_id in ["auth", "feature_flags", "theme"] {
        backend
            .set_item(&format!("{DEFAULT_NAMESPACE}:{store_id}"), "invalid-json{")
            .await
            .unwrap();
    }

    let app = app_over(backend);
    let report = app.hydrate().await;
    assert!(!report.auth && !report.feature_flags && !report.theme);
    assert!(app.registry().all_pristine());
    assert!(!app.auth.is_authenticated());
}

#[tokio::test]
async fn logout_clears_session_when_remote_rejects() {
    let app = AppStores::in_memory().unwrap();
    app.auth.login(resident());
    assert!(app.auth.is_authenticated());

    app.auth.logout(&RejectingAuth).await;

    assert!(!app.auth.is_authenticated());
    assert!(app.auth.current_user().is_none());
}

// ---------------------------------------------------------------------------
// Reset and rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reset_all_returns_every_store_to_initial_state() {
    let app = AppStores::in_memory().unwrap();
    dirty_everything(&app).await;
    assert_eq!(app.registry().dirty_stores().len(), 6);

    let report = app.reset_all_stores().await;
    assert_eq!(
        report.store_ids,
        vec!["auth", "feature_flags", "theme", "society", "admin", "notification"]
    );
    assert!(app.registry().all_pristine());
    assert_eq!(&app.auth.snapshot(), app.auth.initial_state());
    assert_eq!(&app.flags.snapshot(), app.flags.initial_state());
    assert_eq!(&app.theme.snapshot(), app.theme.initial_state());
    assert_eq!(&app.society.snapshot(), app.society.initial_state());
    assert_eq!(&app.admin.snapshot(), app.admin.initial_state());
    assert_eq!(&app.notifications.snapshot(), app.notifications.initial_state());
}

#[tokio::test]
async fn reading_the_palette_keeps_the_app_pristine() {
    let app = AppStores::in_memory().unwrap();
    let _ = app.theme.resolved_palette(false);
    assert!(app.registry().all_pristine());
    assert!(app.registry().dirty_stores().is_empty());
}

#[tokio::test]
async fn reset_twice_equals_reset_once() {
    let app = AppStores::in_memory().unwrap();
    dirty_everything(&app).await;

    app.reset_all_stores().await;
    let once = (
        app.auth.snapshot(),
        app.flags.snapshot(),
        app.theme.snapshot(),
        app.society.snapshot(),
        app.admin.snapshot(),
        app.notifications.snapshot(),
    );
    app.reset_all_stores().await;
    let twice = (
        app.auth.snapshot(),
        app.flags.snapshot(),
        app.theme.snapshot(),
        app.society.snapshot(),
        app.admin.snapshot(),
        app.notifications.snapshot(),
    );
    assert_eq!(once, twice);
}

#[tokio::test]
async fn rollback_over_broken_storage() {
    let app = app_over(BrokenBackend);
    assert!(!app.persistence().storage().probe().await);
    dirty_everything(&app).await;
    assert!(app.flags.get_migration_status().all_enabled());

    let report = app.emergency_rollback().await;

    assert_eq!(report.persist, PersistOutcome::Failed);
    assert_eq!(report.reset.store_ids.len(), 6);
    assert!(app.flags.get_migration_status().all_disabled());
    assert!(app.registry().all_pristine());
}

#[tokio::test]
async fn rollback_is_durable_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("society.db");

    {
        let backend = SqliteBackend::open_and_migrate(path.clone()).await.unwrap();
        let app = app_over(backend);
        app.flags
            .enable_migration_flags(["USE_AUTH_STORE", "USE_ADMIN_STORE"])
            .await;
        let report = app.emergency_rollback().await;
        assert_eq!(report.persist, PersistOutcome::Written);
    }

    let backend = SqliteBackend::open_and_migrate(path).await.unwrap();
    let app = app_over(backend);
    assert!(app.hydrate().await.feature_flags);
    assert!(app.flags.get_migration_status().all_disabled());
}

#[tokio::test]
async fn stores_reading_flags_during_rollback_see_them_off() {
    let flags = Arc::new(FeatureFlagController::new());
    let reader = Arc::new(FlagReadingStore {
        flags: Arc::clone(&flags),
        seen: Mutex::new(Vec::new()),
    });

    let mut registry = StoreRegistry::new(Arc::clone(&flags), EventBus::default());
    registry.register(reader.clone()).unwrap();
    registry.register(flags.clone()).unwrap();

    flags.enable_migration_flags(["USE_SOCIETY_STORE"]).await;
    assert!(flags.is_enabled(FeatureFlag::PushNotifications));

    registry.emergency_rollback().await;

    // Registered before the flag store: it resets while every flag is off.
    assert_eq!(*reader.seen.lock().unwrap(), vec![(true, false)]);
    // The flag store itself is back at its initial state.
    assert!(flags.is_pristine());
    assert!(flags.get_migration_status().all_disabled());
}

#[tokio::test]
async fn stores_registered_after_flags_see_initial_flags() {
    let mut app = AppStores::in_memory().unwrap();
    let reader = Arc::new(FlagReadingStore {
        flags: Arc::clone(&app.flags),
        seen: Mutex::new(Vec::new()),
    });
    app.registry_mut().register(reader.clone()).unwrap();

    app.flags.enable_migration_flags(["USE_NOTIFICATION_STORE"]).await;
    app.emergency_rollback().await;

    assert_eq!(*reader.seen.lock().unwrap(), vec![(true, true)]);
}

#[tokio::test]
async fn rollback_publishes_events() {
    let app = AppStores::in_memory().unwrap();
    let mut rx = app.registry().events().subscribe();
    app.flags.enable_feature("online_payments").await;

    app.emergency_rollback().await;

    let mut saw_reset_all = false;
    let mut rollback = None;
    while let Ok(event) = rx.try_recv() {
        match &*event {
            StoreEvent::AllStoresReset { store_ids, .. } => {
                saw_reset_all = store_ids.len() == 6;
            }
            StoreEvent::EmergencyRollback {
                flags_disabled,
                persisted,
                ..
            } => rollback = Some((*flags_disabled, *persisted)),
            _ => {}
        }
    }
    assert!(saw_reset_all);
    // online_payments, maintenance_tracking and push_notifications were on.
    assert_eq!(rollback, Some((3, true)));
}

// ---------------------------------------------------------------------------
// Flags
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_group_enables_and_disables_as_a_unit() {
    let app = AppStores::in_memory().unwrap();
    for name in app.flags.groups().keys() {
        app.flags.enable_feature_group(name).await;
        assert!(app.flags.get_feature_group(name).values().all(|on| *on), "{name}");
        app.flags.disable_feature_group(name).await;
        assert!(app.flags.get_feature_group(name).values().all(|on| !*on), "{name}");
    }
}

#[tokio::test]
async fn unknown_keys_are_disabled() {
    let app = AppStores::in_memory().unwrap();
    assert!(!app.flags.is_feature_enabled("USE_TELEPORTER"));
    assert!(app.flags.get_feature_group("nonexistent").is_empty());
}

#[tokio::test]
async fn failed_refresh_keeps_flags() {
    let app = AppStores::in_memory().unwrap();
    app.flags.enable_feature("biometric_login").await;
    let before = app.flags.flags();

    let outcome = app.flags.refresh_flags(&FailingSource).await;

    assert!(!outcome.is_updated());
    assert_eq!(app.flags.flags(), before);
    assert!(!app.flags.snapshot().is_loading);
}

// ---------------------------------------------------------------------------
// Remote flag source over HTTP
// ---------------------------------------------------------------------------

/// Answer one HTTP request with `status` and `body`, then close.
async fn serve_once(status: &'static str, body: &'static str) -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = vec![0u8; 4096];
        let mut read = 0;
        loop {
            let n = socket.read(&mut buf[read..]).await.unwrap();
            read += n;
            if n == 0 || buf[..read].windows(4).any(|w| w == b"\r\n\r\n") {
                break;
            }
        }
        let response = format!(
            "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.unwrap();
    });
    Url::parse(&format!("http://{addr}/flags.json")).unwrap()
}

fn source(url: Url) -> HttpFlagSource {
    HttpFlagSource::new(url, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn http_refresh_applies_remote_values() {
    let url = serve_once("200 OK", r#"{"USE_THEME_STORE": true, "new_lobby_kiosk": true}"#).await;
    let app = AppStores::in_memory().unwrap();

    let outcome = app.flags.refresh_flags(&source(url)).await;

    let RefreshOutcome::Updated(update) = outcome else {
        panic!("refresh should succeed");
    };
    assert_eq!(update.changed, vec!["USE_THEME_STORE", "new_lobby_kiosk"]);
    assert!(app.flags.is_enabled(FeatureFlag::UseThemeStore));
    assert!(app.flags.is_feature_enabled("new_lobby_kiosk"));
    assert!(app.flags.snapshot().last_refreshed.is_some());
}

#[tokio::test]
async fn http_malformed_body_is_ignored() {
    let url = serve_once("200 OK", "invalid-json{").await;
    let app = AppStores::in_memory().unwrap();
    let before = app.flags.snapshot();

    let outcome = app.flags.refresh_flags(&source(url)).await;

    assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
    assert_eq!(app.flags.snapshot(), before);
}

#[tokio::test]
async fn http_server_error_is_ignored() {
    let url = serve_once("500 Internal Server Error", r#"{"error":"boom"}"#).await;
    let err = source(url).fetch_flags().await.unwrap_err();
    assert_eq!(err, FlagSourceError::Status(500));
}

#[tokio::test]
async fn http_connection_refused_is_ignored() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let url = Url::parse(&format!("http://{addr}/flags.json")).unwrap();

    let app = AppStores::in_memory().unwrap();
    let outcome = app.flags.refresh_flags(&source(url)).await;
    assert!(matches!(outcome, RefreshOutcome::Failed { .. }));
    assert!(app.flags.get_migration_status().all_disabled());
}

// ---------------------------------------------------------------------------
// Persistence through the app
// ---------------------------------------------------------------------------

#[tokio::test]
async fn persisted_slices_survive_restart() {
    let backend = MemoryBackend::new();
    {
        let app = app_over(backend.clone());
        app.auth.login(resident());
        app.auth.update_profile(ProfilePatch {
            avatar_url: Some("https://cdn.example.com/k.png".into()),
            ..Default::default()
        });
        app.theme.set_theme_mode(ThemeMode::Dark);
        app.flags.enable_feature("online_payments").await;
        app.society.set_search_query("not persisted");
        assert!(app.auth.flush().await);
        assert!(app.theme.flush().await);
    }

    let app = app_over(backend);
    let report = app.hydrate().await;
    assert!(report.auth && report.feature_flags && report.theme);
    assert!(app.auth.is_authenticated());
    assert_eq!(
        app.auth.current_user().unwrap().avatar_url.as_deref(),
        Some("https://cdn.example.com/k.png")
    );
    assert_eq!(app.theme.theme_mode(), ThemeMode::Dark);
    assert!(app.flags.is_feature_enabled("online_payments"));
    assert!(app.society.is_pristine());
}

#[tokio::test]
async fn reset_leaves_persisted_slices_untouched() {
    let backend = MemoryBackend::new();
    let storage = Storage::new(backend.clone());
    let app = app_over(backend);
    app.auth.login(resident());
    app.theme.set_theme_mode(ThemeMode::Dark);
    app.theme.set_custom_color(ColorToken::Accent, "#abcdef");
    assert!(app.auth.flush().await);
    assert!(app.theme.flush().await);
    settle().await;

    let auth_before = storage.get("society:auth").await;
    let theme_before = storage.get("society:theme").await;
    assert!(auth_before.is_some() && theme_before.is_some());

    app.reset_all_stores().await;
    settle().await;

    assert_eq!(storage.get("society:auth").await, auth_before);
    assert_eq!(storage.get("society:theme").await, theme_before);
}

#[tokio::test]
async fn writes_queued_before_reset_keep_the_session() {
    let backend = MemoryBackend::new();
    {
        let app = app_over(backend.clone());
        app.auth.login(resident());
        assert!(app.auth.flush().await);
        app.auth.set_biometric_enabled(true);
        app.theme.set_custom_color(ColorToken::Primary, "#112233");
        app.reset_all_stores().await;
        settle().await;
    }

    let app = app_over(backend);
    assert!(app.hydrate().await.auth);
    assert!(app.auth.is_authenticated());
    assert!(app.auth.snapshot().biometric_enabled);
    assert_eq!(
        app.theme.snapshot().custom_colors.get(&ColorToken::Primary).map(String::as_str),
        Some("#112233")
    );
}
