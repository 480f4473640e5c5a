//! Durable key-value backend on SQLite.
//!
//! The connection sits behind an `Arc<Mutex<>>`; every call is dispatched to
//! the blocking pool with `tokio::task::spawn_blocking` so the async runtime
//! never waits on file I/O.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::Connection;
use tracing::{debug, info, instrument};

use crate::backend::StorageBackend;
use crate::error::{StoreError, StoreResult};
use crate::migration;

const UPSERT: &str = "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3) \
                      ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                      updated_at = excluded.updated_at";

/// SQLite-backed [`StorageBackend`].
#[derive(Clone)]
pub struct SqliteBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBackend {
    /// Open (or create) a database at `path` and apply pragmas.
    ///
    /// Blocks briefly on file I/O; prefer [`SqliteBackend::open_and_migrate`]
    /// from async code.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening kv database");

        let conn = Connection::open(path)?;
        Self::apply_pragmas(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        debug!("opening in-memory kv database");
        let conn = Connection::open_in_memory()?;
        Self::apply_pragmas(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the database off the runtime and run pending migrations.
    pub async fn open_and_migrate(path: impl AsRef<Path> + Send + 'static) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let backend = tokio::task::spawn_blocking(move || Self::open(&path)).await??;
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Run all pending schema migrations.
    pub async fn run_migrations(&self) -> StoreResult<()> {
        self.with_conn(|conn| migration::run_all(conn)).await
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| StoreError::TaskJoin(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }

    fn apply_pragmas(conn: &Connection) -> StoreResult<()> {
        // WAL keeps readers unblocked while a slice is being written.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.pragma_update(None, "temp_store", "MEMORY")?;
        conn.pragma_update(None, "busy_timeout", 5_000_i32)?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    #[instrument(skip(self))]
    async fn get_item(&self, key: &str) -> StoreResult<Option<String>> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            let result = conn.query_row(
                "SELECT value FROM kv_store WHERE key = ?1",
                rusqlite::params![key],
                |row| row.get(0),
            );
            match result {
                Ok(value) => Ok(Some(value)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    #[instrument(skip(self, value))]
    async fn set_item(&self, key: &str, value: &str) -> StoreResult<()> {
        let key = key.to_string();
        let value = value.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                UPSERT,
                rusqlite::params![key, value, chrono::Utc::now().timestamp_millis()],
            )?;
            debug!(key = %key, "kv entry written");
            Ok(())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn remove_item(&self, key: &str) -> StoreResult<()> {
        let key = key.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])?;
            Ok(())
        })
        .await
    }

    async fn get_all_keys(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv_store ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(keys)
        })
        .await
    }

    async fn clear(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv_store", [])?;
            Ok(())
        })
        .await
    }

    async fn multi_set(&self, pairs: &[(String, String)]) -> StoreResult<()> {
        let pairs = pairs.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let now = chrono::Utc::now().timestamp_millis();
            for (key, value) in &pairs {
                tx.execute(UPSERT, rusqlite::params![key, value, now])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn multi_remove(&self, keys: &[String]) -> StoreResult<()> {
        let keys = keys.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            for key in &keys {
                tx.execute("DELETE FROM kv_store WHERE key = ?1", rusqlite::params![key])?;
            }
            tx.commit()?;
            Ok(())
        })
        .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
