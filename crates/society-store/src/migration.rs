//! Schema migrations for the SQLite backend.
//!
//! The applied version lives in SQLite's `user_version` header field and is
//! bumped inside the same transaction as the migration SQL, so a failed
//! migration leaves both the schema and the version untouched.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Append only.
static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "key-value table",
    sql: "CREATE TABLE kv_store (
              key        TEXT PRIMARY KEY,
              value      TEXT NOT NULL,
              updated_at INTEGER NOT NULL
          );",
}];

/// Run all pending migrations against `conn`.
///
/// Synchronous; call from `spawn_blocking`.
pub fn run_all(conn: &Connection) -> StoreResult<()> {
    let current = current_version(conn)?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > current);

    let mut applied = 0;
    for migration in pending {
        info!(
            version = migration.version,
            description = migration.description,
            "applying kv migration"
        );
        apply(conn, migration).map_err(|e| StoreError::Migration {
            version: migration.version,
            message: e.to_string(),
        })?;
        applied += 1;
    }
    debug!(from = current, applied, "kv schema up to date");
    Ok(())
}

/// Schema version recorded in the database, 0 for a fresh file.
pub fn current_version(conn: &Connection) -> StoreResult<u32> {
    conn.pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| StoreError::Migration {
            version: 0,
            message: format!("failed to read user_version: {e}"),
        })
}

/// Version the schema reaches after [`run_all`].
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

fn apply(conn: &Connection, migration: &Migration) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute_batch(migration.sql)?;
    tx.pragma_update(None, "user_version", migration.version)?;
    tx.commit()
}

// ── tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_ordered() {
        for pair in MIGRATIONS.windows(2) {
            assert!(pair[0].version < pair[1].version);
        }
    }

    #[test]
    fn run_all_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(current_version(&conn).unwrap(), 0);
        run_all(&conn).unwrap();
        run_all(&conn).unwrap();
        assert_eq!(current_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn failed_migration_keeps_version() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE kv_store (key TEXT);").unwrap();
        let err = run_all(&conn).unwrap_err();
        assert!(matches!(err, StoreError::Migration { version: 1, .. }));
        assert_eq!(current_version(&conn).unwrap(), 0);
    }

    #[test]
    fn kv_table_accepts_rows() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        conn.execute(
            "INSERT INTO kv_store (key, value, updated_at) VALUES ('k', 'v', 0)",
            [],
        )
        .unwrap();
        let value: String = conn
            .query_row("SELECT value FROM kv_store WHERE key = 'k'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(value, "v");
    }
}
