//! SQLite connection management and schema migration.
//! All stores share one connection behind a mutex; SQLite serializes the
//! writes, tenants are isolated by `client_id` columns.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::Connection;
use wasend_core::{Result, WasendError};

/// Shared database handle for all Wasend stores.
pub struct StoreDb {
    conn: Mutex<Connection>,
}

impl StoreDb {
    /// Open or create the database at `path` and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| WasendError::storage(format!("DB open: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        tracing::debug!("💾 Store opened at {}", path.display());
        Ok(db)
    }

    /// In-memory database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| WasendError::storage(format!("DB open: {e}")))?;
        let db = Self { conn: Mutex::new(conn) };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute_batch(
                "
            -- Per-tenant key/value state (session tokens, small blobs).
            -- kind is 'string' or 'object'; one row per (client_id, key),
            -- so setting one kind replaces the other.
            CREATE TABLE IF NOT EXISTS session_store (
                client_id TEXT NOT NULL,
                key TEXT NOT NULL,
                kind TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (client_id, key)
            );

            -- Durable work queue. (client_id, key) is the idempotency key;
            -- status only moves PENDING -> SUCCESS | FAILED.
            CREATE TABLE IF NOT EXISTS pending_requests (
                client_id TEXT NOT NULL,
                key TEXT NOT NULL,
                kind TEXT NOT NULL,              -- SAVED_CONTACTS | NON_SAVED_CONTACTS | SEND_MESSAGE
                data TEXT NOT NULL,              -- JSON payload
                status TEXT NOT NULL DEFAULT 'PENDING',
                error TEXT,
                reason TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                not_before TEXT,                 -- earliest dispatch instant
                created_at TEXT NOT NULL,
                completed_at TEXT,
                PRIMARY KEY (client_id, key)
            );
            CREATE INDEX IF NOT EXISTS idx_pending_due
                ON pending_requests (kind, status, not_before);

            -- Submitted campaigns, kept for replay and status reporting.
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                client_id TEXT NOT NULL,
                definition TEXT NOT NULL,        -- JSON campaign spec
                status TEXT NOT NULL DEFAULT 'active',
                created_at TEXT NOT NULL
            );

            -- Per-recipient, per-step outcomes. Immutable once written.
            CREATE TABLE IF NOT EXISTS send_results (
                campaign_id TEXT NOT NULL,
                recipient TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                status TEXT NOT NULL,            -- SENT | FAILED | SKIPPED
                error_reason TEXT,
                sent_at TEXT,
                PRIMARY KEY (campaign_id, recipient, step_index)
            );
         ",
            )
        })
    }

    /// Run `f` against the connection, mapping errors to `Storage`.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| WasendError::storage(format!("DB lock poisoned: {e}")))?;
        f(&conn).map_err(|e| WasendError::storage(e.to_string()))
    }

    /// Like `with_conn` but for operations that need a mutable connection
    /// (transactions).
    pub(crate) fn with_conn_mut<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> rusqlite::Result<T>,
    ) -> Result<T> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| WasendError::storage(format!("DB lock poisoned: {e}")))?;
        f(&mut conn).map_err(|e| WasendError::storage(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_migrate() {
        let dir = std::env::temp_dir().join("wasend-db-test");
        std::fs::create_dir_all(&dir).ok();
        let db = StoreDb::open(&dir.join("test.db")).unwrap();
        let count: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM pending_requests", [], |r| r.get(0))
            })
            .unwrap();
        assert_eq!(count, 0);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn migrate_is_idempotent() {
        let db = StoreDb::open_in_memory().unwrap();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }
}
