//! SQLite-backed lock store.
//! A file-based backend that is atomic across processes, not just threads.
//!
//! Enable with the `sqlite` feature flag:
//! ```toml
//! relock-core = { version = "0.1", features = ["sqlite"] }
//! ```

use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::store::{KeyValueStore, StoreError};

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// A persistent lock store backed by a SQLite file.
///
/// Uses WAL mode; `set_if_absent` relies on the primary-key conflict
/// clause and `get_and_replace` runs inside an IMMEDIATE transaction, so
/// each primitive is a single atomic unit even with contenders in other
/// processes.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Unavailable(format!("cannot open '{}': {}", path, e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        // Contending processes block briefly instead of erroring on a busy db.
        conn.busy_timeout(Duration::from_millis(5_000))?;

        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS locks (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock_conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyValueStore for SqliteStore {
    fn set_if_absent(&self, key: &str, value: &str) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        let written = conn.execute(
            "INSERT INTO locks (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO NOTHING",
            params![key, value],
        )?;
        Ok(written == 1)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let conn = self.lock_conn();
        let value = conn
            .query_row("SELECT value FROM locks WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        Ok(value)
    }

    fn get_and_replace(&self, key: &str, value: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.lock_conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let previous = tx
            .query_row("SELECT value FROM locks WHERE key = ?1", params![key], |row| {
                row.get::<_, String>(0)
            })
            .optional()?;
        tx.execute(
            "INSERT INTO locks (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        tx.commit()?;
        Ok(previous)
    }

    fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let conn = self.lock_conn();
        let removed = conn.execute("DELETE FROM locks WHERE key = ?1", params![key])?;
        Ok(removed > 0)
    }
}
