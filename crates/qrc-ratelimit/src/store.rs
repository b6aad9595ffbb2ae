use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum WindowStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Window store lock poisoned")]
    Poisoned,
    #[error("Window store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Window store task failed: {0}")]
    Task(String),
}

impl WindowStoreError {
    pub fn error_code(&self) -> &'static str {
        match self {
            WindowStoreError::Sqlite(_) => "WINDOW_SQLITE",
            WindowStoreError::Poisoned => "WINDOW_POISONED",
            WindowStoreError::Timeout(_) => "WINDOW_TIMEOUT",
            WindowStoreError::Task(_) => "WINDOW_TASK",
        }
    }
}

/// Shared fixed-window hit counters. `hit` must be atomic across every
/// process sharing the store.
pub trait WindowStore: Send + Sync {
    /// Count one hit against `key` and return the count in the window. A key
    /// whose `expires_at` has passed starts over at 1.
    fn hit(&self, key: &str, expires_at: i64, now: i64) -> Result<u64, WindowStoreError>;

    /// Delete windows that expired at or before `now`.
    fn purge_expired(&self, now: i64) -> Result<usize, WindowStoreError>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS rate_windows (
        key TEXT PRIMARY KEY,
        hits INTEGER NOT NULL CHECK (hits >= 0),
        expires_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_rate_windows_expiry ON rate_windows(expires_at);
"#;

pub struct SqliteWindowStore {
    conn: Mutex<Connection>,
}

impl SqliteWindowStore {
    pub fn open(path: &Path) -> Result<Self, WindowStoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(Duration::from_secs(1))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self, WindowStoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, WindowStoreError> {
        self.conn.lock().map_err(|_| WindowStoreError::Poisoned)
    }
}

impl WindowStore for SqliteWindowStore {
    fn hit(&self, key: &str, expires_at: i64, now: i64) -> Result<u64, WindowStoreError> {
        let conn = self.lock()?;
        let hits: i64 = conn.query_row(
            "INSERT INTO rate_windows (key, hits, expires_at) VALUES (?1, 1, ?2)
             ON CONFLICT(key) DO UPDATE SET
                 hits = CASE WHEN rate_windows.expires_at <= ?3 THEN 1 ELSE rate_windows.hits + 1 END,
                 expires_at = CASE WHEN rate_windows.expires_at <= ?3 THEN excluded.expires_at ELSE rate_windows.expires_at END
             RETURNING hits",
            params![key, expires_at, now],
            |row| row.get(0),
        )?;
        Ok(hits.max(0) as u64)
    }

    fn purge_expired(&self, now: i64) -> Result<usize, WindowStoreError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM rate_windows WHERE expires_at <= ?1", [now])?;
        Ok(removed)
    }
}
