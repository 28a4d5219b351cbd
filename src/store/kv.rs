//! SQLite-backed key/value cache.
//!
//! Stores one serialized payload per product key in a `cache_entries`
//! table. The database runs in WAL mode so readers (e.g. a service answering
//! lookups) are not blocked while a reconciliation run writes.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use super::{CacheStore, Listing, RejectedKey, StoreError, StoreResult};
use crate::key::ProductKey;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY NOT NULL,
    payload TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
"#;

/// Persistent key/value cache using SQLite.
pub struct SqliteCache {
    conn: Mutex<Connection>,
}

impl SqliteCache {
    /// Opens or creates a cache database at the specified path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the file cannot be opened, is
    /// not a SQLite database, or the schema cannot be created.
    pub fn open(path: &Path, timeout: Duration) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Connectivity(format!(
                        "cannot create cache directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }
        let conn = Connection::open(path).map_err(|e| {
            StoreError::Connectivity(format!("cannot open cache {}: {e}", path.display()))
        })?;
        Self::init(conn, timeout, true)
    }

    /// Opens a private in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if SQLite fails to initialize.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::init(Connection::open_in_memory()?, Duration::from_secs(5), false)
    }

    fn init(conn: Connection, timeout: Duration, wal: bool) -> StoreResult<Self> {
        conn.busy_timeout(timeout)?;
        if wal {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            log::trace!("Cache journal mode: {mode}");
        }
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Connectivity("cache connection lock poisoned".to_string()))
    }

    /// Number of cached entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the query fails.
    pub fn len(&self) -> StoreResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cache_entries", [], |r| r.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// True when nothing is cached.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the query fails.
    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Remove every entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the delete fails.
    pub fn clear(&self) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }

    /// Every `(key, payload)` pair, ordered by key.
    ///
    /// Rows whose key no longer parses are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Connectivity`] if the query fails.
    pub fn entries(&self) -> StoreResult<Vec<(ProductKey, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, payload FROM cache_entries ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (raw, payload) = row?;
            match ProductKey::parse(&raw) {
                Ok(key) => out.push((key, payload)),
                Err(e) => log::warn!("Skipping cache entry with bad key: {e}"),
            }
        }
        Ok(out)
    }
}

impl CacheStore for SqliteCache {
    fn listing(&self) -> StoreResult<Listing> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key FROM cache_entries")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut listing = Listing::default();
        for raw in rows {
            let raw = raw?;
            match ProductKey::parse(&raw) {
                Ok(key) => listing.keys.push(key),
                Err(error) => {
                    log::warn!("Cache entry has a malformed key: {error}");
                    listing.rejected.push(RejectedKey { raw, error });
                }
            }
        }
        Ok(listing)
    }

    fn get(&self, key: &ProductKey) -> StoreResult<Option<String>> {
        let conn = self.conn()?;
        let payload = conn
            .query_row(
                "SELECT payload FROM cache_entries WHERE key = ?1",
                params![key.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(payload)
    }

    fn put(&self, key: &ProductKey, payload: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO cache_entries (key, payload, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at",
            params![key.as_str(), payload, Utc::now().timestamp_millis()],
        )?;
        Ok(())
    }

    fn remove(&self, key: &ProductKey) -> StoreResult<()> {
        self.remove_raw(key.as_str())
    }

    fn remove_raw(&self, raw: &str) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![raw])?;
        Ok(())
    }
}
