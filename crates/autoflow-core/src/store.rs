//! SQLite-backed persistent state shared by plugins.
//!
//! Tables:
//! - `seen`          — fingerprints remembered by the `seen` plugin
//! - `list_entries`  — named entry lists (`entry_list`, `list_add`, ...)

use std::path::Path;
use std::sync::Mutex;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};
use serde_json::{Map, Value};

use crate::entry::Entry;
use crate::error::{AutoflowError, Result};

/// Persistent store; one connection guarded by a mutex.
pub struct Store {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

impl Store {
    /// Open or create the database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        tracing::info!("🗄️ Store opened: {}", path.display());
        Ok(store)
    }

    /// Transient store, used by tests and `--test` runs.
    pub fn in_memory() -> Result<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.migrate()?;
        Ok(store)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| AutoflowError::Store("connection mutex poisoned".into()))
    }

    fn migrate(&self) -> Result<()> {
        self.lock()?.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS seen (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task TEXT NOT NULL,
                title TEXT NOT NULL,
                value TEXT NOT NULL,
                added_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_seen_value ON seen(value);

            CREATE TABLE IF NOT EXISTS list_entries (
                list TEXT NOT NULL,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                fields TEXT NOT NULL,       -- JSON object
                added_at TEXT NOT NULL,
                PRIMARY KEY (list, url)
            );
            ",
        )?;
        Ok(())
    }

    // ─── Seen ─────────────────────────────────────────────────

    /// True when any of `values` has been remembered before.
    pub fn is_seen(&self, values: &[&str]) -> Result<bool> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached("SELECT 1 FROM seen WHERE value = ?1 LIMIT 1")?;
        for value in values {
            if stmt.exists(params![value])? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Remember the fingerprints of one entry.
    pub fn remember(&self, task: &str, title: &str, values: &[&str]) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();
        for value in values {
            conn.execute(
                "INSERT INTO seen (task, title, value, added_at) VALUES (?1, ?2, ?3, ?4)",
                params![task, title, value, now],
            )?;
        }
        Ok(())
    }

    /// Forget every fingerprint matching `value` or recorded under that title.
    pub fn forget(&self, value: &str) -> Result<usize> {
        let n = self
            .lock()?
            .execute("DELETE FROM seen WHERE value = ?1 OR title = ?1", params![value])?;
        Ok(n)
    }

    pub fn seen_count(&self) -> Result<usize> {
        let n: i64 = self
            .lock()?
            .query_row("SELECT COUNT(*) FROM seen", [], |row| row.get(0))?;
        Ok(n as usize)
    }

    // ─── Entry lists ──────────────────────────────────────────

    /// Entries of `list` in insertion order.
    pub fn list_entries(&self, list: &str) -> Result<Vec<Entry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT fields FROM list_entries WHERE list = ?1 ORDER BY added_at, rowid",
        )?;
        let rows = stmt.query_map(params![list], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for raw in rows {
            let raw = raw?;
            match serde_json::from_str::<Map<String, Value>>(&raw) {
                Ok(map) => entries.push(Entry::from_map(map)),
                Err(e) => tracing::warn!("⚠️ Skipping corrupt entry in list '{list}': {e}"),
            }
        }
        Ok(entries)
    }

    /// Add `entry` to `list`; false when its url is already listed.
    pub fn list_add(&self, list: &str, entry: &Entry) -> Result<bool> {
        let fields = serde_json::to_string(&entry.to_map())
            .map_err(|e| AutoflowError::Store(format!("serialize entry: {e}")))?;
        let n = self.lock()?.execute(
            "INSERT OR IGNORE INTO list_entries (list, url, title, fields, added_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![list, entry.url(), entry.title(), fields, Utc::now().to_rfc3339()],
        )?;
        Ok(n > 0)
    }

    /// Remove the entry with `url` from `list`.
    pub fn list_remove(&self, list: &str, url: &str) -> Result<bool> {
        let n = self
            .lock()?
            .execute("DELETE FROM list_entries WHERE list = ?1 AND url = ?2", params![list, url])?;
        Ok(n > 0)
    }

    pub fn list_contains(&self, list: &str, url: &str) -> Result<bool> {
        let found = self
            .lock()?
            .query_row(
                "SELECT 1 FROM list_entries WHERE list = ?1 AND url = ?2",
                params![list, url],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seen_roundtrip() {
        let store = Store::in_memory().unwrap();
        assert!(!store.is_seen(&["http://a/1"]).unwrap());
        store.remember("tv", "Show.S01E01", &["http://a/1", "Show.S01E01"]).unwrap();
        assert!(store.is_seen(&["other", "http://a/1"]).unwrap());
        assert_eq!(store.seen_count().unwrap(), 2);
        assert_eq!(store.forget("Show.S01E01").unwrap(), 2);
        assert!(!store.is_seen(&["http://a/1"]).unwrap());
    }

    #[test]
    fn test_list_ops() {
        let store = Store::in_memory().unwrap();
        let entry = Entry::new("A", "http://a");
        assert!(store.list_add("watch", &entry).unwrap());
        assert!(!store.list_add("watch", &entry).unwrap());
        assert!(store.list_contains("watch", "http://a").unwrap());
        assert!(!store.list_contains("other", "http://a").unwrap());

        let entries = store.list_entries("watch").unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].title(), "A");

        assert!(store.list_remove("watch", "http://a").unwrap());
        assert!(store.list_entries("watch").unwrap().is_empty());
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite");
        {
            let store = Store::open(&path).unwrap();
            store.remember("t", "x", &["x"]).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert!(store.is_seen(&["x"]).unwrap());
    }
}
