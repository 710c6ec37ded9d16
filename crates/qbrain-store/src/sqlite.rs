use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::Result;
use crate::schema;
use crate::store::KeyValueStore;

/// Store backed by one SQLite file, shareable between processes.
///
/// Plays the part of an external key-value server: every unit process opens
/// the same file and coordinates through the `shared_state` table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        tracing::info!("opened shared store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    /// Flush the WAL into the main database file and truncate it.
    pub fn checkpoint_truncate(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock();
        let value = conn
            .query_row(
                "SELECT value FROM shared_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set_many(&self, pairs: &[(&str, &str)]) -> Result<()> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO shared_state (key, value, updated_at)
                 VALUES (?1, ?2, datetime('now'))",
            )?;
            for (key, value) in pairs {
                stmt.execute(params![key, value])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .lock()
            .execute("DELETE FROM shared_state WHERE key = ?1", [key])?;
        Ok(rows > 0)
    }

    fn scan(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare("SELECT key FROM shared_state ORDER BY key")?;
        let keys = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT key FROM shared_state WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
        let keys = stmt
            .query_map(params![prefix, prefix.chars().count() as i64], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        if let Err(e) = self.checkpoint_truncate() {
            tracing::warn!("WAL checkpoint on close failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_set_roundtrip() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.get("a output").unwrap().is_none());
        store.set("a output", "0.42").unwrap();
        assert_eq!(store.get("a output").unwrap().as_deref(), Some("0.42"));
    }

    #[test]
    fn test_set_overwrites() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("a output", "0.1").unwrap();
        store.set("a output", "0.2").unwrap();
        assert_eq!(store.get("a output").unwrap().as_deref(), Some("0.2"));
        assert_eq!(store.scan().unwrap().len(), 1);
    }

    #[test]
    fn test_set_many_and_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .set_many(&[
                ("b output", "1"),
                ("b state", "0"),
                ("b query", "[0.0]"),
                ("a class", "SensorialUnit"),
            ])
            .unwrap();
        assert_eq!(
            store.scan().unwrap(),
            ["a class", "b output", "b query", "b state"]
        );
        assert_eq!(store.scan_prefix("b ").unwrap().len(), 3);
        assert!(store.scan_prefix("zz").unwrap().is_empty());
    }

    #[test]
    fn test_delete() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set("x", "1").unwrap();
        assert!(store.delete("x").unwrap());
        assert!(!store.delete("x").unwrap());
        assert!(store.get("x").unwrap().is_none());
    }

    #[test]
    fn test_metadata_not_in_scan() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(
            store.get_metadata("schema_version").unwrap().as_deref(),
            Some("1")
        );
        assert!(store.scan().unwrap().is_empty());
    }

    #[test]
    fn test_status_and_flush() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.set_many(&[("k1", "v1"), ("k2", "v2")]).unwrap();
        let status = store.status().unwrap();
        assert_eq!(status.get("k2").map(String::as_str), Some("v2"));
        assert_eq!(store.flush().unwrap(), 2);
        assert!(store.status().unwrap().is_empty());
    }
}
