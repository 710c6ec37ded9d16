use rusqlite::{Connection, OptionalExtension};

use crate::error::{Result, StoreError};

pub const SCHEMA_VERSION: i64 = 1;

pub fn initialize(conn: &Connection) -> Result<()> {
    // Several unit processes may poll the same file; wait instead of failing on a held lock.
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    conn.pragma_update(None, "wal_autocheckpoint", 100)?;

    // In-memory databases and fresh files legitimately fail this.
    if conn
        .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")
        .is_ok()
    {
        tracing::debug!("startup WAL checkpoint complete");
    }

    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS metadata (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS shared_state (
            key        TEXT PRIMARY KEY,
            value      TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM metadata WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(existing) = existing {
        let version: i64 = existing.parse().map_err(|_| {
            StoreError::InvalidData(format!("unreadable schema_version '{existing}'"))
        })?;
        if version > SCHEMA_VERSION {
            return Err(StoreError::InvalidData(format!(
                "store schema version {version} is newer than supported {SCHEMA_VERSION}"
            )));
        }
    }

    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}
