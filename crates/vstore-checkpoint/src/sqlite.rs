//! SQLite checkpoint backend using rusqlite.
//!
//! Uses WAL mode by default. Checkpoints live in one table,
//! `vstore_incomplete_upgrades`, keyed by database name, so the file can be
//! shared with other application data.
//!
//! # Example
//!
//! ```no_run
//! use vstore_checkpoint::{Checkpoint, CheckpointStore, SqliteCheckpoints};
//!
//! let store = SqliteCheckpoints::open("app.db").unwrap();
//! store.set("library", &Checkpoint::new(3, "bad callback", 1)).unwrap();
//! ```

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::traits::{Checkpoint, CheckpointError, CheckpointStore, Durability};

/// SQLite configuration options.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// SQLite journal mode. Defaults to WAL.
    pub journal_mode: JournalMode,
    /// Busy timeout in milliseconds. Defaults to 5000.
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            journal_mode: JournalMode::Wal,
            busy_timeout_ms: 5000,
        }
    }
}

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JournalMode {
    /// Write-ahead logging.
    Wal,
    /// Traditional rollback journal.
    Delete,
    /// In-memory journal (no crash recovery).
    Memory,
}

impl JournalMode {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Wal => "WAL",
            Self::Delete => "DELETE",
            Self::Memory => "MEMORY",
        }
    }
}

/// Checkpoints stored in a SQLite table.
pub struct SqliteCheckpoints {
    conn: Mutex<Connection>,
    durability: Durability,
}

impl SqliteCheckpoints {
    /// Open (or create) a SQLite database at the given path with default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        Self::open_with_config(path, SqliteConfig::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(
        path: P,
        config: SqliteConfig,
    ) -> Result<Self, CheckpointError> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn, &config)?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            durability: Durability::Durable,
        })
    }

    /// In-memory database, for tests. Reports [`Durability::Volatile`].
    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        let conn = Connection::open_in_memory()?;
        Self::create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            durability: Durability::Volatile,
        })
    }

    fn init_connection(conn: &Connection, config: &SqliteConfig) -> Result<(), CheckpointError> {
        // journal_mode returns a row, so it cannot go through execute_batch.
        let _: String = conn.query_row(
            &format!("PRAGMA journal_mode = {}", config.journal_mode.as_str()),
            [],
            |row| row.get(0),
        )?;
        conn.busy_timeout(std::time::Duration::from_millis(u64::from(
            config.busy_timeout_ms,
        )))?;
        conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
        Ok(())
    }

    fn create_schema(conn: &Connection) -> Result<(), CheckpointError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS vstore_incomplete_upgrades (
                database        TEXT PRIMARY KEY NOT NULL,
                version         INTEGER NOT NULL,
                error           TEXT NOT NULL,
                callback_index  INTEGER NOT NULL,
                recorded_at     INTEGER NOT NULL DEFAULT (strftime('%s','now'))
            );",
        )?;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CheckpointError> {
        self.conn.lock().map_err(|_| CheckpointError::LockPoisoned)
    }
}

// Out-of-range integers fail the read instead of wrapping.
fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    Ok(Checkpoint {
        version: row.get::<_, u32>("version")?,
        error: row.get("error")?,
        callback_index: row.get::<_, usize>("callback_index")?,
    })
}

impl CheckpointStore for SqliteCheckpoints {
    fn get(&self, database: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let conn = self.lock()?;
        let checkpoint = conn
            .query_row(
                "SELECT version, error, callback_index
                 FROM vstore_incomplete_upgrades WHERE database = ?1",
                params![database],
                row_to_checkpoint,
            )
            .optional()?;
        Ok(checkpoint)
    }

    fn set(&self, database: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let callback_index = i64::try_from(checkpoint.callback_index).map_err(|_| {
            CheckpointError::Encoding(format!(
                "callback index {} does not fit a sqlite integer",
                checkpoint.callback_index
            ))
        })?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO vstore_incomplete_upgrades (database, version, error, callback_index)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(database) DO UPDATE SET
                version = excluded.version,
                error = excluded.error,
                callback_index = excluded.callback_index,
                recorded_at = strftime('%s','now')",
            params![
                database,
                i64::from(checkpoint.version),
                checkpoint.error,
                callback_index
            ],
        )?;
        debug!(database, version = checkpoint.version, "checkpoint stored in sqlite");
        Ok(())
    }

    fn clear(&self, database: &str) -> Result<(), CheckpointError> {
        let conn = self.lock()?;
        conn.execute(
            "DELETE FROM vstore_incomplete_upgrades WHERE database = ?1",
            params![database],
        )?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, Checkpoint)>, CheckpointError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT database, version, error, callback_index
             FROM vstore_incomplete_upgrades ORDER BY database",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get("database")?, row_to_checkpoint(row)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn durability(&self) -> Durability {
        self.durability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_replaces_existing_entry() {
        let store = SqliteCheckpoints::open_in_memory().unwrap();
        store.set("db", &Checkpoint::new(2, "first", 0)).unwrap();
        store.set("db", &Checkpoint::new(3, "second", 4)).unwrap();
        assert_eq!(store.get("db").unwrap(), Some(Checkpoint::new(3, "second", 4)));
        assert_eq!(store.list().unwrap().len(), 1);
    }

    #[test]
    fn file_backed_store_is_durable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.db");
        {
            let store = SqliteCheckpoints::open(&path).unwrap();
            assert_eq!(store.durability(), Durability::Durable);
            store.set("library", &Checkpoint::new(5, "bad", 2)).unwrap();
        }
        let store = SqliteCheckpoints::open_with_config(
            &path,
            SqliteConfig {
                journal_mode: JournalMode::Delete,
                ..SqliteConfig::default()
            },
        )
        .unwrap();
        assert_eq!(store.get("library").unwrap(), Some(Checkpoint::new(5, "bad", 2)));
    }

    #[test]
    fn corrupt_rows_are_rejected() {
        let store = SqliteCheckpoints::open_in_memory().unwrap();
        store
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO vstore_incomplete_upgrades (database, version, error, callback_index)
                 VALUES ('wrapped', 4294967297, 'bad', 0), ('negative', 2, 'bad', -1)",
                [],
            )
            .unwrap();
        assert!(matches!(store.get("wrapped"), Err(CheckpointError::Sqlite(_))));
        assert!(matches!(store.get("negative"), Err(CheckpointError::Sqlite(_))));
        assert!(store.list().is_err());
    }

    #[test]
    fn in_memory_store_is_volatile() {
        let store = SqliteCheckpoints::open_in_memory().unwrap();
        assert_eq!(store.durability(), Durability::Volatile);
    }
}
