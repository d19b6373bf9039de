//! Pure-Rust checkpoint backend using [`redb`](https://docs.rs/redb).
//!
//! Each checkpoint is one postcard-encoded value keyed by database name.
//! Enable with `features = ["redb"]`.
//!
//! ```no_run
//! use vstore_checkpoint::{Checkpoint, CheckpointStore, RedbCheckpoints};
//!
//! let store = RedbCheckpoints::open("/tmp/vstore-checkpoints.redb").unwrap();
//! store.set("library", &Checkpoint::new(3, "bad callback", 1)).unwrap();
//! ```

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition};
use tracing::debug;

use crate::traits::{Checkpoint, CheckpointError, CheckpointStore, Durability};

const CHECKPOINTS: TableDefinition<&str, &[u8]> = TableDefinition::new("vstore_incomplete_upgrades");

fn err(e: impl std::fmt::Display) -> CheckpointError {
    CheckpointError::Redb(e.to_string())
}

fn decode(bytes: &[u8]) -> Result<Checkpoint, CheckpointError> {
    postcard::from_bytes(bytes).map_err(|e| CheckpointError::Encoding(e.to_string()))
}

/// Checkpoints stored in a redb database.
///
/// Every write runs in its own redb transaction.
pub struct RedbCheckpoints {
    db: Database,
    durability: Durability,
}

impl RedbCheckpoints {
    /// Open or create a redb database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let db = Database::create(path).map_err(err)?;
        Self::init(db, Durability::Durable)
    }

    /// In-memory database, for tests. Reports [`Durability::Volatile`].
    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(err)?;
        Self::init(db, Durability::Volatile)
    }

    fn init(db: Database, durability: Durability) -> Result<Self, CheckpointError> {
        // Make sure the table exists so read transactions can open it.
        let txn = db.begin_write().map_err(err)?;
        txn.open_table(CHECKPOINTS).map_err(err)?;
        txn.commit().map_err(err)?;
        Ok(Self { db, durability })
    }
}

impl CheckpointStore for RedbCheckpoints {
    fn get(&self, database: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(CHECKPOINTS).map_err(err)?;
        match table.get(database).map_err(err)? {
            Some(guard) => decode(guard.value()).map(Some),
            None => Ok(None),
        }
    }

    fn set(&self, database: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let bytes = postcard::to_allocvec(checkpoint)
            .map_err(|e| CheckpointError::Encoding(e.to_string()))?;
        let txn = self.db.begin_write().map_err(err)?;
        {
            let mut table = txn.open_table(CHECKPOINTS).map_err(err)?;
            table.insert(database, bytes.as_slice()).map_err(err)?;
        }
        txn.commit().map_err(err)?;
        debug!(database, version = checkpoint.version, "checkpoint stored in redb");
        Ok(())
    }

    fn clear(&self, database: &str) -> Result<(), CheckpointError> {
        let txn = self.db.begin_write().map_err(err)?;
        {
            let mut table = txn.open_table(CHECKPOINTS).map_err(err)?;
            table.remove(database).map_err(err)?;
        }
        txn.commit().map_err(err)?;
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, Checkpoint)>, CheckpointError> {
        let txn = self.db.begin_read().map_err(err)?;
        let table = txn.open_table(CHECKPOINTS).map_err(err)?;
        let mut out = Vec::new();
        for item in table.iter().map_err(err)? {
            let (key, value) = item.map_err(err)?;
            out.push((key.value().to_string(), decode(value.value())?));
        }
        Ok(out)
    }

    fn durability(&self) -> Durability {
        self.durability
    }
}
