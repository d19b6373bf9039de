use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Where an interrupted upgrade stopped.
///
/// Stored per database name. The serialized shape is
/// `{"version", "error", "callbackIndex"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    /// Database version the failing callback ran at.
    pub version: u32,
    /// Message of the error that stopped the upgrade.
    pub error: String,
    /// Index of the failed callback within that version.
    pub callback_index: usize,
}

impl Checkpoint {
    pub fn new(version: u32, error: impl Into<String>, callback_index: usize) -> Self {
        Self {
            version,
            error: error.into(),
            callback_index,
        }
    }
}

/// Whether checkpoints survive the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Durability {
    Durable,
    Volatile,
}

/// Errors returned by checkpoint backends.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint encoding: {0}")]
    Encoding(String),

    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("redb error: {0}")]
    Redb(String),

    #[error("checkpoint store lock poisoned")]
    LockPoisoned,
}

/// Keyed storage for upgrade checkpoints.
///
/// Implementations are shared between concurrent upgrade flows, so every
/// method takes `&self`.
pub trait CheckpointStore: Send + Sync {
    fn get(&self, database: &str) -> Result<Option<Checkpoint>, CheckpointError>;

    /// Insert or replace the checkpoint for `database`.
    fn set(&self, database: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Remove the checkpoint for `database`. Clearing a missing entry is a
    /// no-op.
    fn clear(&self, database: &str) -> Result<(), CheckpointError>;

    /// All stored checkpoints, sorted by database name.
    fn list(&self) -> Result<Vec<(String, Checkpoint)>, CheckpointError>;

    fn durability(&self) -> Durability;
}
