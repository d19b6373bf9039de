use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use crate::traits::{Checkpoint, CheckpointError, CheckpointStore, Durability};

/// In-process checkpoints. Lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryCheckpoints {
    entries: Mutex<BTreeMap<String, Checkpoint>>,
}

impl MemoryCheckpoints {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, Checkpoint>>, CheckpointError> {
        self.entries.lock().map_err(|_| CheckpointError::LockPoisoned)
    }
}

impl CheckpointStore for MemoryCheckpoints {
    fn get(&self, database: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.lock()?.get(database).cloned())
    }

    fn set(&self, database: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.lock()?
            .insert(database.to_string(), checkpoint.clone());
        Ok(())
    }

    fn clear(&self, database: &str) -> Result<(), CheckpointError> {
        self.lock()?.remove(database);
        Ok(())
    }

    fn list(&self) -> Result<Vec<(String, Checkpoint)>, CheckpointError> {
        Ok(self
            .lock()?
            .iter()
            .map(|(name, cp)| (name.clone(), cp.clone()))
            .collect())
    }

    fn durability(&self) -> Durability {
        Durability::Volatile
    }
}
