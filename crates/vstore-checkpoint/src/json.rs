//! Checkpoints in a single JSON file.
//!
//! The file holds one object keyed by database name:
//!
//! ```json
//! {"library": {"version": 3, "error": "bad callback", "callbackIndex": 1}}
//! ```
//!
//! Every write replaces the whole file through a temporary sibling and a
//! rename, so readers never see a half-written document.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use tracing::debug;

use crate::traits::{Checkpoint, CheckpointError, CheckpointStore, Durability};

type Entries = BTreeMap<String, Checkpoint>;

/// Checkpoints persisted to a JSON file.
#[derive(Debug)]
pub struct JsonFileCheckpoints {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    guard: Mutex<()>,
}

impl JsonFileCheckpoints {
    /// Use the file at `path`, creating its parent directory if needed. The
    /// file itself is created on the first write.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CheckpointError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            guard: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>, CheckpointError> {
        self.guard.lock().map_err(|_| CheckpointError::LockPoisoned)
    }

    fn read(&self) -> Result<Entries, CheckpointError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Entries::new()),
            Err(e) => return Err(e.into()),
        };
        if text.trim().is_empty() {
            return Ok(Entries::new());
        }
        serde_json::from_str(&text).map_err(|e| CheckpointError::Encoding(e.to_string()))
    }

    fn write(&self, entries: &Entries) -> Result<(), CheckpointError> {
        let text = serde_json::to_string_pretty(entries)
            .map_err(|e| CheckpointError::Encoding(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, text)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = entries.len(), "checkpoint file written");
        Ok(())
    }
}

impl CheckpointStore for JsonFileCheckpoints {
    fn get(&self, database: &str) -> Result<Option<Checkpoint>, CheckpointError> {
        let _guard = self.lock()?;
        Ok(self.read()?.remove(database))
    }

    fn set(&self, database: &str, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let _guard = self.lock()?;
        let mut entries = self.read()?;
        entries.insert(database.to_string(), checkpoint.clone());
        self.write(&entries)
    }

    fn clear(&self, database: &str) -> Result<(), CheckpointError> {
        let _guard = self.lock()?;
        let mut entries = self.read()?;
        if entries.remove(database).is_none() {
            return Ok(());
        }
        self.write(&entries)
    }

    fn list(&self) -> Result<Vec<(String, Checkpoint)>, CheckpointError> {
        let _guard = self.lock()?;
        Ok(self.read()?.into_iter().collect())
    }

    fn durability(&self) -> Durability {
        Durability::Durable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_uses_camel_case_record_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        let store = JsonFileCheckpoints::open(&path).unwrap();
        store.set("library", &Checkpoint::new(3, "bad callback", 1)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(
            raw,
            serde_json::json!({
                "library": {"version": 3, "error": "bad callback", "callbackIndex": 1}
            })
        );
    }

    #[test]
    fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("checkpoints.json");
        JsonFileCheckpoints::open(&path)
            .unwrap()
            .set("db", &Checkpoint::new(2, "oops", 0))
            .unwrap();

        let reopened = JsonFileCheckpoints::open(&path).unwrap();
        assert_eq!(reopened.get("db").unwrap(), Some(Checkpoint::new(2, "oops", 0)));
        assert_eq!(reopened.durability(), Durability::Durable);
    }

    #[test]
    fn corrupt_file_is_an_encoding_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoints.json");
        fs::write(&path, "{not json").unwrap();
        let store = JsonFileCheckpoints::open(&path).unwrap();
        assert!(matches!(store.get("db"), Err(CheckpointError::Encoding(_))));
    }
}
