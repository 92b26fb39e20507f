//! Relay checkpoints.
//!
//! One small JSON file per identity records the highest confirmed sequence
//! so a restarted watcher resumes without resubmitting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

use crate::error::{BridgeError, Result};
use crate::fsutil::write_atomic;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub aid: String,
    pub last_relayed: i64,
    pub updated_at: DateTime<Utc>,
}

/// Directory of per-identity checkpoints. Disabled when no directory is set.
#[derive(Debug, Clone, Default)]
pub struct CheckpointStore {
    dir: Option<PathBuf>,
}

impl CheckpointStore {
    pub fn new(dir: Option<PathBuf>) -> Result<Self> {
        if let Some(dir) = &dir {
            fs::create_dir_all(dir).map_err(|e| {
                BridgeError::StorageError(format!("Failed to create checkpoint directory: {}", e))
            })?;
        }
        Ok(Self { dir })
    }

    pub fn disabled() -> Self {
        Self { dir: None }
    }

    fn path(&self, identity: &str) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("relay_{}.json", identity)))
    }

    /// Last checkpointed sequence, or -1 when none was recorded
    pub fn load(&self, identity: &str) -> Result<i64> {
        let Some(path) = self.path(identity) else {
            return Ok(-1);
        };

        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(-1),
            Err(e) => return Err(e.into()),
        };

        let checkpoint: Checkpoint = serde_json::from_str(&contents).map_err(|e| {
            BridgeError::SerializationError(format!(
                "Corrupt relay checkpoint {}: {}",
                path.display(),
                e
            ))
        })?;

        if checkpoint.aid != identity {
            return Err(BridgeError::SerializationError(format!(
                "Relay checkpoint {} belongs to {}",
                path.display(),
                checkpoint.aid
            )));
        }
        Ok(checkpoint.last_relayed)
    }

    pub fn save(&self, identity: &str, last_relayed: i64) -> Result<()> {
        let Some(path) = self.path(identity) else {
            return Ok(());
        };

        let checkpoint = Checkpoint {
            aid: identity.to_string(),
            last_relayed,
            updated_at: Utc::now(),
        };
        write_atomic(&path, serde_json::to_string_pretty(&checkpoint)?.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempdir().unwrap();
        let store = CheckpointStore::new(Some(temp_dir.path().to_path_buf())).unwrap();

        assert_eq!(store.load("E1").unwrap(), -1);
        store.save("E1", 7).unwrap();
        assert_eq!(store.load("E1").unwrap(), 7);
        assert_eq!(store.load("E2").unwrap(), -1);
    }

    #[test]
    fn test_disabled_store() {
        let store = CheckpointStore::disabled();
        store.save("E1", 3).unwrap();
        assert_eq!(store.load("E1").unwrap(), -1);
    }

    #[test]
    fn test_corrupt_checkpoint_reported() {
        let temp_dir = tempdir().unwrap();
        let store = CheckpointStore::new(Some(temp_dir.path().to_path_buf())).unwrap();
        fs::write(temp_dir.path().join("relay_E1.json"), "{not json").unwrap();

        assert!(matches!(
            store.load("E1"),
            Err(BridgeError::SerializationError(_))
        ));
    }
}
