//! Anchor Record Stores
//!
//! Keyed stores mapping an identity to its newest anchor record. Records
//! are written and read whole; a reader never observes a half-written one.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::sync::RwLock;
use tracing::debug;

use crate::anchor::record::AnchorRecord;
use crate::error::{BridgeError, Result};

const RECORD_PREFIX: &str = "anchor_";

/// Shared store between one publisher and many readers per identity
#[async_trait]
pub trait AnchorStore: Send + Sync {
    /// Replace the record for `record.identity`
    async fn write(&self, record: &AnchorRecord) -> Result<()>;

    /// Read the current record. Missing or unreadable records are
    /// reported as [`BridgeError::TransientRead`].
    async fn read(&self, identity: &str) -> Result<AnchorRecord>;

    /// Identities that currently have a record
    async fn identities(&self) -> Result<Vec<String>>;
}

/// Anchor store keeping one JSON file per identity in a directory
pub struct FileAnchorStore {
    dir: PathBuf,
}

impl FileAnchorStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| BridgeError::StorageError(format!("Failed to create anchor directory: {}", e)))?;
        Ok(Self { dir })
    }

    pub fn record_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}{}.json", RECORD_PREFIX, identity))
    }
}

#[async_trait]
impl AnchorStore for FileAnchorStore {
    async fn write(&self, record: &AnchorRecord) -> Result<()> {
        let json = serde_json::to_string_pretty(record)?;
        crate::fsutil::write_atomic(&self.record_path(&record.identity), json.as_bytes())?;
        debug!(
            "Wrote anchor record for {} at sequence {}",
            record.identity, record.sequence
        );
        Ok(())
    }

    async fn read(&self, identity: &str) -> Result<AnchorRecord> {
        let path = self.record_path(identity);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(BridgeError::transient(format!(
                    "No anchor record yet: {}",
                    path.display()
                )));
            }
            Err(e) => {
                return Err(BridgeError::transient(format!(
                    "Failed to read anchor record {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let record: AnchorRecord = serde_json::from_str(&content).map_err(|e| {
            BridgeError::transient(format!("Malformed anchor record {}: {}", path.display(), e))
        })?;

        if record.identity != identity {
            return Err(BridgeError::transient(format!(
                "Anchor record {} names identity {}",
                path.display(),
                record.identity
            )));
        }
        Ok(record)
    }

    async fn identities(&self) -> Result<Vec<String>> {
        let pattern = self.dir.join(format!("{}*.json", RECORD_PREFIX));
        let pattern = pattern.to_string_lossy();
        let mut identities: Vec<String> = glob::glob(&pattern)
            .map_err(|e| BridgeError::StorageError(format!("Invalid anchor pattern: {}", e)))?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| {
                let stem = path.file_stem()?.to_string_lossy().to_string();
                stem.strip_prefix(RECORD_PREFIX).map(str::to_string)
            })
            .collect();
        identities.sort();
        Ok(identities)
    }
}

/// In-process anchor store
#[derive(Default)]
pub struct MemoryAnchorStore {
    records: RwLock<HashMap<String, AnchorRecord>>,
}

impl MemoryAnchorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AnchorStore for MemoryAnchorStore {
    async fn write(&self, record: &AnchorRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn read(&self, identity: &str) -> Result<AnchorRecord> {
        self.records
            .read()
            .await
            .get(identity)
            .cloned()
            .ok_or_else(|| BridgeError::transient(format!("No anchor record for {}", identity)))
    }

    async fn identities(&self) -> Result<Vec<String>> {
        let mut identities: Vec<String> = self.records.read().await.keys().cloned().collect();
        identities.sort();
        Ok(identities)
    }
}
