//! Event Log Store
//!
//! Manages the append-only JSONL event logs of many identities inside one
//! store directory. Each identity is isolated in its own file; appends on
//! one identity are serialized and fsynced before they are acknowledged.

use serde_json::Value;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

use crate::error::{BridgeError, Result};
use crate::event_log::event::{Event, EventType};
use crate::event_log::replay::Replay;

const LOG_EXTENSION: &str = "jsonl";
const ALIASES_FILE: &str = "aliases.json";

/// Committed tip of one identity's log, as seen by this writer
struct LogHead {
    tip: Event,
    committed_len: u64,
}

/// Head of one identity, loaded from disk at most once
type HeadSlot = Arc<OnceCell<Arc<Mutex<LogHead>>>>;

/// Append-only event log store shared by many identities
#[derive(Clone)]
pub struct EventLog {
    root: PathBuf,
    heads: Arc<Mutex<HashMap<String, HeadSlot>>>,
    aliases: Arc<Mutex<HashMap<String, String>>>,
}

impl EventLog {
    /// Open (or create) a log store rooted at `root`
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| BridgeError::StorageError(format!("Failed to create log directory: {}", e)))?;

        let aliases = load_aliases(&root.join(ALIASES_FILE))?;
        info!(
            "Opened event log store at {} ({} known aliases)",
            root.display(),
            aliases.len()
        );

        Ok(Self {
            root,
            heads: Arc::new(Mutex::new(HashMap::new())),
            aliases: Arc::new(Mutex::new(aliases)),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the log file holding `identity`'s events
    pub fn log_path(&self, identity: &str) -> PathBuf {
        self.root.join(format!("{}.{}", identity, LOG_EXTENSION))
    }

    /// Create a new identity and commit its inception event
    pub async fn incept(&self, alias: &str, payload: Value) -> Result<Event> {
        let mut aliases = self.aliases.lock().await;
        if aliases.contains_key(alias) {
            return Err(BridgeError::InvalidEvent(format!(
                "Alias already incepted: {}",
                alias
            )));
        }

        let event = Event::inception(payload);
        let path = self.log_path(&event.identity);
        let mut file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(&path)
            .map_err(|e| BridgeError::StorageError(format!("Failed to create event log: {}", e)))?;
        let committed_len = write_event(&mut file, &event)?;

        aliases.insert(alias.to_string(), event.identity.clone());
        store_aliases(&self.root.join(ALIASES_FILE), &aliases)?;

        let head = Arc::new(Mutex::new(LogHead {
            tip: event.clone(),
            committed_len,
        }));
        self.heads
            .lock()
            .await
            .insert(event.identity.clone(), Arc::new(OnceCell::new_with(Some(head))));

        info!("Incepted identity {} as {}", event.identity, alias);
        Ok(event)
    }

    /// Resolve a human alias to its identity
    pub async fn identity_for_alias(&self, alias: &str) -> Option<String> {
        self.aliases.lock().await.get(alias).cloned()
    }

    /// All aliases registered in this store
    pub async fn aliases(&self) -> HashMap<String, String> {
        self.aliases.lock().await.clone()
    }

    /// All identities that have a log in this store
    pub fn identities(&self) -> Result<Vec<String>> {
        let pattern = self.root.join(format!("*.{}", LOG_EXTENSION));
        let pattern = pattern.to_string_lossy();
        let mut identities: Vec<String> = glob::glob(&pattern)
            .map_err(|e| BridgeError::StorageError(format!("Invalid log pattern: {}", e)))?
            .filter_map(|entry| entry.ok())
            .filter_map(|path| path.file_stem().map(|s| s.to_string_lossy().to_string()))
            .collect();
        identities.sort();
        Ok(identities)
    }

    /// Append the next event for `identity`
    pub async fn append(
        &self,
        identity: &str,
        event_type: EventType,
        payload: Value,
    ) -> Result<Event> {
        if event_type == EventType::Inception {
            return Err(BridgeError::InvalidEvent(format!(
                "Identity {} is already incepted",
                identity
            )));
        }

        let head = self.head(identity).await?;
        let mut head = head.lock().await;

        let path = self.log_path(identity);
        let on_disk = fs::metadata(&path)
            .map_err(|e| BridgeError::StorageError(format!("Failed to stat event log: {}", e)))?
            .len();
        if on_disk != head.committed_len {
            return Err(BridgeError::ConcurrentWriter(identity.to_string()));
        }

        let event = Event::interaction(&head.tip, payload);
        let mut file = OpenOptions::new()
            .append(true)
            .open(&path)
            .map_err(|e| BridgeError::StorageError(format!("Failed to open event log: {}", e)))?;
        let written = commit_event(&mut file, &path, head.committed_len, &event)?;

        head.committed_len += written;
        head.tip = event.clone();

        debug!("Appended event: {}", event.summary());
        Ok(event)
    }

    /// Get the committed tip of `identity`'s log
    pub async fn latest(&self, identity: &str) -> Result<Event> {
        let head = self.head(identity).await?;
        let tip = head.lock().await.tip.clone();
        Ok(tip)
    }

    /// Replay `identity`'s committed events in sequence order
    pub fn replay(&self, identity: &str) -> Result<Replay> {
        let path = self.log_path(identity);
        if !path.exists() {
            return Err(BridgeError::identity_not_found(identity));
        }
        Replay::open(path)
    }

    /// Head of `identity`, loading it on first use. Only the slot lookup
    /// holds the map lock; loading is serialized per identity.
    async fn head(&self, identity: &str) -> Result<Arc<Mutex<LogHead>>> {
        let slot = {
            let mut heads = self.heads.lock().await;
            match heads.get(identity) {
                Some(slot) => slot.clone(),
                None => {
                    if !self.log_path(identity).exists() {
                        return Err(BridgeError::identity_not_found(identity));
                    }
                    heads.entry(identity.to_string()).or_default().clone()
                }
            }
        };

        let head = slot
            .get_or_try_init(|| async {
                self.load_head(identity)
                    .map(|head| Arc::new(Mutex::new(head)))
            })
            .await?;
        Ok(head.clone())
    }

    fn load_head(&self, identity: &str) -> Result<LogHead> {
        let path = self.log_path(identity);
        let committed_len = truncate_torn_tail(&path)?;

        let mut tip = None;
        for event in self.replay(identity)? {
            tip = Some(event?);
        }
        let tip = tip.ok_or_else(|| BridgeError::identity_not_found(identity))?;

        debug!("Loaded head of {} at sequence {}", identity, tip.sequence);
        Ok(LogHead { tip, committed_len })
    }
}

/// Destination of log lines that can be made durable
trait LogSink: Write {
    fn sync(&mut self) -> io::Result<()>;
}

impl LogSink for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Write one event as a complete line and make it durable
fn write_event(sink: &mut impl LogSink, event: &Event) -> Result<u64> {
    let mut line = serde_json::to_vec(event)?;
    line.push(b'\n');

    sink.write_all(&line)
        .map_err(|e| BridgeError::StorageError(format!("Failed to write event: {}", e)))?;
    sink.sync()
        .map_err(|e| BridgeError::StorageError(format!("Failed to sync event log: {}", e)))?;

    Ok(line.len() as u64)
}

/// Write `event` after the `committed_len` bytes of `path`. A failed write
/// is cut back off the file so the next append starts on a line boundary.
fn commit_event(
    sink: &mut impl LogSink,
    path: &Path,
    committed_len: u64,
    event: &Event,
) -> Result<u64> {
    write_event(sink, event).map_err(|e| {
        if let Err(rollback) = truncate_to(path, committed_len) {
            warn!(
                "Failed to roll back interrupted append in {}: {}",
                path.display(),
                rollback
            );
        }
        e
    })
}

fn truncate_to(path: &Path, len: u64) -> Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path)
        .and_then(|file| {
            file.set_len(len)?;
            file.sync_data()
        })
        .map_err(|e| BridgeError::StorageError(format!("Failed to truncate event log: {}", e)))
}

/// Drop a trailing partial line left by an interrupted append. The
/// append was never acknowledged, so nothing refers to it.
fn truncate_torn_tail(path: &Path) -> Result<u64> {
    let contents = fs::read(path)
        .map_err(|e| BridgeError::StorageError(format!("Failed to read event log: {}", e)))?;
    let committed = contents
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos as u64 + 1)
        .unwrap_or(0);

    if committed < contents.len() as u64 {
        warn!(
            "Discarding {} bytes of interrupted append in {}",
            contents.len() as u64 - committed,
            path.display()
        );
        truncate_to(path, committed)?;
    }
    Ok(committed)
}

fn load_aliases(path: &Path) -> Result<HashMap<String, String>> {
    if !path.exists() {
        return Ok(HashMap::new());
    }
    let content = fs::read_to_string(path)
        .map_err(|e| BridgeError::StorageError(format!("Failed to read aliases: {}", e)))?;
    Ok(serde_json::from_str(&content)?)
}

fn store_aliases(path: &Path, aliases: &HashMap<String, String>) -> Result<()> {
    let json = serde_json::to_string_pretty(aliases)?;
    crate::fsutil::write_atomic(path, json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_incept_and_append() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();

        let icp = log.incept("drone_sensor_1", json!({})).await.unwrap();
        let ixn = log
            .append(&icp.identity, EventType::Interaction, json!({"cycle": 1}))
            .await
            .unwrap();

        assert_eq!(ixn.sequence, 1);
        assert_eq!(ixn.prior_digest.as_deref(), Some(icp.digest.as_str()));
        assert_eq!(log.latest(&icp.identity).await.unwrap(), ixn);
        assert_eq!(
            log.identity_for_alias("drone_sensor_1").await,
            Some(icp.identity.clone())
        );
    }

    #[tokio::test]
    async fn test_hash_chain_over_many_appends() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let icp = log.incept("sensor", json!({})).await.unwrap();

        for i in 0..5 {
            log.append(&icp.identity, EventType::Interaction, json!({ "index": i }))
                .await
                .unwrap();
        }

        let events: Vec<Event> = log
            .replay(&icp.identity)
            .unwrap()
            .map(|e| e.unwrap())
            .collect();
        assert_eq!(events.len(), 6);
        for i in 1..events.len() {
            assert_eq!(events[i].sequence, i as u64);
            assert!(events[i].links_to(&events[i - 1]));
        }
    }

    #[tokio::test]
    async fn test_unknown_identity() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();

        let err = log
            .append("Enope", EventType::Interaction, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::IdentityNotFound(_)));
        assert!(matches!(
            log.latest("Enope").await.unwrap_err(),
            BridgeError::IdentityNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_duplicate_alias_rejected() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        log.incept("sensor", json!({})).await.unwrap();
        assert!(log.incept("sensor", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn test_inception_append_rejected() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let icp = log.incept("sensor", json!({})).await.unwrap();
        let err = log
            .append(&icp.identity, EventType::Inception, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::InvalidEvent(_)));
    }

    #[tokio::test]
    async fn test_concurrent_appends_get_distinct_sequences() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let icp = log.incept("sensor", json!({})).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let log = log.clone();
            let identity = icp.identity.clone();
            handles.push(tokio::spawn(async move {
                log.append(&identity, EventType::Interaction, json!({ "i": i }))
                    .await
                    .unwrap()
                    .sequence
            }));
        }

        let mut seqs = Vec::new();
        for handle in handles {
            seqs.push(handle.await.unwrap());
        }
        seqs.sort();
        assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_second_writer_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let writer_a = EventLog::open(temp_dir.path()).unwrap();
        let icp = writer_a.incept("sensor", json!({})).await.unwrap();

        let writer_b = EventLog::open(temp_dir.path()).unwrap();
        writer_b
            .append(&icp.identity, EventType::Interaction, json!({}))
            .await
            .unwrap();

        let err = writer_a
            .append(&icp.identity, EventType::Interaction, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::ConcurrentWriter(_)));
    }

    #[tokio::test]
    async fn test_torn_tail_truncated_before_append() {
        let temp_dir = tempdir().unwrap();
        let identity = {
            let log = EventLog::open(temp_dir.path()).unwrap();
            log.incept("sensor", json!({})).await.unwrap().identity
        };

        let path = temp_dir.path().join(format!("{}.jsonl", identity));
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"identity\":\"trunc").unwrap();
        drop(file);

        let log = EventLog::open(temp_dir.path()).unwrap();
        let next = log
            .append(&identity, EventType::Interaction, json!({}))
            .await
            .unwrap();
        assert_eq!(next.sequence, 1);

        let events: Vec<Event> = log.replay(&identity).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(events.len(), 2);
        assert!(events[1].links_to(&events[0]));
    }

    /// Sink that accepts `budget` bytes and then fails
    struct ShortWrite {
        file: File,
        budget: usize,
    }

    impl Write for ShortWrite {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            let n = self.file.write(&buf[..buf.len().min(self.budget)])?;
            self.budget -= n;
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            self.file.flush()
        }
    }

    impl LogSink for ShortWrite {
        fn sync(&mut self) -> io::Result<()> {
            self.file.sync_data()
        }
    }

    #[tokio::test]
    async fn test_failed_write_rolled_back() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let icp = log.incept("sensor", json!({})).await.unwrap();
        let path = log.log_path(&icp.identity);
        let committed_len = fs::metadata(&path).unwrap().len();

        let mut sink = ShortWrite {
            file: OpenOptions::new().append(true).open(&path).unwrap(),
            budget: 10,
        };
        let event = Event::interaction(&icp, json!({"cycle": 1}));
        let err = commit_event(&mut sink, &path, committed_len, &event).unwrap_err();
        assert!(matches!(err, BridgeError::StorageError(_)));
        assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);

        // The same writer keeps appending instead of seeing a second writer
        let next = log
            .append(&icp.identity, EventType::Interaction, json!({}))
            .await
            .unwrap();
        assert_eq!(next.sequence, 1);
    }

    #[tokio::test]
    async fn test_cold_heads_load_concurrently() {
        let temp_dir = tempdir().unwrap();
        let identities = {
            let log = EventLog::open(temp_dir.path()).unwrap();
            let mut identities = Vec::new();
            for alias in ["sensor_a", "sensor_b"] {
                identities.push(log.incept(alias, json!({ "sensor": alias })).await.unwrap().identity);
            }
            identities
        };

        let log = EventLog::open(temp_dir.path()).unwrap();
        let mut handles = Vec::new();
        for identity in identities.iter().chain(identities.iter()) {
            let log = log.clone();
            let identity = identity.clone();
            handles.push(tokio::spawn(async move {
                log.append(&identity, EventType::Interaction, json!({}))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        for identity in &identities {
            assert_eq!(log.latest(identity).await.unwrap().sequence, 2);
        }
    }

    #[tokio::test]
    async fn test_reopen_resumes_tip() {
        let temp_dir = tempdir().unwrap();
        let identity = {
            let log = EventLog::open(temp_dir.path()).unwrap();
            let icp = log.incept("sensor", json!({})).await.unwrap();
            log.append(&icp.identity, EventType::Interaction, json!({}))
                .await
                .unwrap();
            icp.identity
        };

        let log = EventLog::open(temp_dir.path()).unwrap();
        assert_eq!(log.identity_for_alias("sensor").await, Some(identity.clone()));
        assert_eq!(log.identities().unwrap(), vec![identity.clone()]);
        let next = log
            .append(&identity, EventType::Interaction, json!({}))
            .await
            .unwrap();
        assert_eq!(next.sequence, 2);
    }
}
