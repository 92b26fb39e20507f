#![allow(dead_code)]

use anchor_bridge::anchor::{AnchorPublisher, FileAnchorStore};
use anchor_bridge::config::RetryConfig;
use anchor_bridge::event_log::EventLog;
use anchor_bridge::sensor::SensorNode;
use anchor_bridge::watcher::{CheckpointStore, StatusBoard, WatcherSettings};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Log store, anchor store and checkpoints under one temp directory
pub struct TestFleet {
    pub dir: TempDir,
    pub log: EventLog,
    pub store: Arc<FileAnchorStore>,
    pub publisher: AnchorPublisher,
}

impl TestFleet {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let log = EventLog::open(dir.path().join("logs")).expect("Failed to open log store");
        let store = Arc::new(
            FileAnchorStore::new(dir.path().join("anchors")).expect("Failed to open anchor store"),
        );
        let publisher = AnchorPublisher::new(log.clone(), store.clone());
        Self {
            dir,
            log,
            store,
            publisher,
        }
    }

    pub fn checkpoints(&self) -> CheckpointStore {
        CheckpointStore::new(Some(self.dir.path().join("relay"))).expect("Failed to open checkpoints")
    }

    pub async fn sensor(&self, id: u32) -> SensorNode {
        SensorNode::provision(self.publisher.clone(), &SensorNode::alias_for(id))
            .await
            .expect("Failed to provision sensor")
    }
}

/// Fast settings for relay tests
pub fn fast_settings(checkpoints: CheckpointStore) -> WatcherSettings {
    WatcherSettings {
        poll_interval: Duration::from_millis(10),
        submit_timeout: Duration::from_millis(500),
        retry: RetryConfig {
            initial_backoff_ms: 5,
            max_backoff_ms: 40,
            alert_after_failures: 3,
        },
        checkpoints,
    }
}

/// Wait until `identity` has relayed at least `sequence`
pub async fn wait_for_relay(board: &StatusBoard, identity: &str, sequence: i64) {
    for _ in 0..300 {
        if board
            .get(identity)
            .map(|status| status.last_relayed >= sequence)
            .unwrap_or(false)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("{} did not relay sequence {} in time", identity, sequence);
}
