//! Anchor Publisher
//!
//! Commits events to the log and then exports the new tip as the
//! identity's anchor record. The record is only written once the event is
//! durable, so it never points ahead of the log, and it never moves back to
//! an older event.

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::anchor::record::AnchorRecord;
use crate::anchor::store::AnchorStore;
use crate::error::Result;
use crate::event_log::{Event, EventLog, EventType};

/// Appends events and exports one anchor record per append
#[derive(Clone)]
pub struct AnchorPublisher {
    log: EventLog,
    store: Arc<dyn AnchorStore>,
    /// Orders record writes of concurrent appends
    publishing: Arc<Mutex<()>>,
}

impl AnchorPublisher {
    pub fn new(log: EventLog, store: Arc<dyn AnchorStore>) -> Self {
        Self {
            log,
            store,
            publishing: Arc::new(Mutex::new(())),
        }
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    /// Incept a new identity and publish its sequence-0 anchor
    pub async fn incept(&self, alias: &str, payload: Value) -> Result<Event> {
        let event = self.log.incept(alias, payload).await?;
        self.publish(&event).await?;
        Ok(event)
    }

    /// Append an event and publish it as the identity's anchor
    pub async fn append(
        &self,
        identity: &str,
        event_type: EventType,
        payload: Value,
    ) -> Result<Event> {
        let event = self.log.append(identity, event_type, payload).await?;
        self.publish(&event).await?;
        Ok(event)
    }

    /// Re-export the committed tip, e.g. after a restart
    pub async fn publish_latest(&self, identity: &str) -> Result<AnchorRecord> {
        let tip = self.log.latest(identity).await?;
        self.publish(&tip).await
    }

    async fn publish(&self, event: &Event) -> Result<AnchorRecord> {
        let record = AnchorRecord::from(event);
        let _publishing = self.publishing.lock().await;

        if let Ok(current) = self.store.read(&record.identity).await {
            if current.sequence > record.sequence {
                debug!(
                    "Anchor of {} already at #{}, keeping it over #{}",
                    record.identity, current.sequence, record.sequence
                );
                return Ok(current);
            }
        }
        self.store.write(&record).await?;
        info!(
            "Event #{} committed for {}. Digest: {}",
            record.sequence, record.identity, record.digest
        );
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anchor::store::MemoryAnchorStore;
    use crate::error::BridgeError;
    use serde_json::json;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_record_follows_each_append() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let store = Arc::new(MemoryAnchorStore::new());
        let publisher = AnchorPublisher::new(log.clone(), store.clone());

        let icp = publisher.incept("drone_sensor_1", json!({})).await.unwrap();
        assert_eq!(store.read(&icp.identity).await.unwrap().sequence, 0);

        let ixn = publisher
            .append(&icp.identity, EventType::Interaction, json!({"temp": 46}))
            .await
            .unwrap();
        let record = store.read(&icp.identity).await.unwrap();
        assert_eq!(record, AnchorRecord::from(&ixn));
        assert_eq!(log.latest(&icp.identity).await.unwrap().digest, record.digest);
    }

    #[tokio::test]
    async fn test_failed_append_publishes_nothing() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let store = Arc::new(MemoryAnchorStore::new());
        let publisher = AnchorPublisher::new(log, store.clone());

        let err = publisher
            .append("Eunknown", EventType::Interaction, json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::IdentityNotFound(_)));
        assert!(store.identities().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_never_moves_back() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let store = Arc::new(MemoryAnchorStore::new());
        let publisher = AnchorPublisher::new(log, store.clone());

        let icp = publisher.incept("drone_sensor_1", json!({})).await.unwrap();
        let ixn = publisher
            .append(&icp.identity, EventType::Interaction, json!({}))
            .await
            .unwrap();

        // A slower concurrent append finishing its export late
        let kept = publisher.publish(&icp).await.unwrap();
        assert_eq!(kept.sequence, 1);
        assert_eq!(store.read(&icp.identity).await.unwrap(), AnchorRecord::from(&ixn));
    }

    #[tokio::test]
    async fn test_concurrent_appends_leave_record_at_tip() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let store = Arc::new(MemoryAnchorStore::new());
        let publisher = AnchorPublisher::new(log.clone(), store.clone());
        let icp = publisher.incept("drone_sensor_1", json!({})).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..8 {
            let publisher = publisher.clone();
            let identity = icp.identity.clone();
            handles.push(tokio::spawn(async move {
                publisher
                    .append(&identity, EventType::Interaction, json!({ "i": i }))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let tip = log.latest(&icp.identity).await.unwrap();
        assert_eq!(tip.sequence, 8);
        assert_eq!(store.read(&icp.identity).await.unwrap(), AnchorRecord::from(&tip));
    }

    #[tokio::test]
    async fn test_publish_latest_restores_record() {
        let temp_dir = tempdir().unwrap();
        let log = EventLog::open(temp_dir.path()).unwrap();
        let icp = log.incept("sensor", json!({})).await.unwrap();
        log.append(&icp.identity, EventType::Interaction, json!({}))
            .await
            .unwrap();

        let store = Arc::new(MemoryAnchorStore::new());
        let publisher = AnchorPublisher::new(log, store.clone());
        let record = publisher.publish_latest(&icp.identity).await.unwrap();
        assert_eq!(record.sequence, 1);
        assert_eq!(store.read(&icp.identity).await.unwrap(), record);
    }
}
