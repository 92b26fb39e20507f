use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::event_log::Event;

/// Snapshot of the newest event of one identity, waiting to be relayed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnchorRecord {
    #[serde(rename = "aid")]
    pub identity: String,
    #[serde(rename = "seq")]
    pub sequence: u64,
    #[serde(rename = "said")]
    pub digest: String,
    #[serde(default)]
    pub payload: Value,
}

impl From<&Event> for AnchorRecord {
    fn from(event: &Event) -> Self {
        Self {
            identity: event.identity.clone(),
            sequence: event.sequence,
            digest: event.digest.clone(),
            payload: event.payload.clone(),
        }
    }
}
