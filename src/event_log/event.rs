//! Key Event
//!
//! Defines the structure of a single entry in a device's hash-linked
//! event log. Every event carries the digest of its predecessor, so the
//! log forms a tamper-evident chain rooted at the inception event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Kind of log event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    /// First event of an identity, sequence 0
    #[serde(rename = "icp")]
    Inception,
    /// Any later event, usually carrying application data
    #[serde(rename = "ixn")]
    Interaction,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Inception => "icp",
            EventType::Interaction => "ixn",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log event linked to its predecessor by digest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub identity: String,
    pub sequence: u64,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_digest: Option<String>,
    pub digest: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
}

impl Event {
    /// Create the inception event of a new identity.
    ///
    /// The identity is self-addressing: it is derived from the event's own
    /// content with the identity field left blank.
    pub fn inception(payload: Value) -> Self {
        let mut event = Self {
            identity: String::new(),
            sequence: 0,
            event_type: EventType::Inception,
            prior_digest: None,
            digest: String::new(),
            timestamp: Utc::now(),
            payload,
        };

        event.identity = event.derive_identifier();
        event.digest = event.calculate_digest();
        event
    }

    /// Create the interaction event that follows `prior`
    pub fn interaction(prior: &Event, payload: Value) -> Self {
        let mut event = Self {
            identity: prior.identity.clone(),
            sequence: prior.sequence + 1,
            event_type: EventType::Interaction,
            prior_digest: Some(prior.digest.clone()),
            digest: String::new(),
            timestamp: Utc::now(),
            payload,
        };

        event.digest = event.calculate_digest();
        event
    }

    /// Create canonical string representation for hashing
    pub fn canonical_string(&self) -> String {
        format!(
            "identity:{}|sequence:{}|event_type:{}|prior_digest:{}|timestamp:{}|payload:{}",
            self.identity,
            self.sequence,
            self.event_type,
            self.prior_digest.as_deref().unwrap_or(""),
            self.timestamp.to_rfc3339(),
            // serde_json maps are ordered, so this is deterministic
            self.payload
        )
    }

    /// Calculate SHA256 digest of this event
    pub fn calculate_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_string().as_bytes());
        format!("sha256:{}", hex::encode(hasher.finalize()))
    }

    /// Verify this event's stored digest against its content
    pub fn verify_digest(&self) -> bool {
        self.digest == self.calculate_digest()
    }

    fn derive_identifier(&self) -> String {
        let mut unbound = self.clone();
        unbound.identity.clear();
        unbound.digest.clear();

        let mut hasher = Sha256::new();
        hasher.update(unbound.canonical_string().as_bytes());
        format!("E{}", hex::encode(hasher.finalize()))
    }

    /// Check that an inception event's identity is bound to its content
    pub fn verify_identifier(&self) -> bool {
        self.event_type == EventType::Inception && self.identity == self.derive_identifier()
    }

    /// Whether `self` directly follows `prior` in the chain
    pub fn links_to(&self, prior: &Event) -> bool {
        self.prior_digest.as_deref() == Some(prior.digest.as_str())
    }

    /// Get a human-readable summary
    pub fn summary(&self) -> String {
        format!(
            "{} #{} of {} ({})",
            self.event_type, self.sequence, self.identity, self.digest
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_inception_event() {
        let icp = Event::inception(json!({"alias": "drone_sensor_1"}));

        assert_eq!(icp.sequence, 0);
        assert_eq!(icp.event_type, EventType::Inception);
        assert!(icp.prior_digest.is_none());
        assert!(icp.identity.starts_with('E'));
        assert!(icp.verify_digest());
        assert!(icp.verify_identifier());
    }

    #[test]
    fn test_interaction_links_to_prior() {
        let icp = Event::inception(json!({"alias": "drone_sensor_1"}));
        let ixn = Event::interaction(&icp, json!({"temp": 46}));

        assert_eq!(ixn.sequence, 1);
        assert_eq!(ixn.identity, icp.identity);
        assert!(ixn.links_to(&icp));
        assert!(ixn.verify_digest());
        assert!(!ixn.verify_identifier());
    }

    #[test]
    fn test_digest_format() {
        let icp = Event::inception(json!({}));
        let digest1 = icp.calculate_digest();
        let digest2 = icp.calculate_digest();
        assert_eq!(digest1, digest2);
        assert!(digest1.starts_with("sha256:"));
        assert_eq!(digest1.len(), 71); // "sha256:" + 64 hex chars
    }

    #[test]
    fn test_tampered_payload_detected() {
        let icp = Event::inception(json!({"alias": "a"}));
        let mut ixn = Event::interaction(&icp, json!({"temp": 46}));
        ixn.payload = json!({"temp": 99});
        assert!(!ixn.verify_digest());
    }

    #[test]
    fn test_rebound_identity_detected() {
        let mut icp = Event::inception(json!({"alias": "a"}));
        icp.identity = "Eforged".to_string();
        icp.digest = icp.calculate_digest();
        assert!(icp.verify_digest());
        assert!(!icp.verify_identifier());
    }

    #[test]
    fn test_event_type_wire_names() {
        assert_eq!(serde_json::to_string(&EventType::Inception).unwrap(), "\"icp\"");
        assert_eq!(serde_json::to_string(&EventType::Interaction).unwrap(), "\"ixn\"");
    }
}
