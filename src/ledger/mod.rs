//! Ledger Integration Module
//!
//! The ledger is the external system of record for relayed anchors. It is
//! idempotent per `(identity, sequence)`: resubmitting a confirmed pair
//! returns the existing confirmation instead of creating a second entry.

pub mod http;
pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::{LedgerConfig, LedgerKind};
use crate::error::{BridgeError, Result};

pub use http::HttpLedger;
pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

/// Ledger acknowledgment of a durable anchor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub identity: String,
    pub sequence: u64,
    pub digest: String,
    /// Ledger-side position of the entry (block number, row id)
    pub block_number: u64,
    /// False when the pair was already recorded by an earlier submission
    pub newly_recorded: bool,
    pub confirmed_at: DateTime<Utc>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Ledger unavailable: {0}")]
    Unavailable(String),

    #[error("Ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Submission rejected: {0}")]
    Rejected(String),

    #[error("Sequence {sequence} of {identity} already anchored with digest {existing}")]
    Conflict {
        identity: String,
        sequence: u64,
        existing: String,
    },
}

impl LedgerError {
    /// Whether resubmitting the same anchor may succeed later. Only a
    /// conflicting digest is final; a rejected transaction is retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LedgerError::Conflict { .. })
    }
}

/// External ledger accepting relayed anchors
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Durably record `digest` as the anchor of `identity` at `sequence`
    async fn submit_anchor(
        &self,
        identity: &str,
        sequence: u64,
        digest: &str,
    ) -> std::result::Result<Confirmation, LedgerError>;

    /// Look up the anchored digest of `identity` at `sequence`
    async fn get_anchor(
        &self,
        identity: &str,
        sequence: u64,
    ) -> std::result::Result<Option<String>, LedgerError>;
}

/// Build the configured ledger client
pub async fn connect(config: &LedgerConfig) -> Result<Arc<dyn Ledger>> {
    let ledger: Arc<dyn Ledger> = match config.kind {
        LedgerKind::Sqlite => Arc::new(SqliteLedger::connect(&config.database_url).await?),
        LedgerKind::Http => {
            let endpoint = config.endpoint.as_deref().ok_or_else(|| {
                BridgeError::ConfigError("ledger.endpoint is required for the http ledger".to_string())
            })?;
            Arc::new(HttpLedger::new(
                endpoint,
                Duration::from_secs(config.timeout_secs),
            )?)
        }
        LedgerKind::Memory => Arc::new(MemoryLedger::new()),
    };

    info!("Ledger client ready ({:?})", config.kind);
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(LedgerError::Unavailable("down".to_string()).is_retryable());
        assert!(LedgerError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(LedgerError::Rejected("nonce too low".to_string()).is_retryable());
        assert!(!LedgerError::Conflict {
            identity: "E1".to_string(),
            sequence: 1,
            existing: "sha256:00".to_string(),
        }
        .is_retryable());
    }

    #[tokio::test]
    async fn test_http_ledger_requires_endpoint() {
        let config = LedgerConfig {
            kind: LedgerKind::Http,
            database_url: String::new(),
            endpoint: None,
            timeout_secs: 5,
        };
        let err = connect(&config).await.err().unwrap();
        assert!(matches!(err, BridgeError::ConfigError(_)));
    }
}
