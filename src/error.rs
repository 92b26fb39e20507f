use thiserror::Error;

use crate::ledger::LedgerError;

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::SerializationError(format!("JSON serialization error: {}", err))
    }
}

impl From<sqlx::Error> for BridgeError {
    fn from(err: sqlx::Error) -> Self {
        Self::DatabaseError(format!("Database error: {}", err))
    }
}

impl From<std::io::Error> for BridgeError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(format!("I/O error: {}", err))
    }
}

impl From<config::ConfigError> for BridgeError {
    fn from(err: config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Identity not found: {0}")]
    IdentityNotFound(String),

    /// Anchor record missing, malformed or mid-write. Never fatal.
    #[error("Transient anchor read failure: {0}")]
    TransientRead(String),

    #[error("Concurrent writer detected on identity {0}")]
    ConcurrentWriter(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn identity_not_found(identity: &str) -> Self {
        Self::IdentityNotFound(identity.to_string())
    }

    pub fn transient(msg: impl Into<String>) -> Self {
        Self::TransientRead(msg.into())
    }

    /// Whether the failure only affects the current poll and should be retried silently.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientRead(_))
    }
}
