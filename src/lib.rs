pub mod anchor;
pub mod config;
pub mod error;
pub mod event_log;
pub mod fsutil;
pub mod ledger;
pub mod logging;
pub mod sensor;
pub mod server;
pub mod verifier;
pub mod watcher;

pub use error::BridgeError;
