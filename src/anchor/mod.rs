//! Anchor Export Module
//!
//! Anchor records are small, overwritable pointers to the newest event of
//! each identity. The publisher writes them after every log append and the
//! watcher relays them to the ledger.

pub mod publisher;
pub mod record;
pub mod store;

pub use publisher::AnchorPublisher;
pub use record::AnchorRecord;
pub use store::{AnchorStore, FileAnchorStore, MemoryAnchorStore};
