//! Event Log System
//!
//! Append-only, per-identity event logs linked by SHA-256 digests.

pub mod event;
pub mod replay;
pub mod store;

pub use event::{Event, EventType};
pub use replay::Replay;
pub use store::EventLog;
