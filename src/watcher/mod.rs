//! Anchor relay bridge: watches anchor records and forwards new sequences
//! to the ledger.

pub mod backoff;
pub mod bridge;
pub mod checkpoint;
pub mod state;

pub use bridge::{AnchorWatcher, RelayStatus, StatusBoard, WatcherSettings};
pub use checkpoint::CheckpointStore;
pub use state::{RelayPhase, RelayState};
