//! Independent replay and cross-check of identity logs.

pub mod report;
pub mod verify;

pub use report::{InconsistencyKind, RelaySource, SyncVerdict, VerificationReport};
pub use verify::LogVerifier;
