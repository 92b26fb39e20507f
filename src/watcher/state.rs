//! Per-identity relay state machine.

use serde::Serialize;

use crate::anchor::AnchorRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayPhase {
    Idle,
    Detected,
    Submitting,
    Failed,
    Confirmed,
}

/// Relay progress of one identity. Owned by that identity's task only.
#[derive(Debug, Clone)]
pub struct RelayState {
    phase: RelayPhase,
    last_relayed: i64,
    pending: Option<AnchorRecord>,
    /// Highest sequence given up on; never detected again
    abandoned: Option<u64>,
    consecutive_failures: u32,
    last_error: Option<String>,
}

impl RelayState {
    /// Start idle with `last_relayed` (-1 when nothing was ever relayed)
    pub fn new(last_relayed: i64) -> Self {
        Self {
            phase: RelayPhase::Idle,
            last_relayed,
            pending: None,
            abandoned: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }

    pub fn phase(&self) -> RelayPhase {
        self.phase
    }

    pub fn last_relayed(&self) -> i64 {
        self.last_relayed
    }

    pub fn pending(&self) -> Option<&AnchorRecord> {
        self.pending.as_ref()
    }

    pub fn abandoned(&self) -> Option<u64> {
        self.abandoned
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Capture `record` for submission if it is newer than anything relayed.
    /// Returns false (and stays idle) for stale or regressed records.
    pub fn detect(&mut self, record: AnchorRecord) -> bool {
        if self.phase != RelayPhase::Idle || record.sequence as i64 <= self.last_relayed {
            return false;
        }
        if self.abandoned.is_some_and(|seq| record.sequence <= seq) {
            return false;
        }
        self.pending = Some(record);
        self.phase = RelayPhase::Detected;
        true
    }

    pub fn begin_submit(&mut self) {
        if matches!(self.phase, RelayPhase::Detected | RelayPhase::Failed) {
            self.phase = RelayPhase::Submitting;
        }
    }

    /// Record a retryable failure; returns the consecutive failure count
    pub fn fail(&mut self, error: impl Into<String>) -> u32 {
        self.phase = RelayPhase::Failed;
        self.consecutive_failures += 1;
        self.last_error = Some(error.into());
        self.consecutive_failures
    }

    /// Mark the pending sequence as relayed
    pub fn confirm(&mut self) -> Option<u64> {
        let record = self.pending.take()?;
        self.last_relayed = self.last_relayed.max(record.sequence as i64);
        self.phase = RelayPhase::Confirmed;
        self.consecutive_failures = 0;
        self.last_error = None;
        Some(record.sequence)
    }

    /// Return to idle once the confirmation has been checkpointed
    pub fn settle(&mut self) {
        if self.phase == RelayPhase::Confirmed {
            self.phase = RelayPhase::Idle;
        }
    }

    /// Give up on the pending sequence without advancing `last_relayed`.
    /// Only a newer sequence can be detected afterwards.
    pub fn abandon(&mut self, error: impl Into<String>) -> Option<AnchorRecord> {
        let record = self.pending.take()?;
        self.abandoned = Some(record.sequence);
        self.phase = RelayPhase::Idle;
        self.consecutive_failures = 0;
        self.last_error = Some(error.into());
        Some(record)
    }

    /// Drop the pending record without touching counters (shutdown)
    pub fn reset(&mut self) {
        self.pending = None;
        self.phase = RelayPhase::Idle;
    }
}
