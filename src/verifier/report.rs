//! Verification verdicts and reports.

use serde::Serialize;
use std::fmt;

/// Why a relayed anchor disagrees with the replayed log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InconsistencyKind {
    /// The relay claims a sequence the log does not contain
    RelayAhead { relayed: u64, log_max: u64 },
    /// The relayed digest differs from the log's digest at that sequence
    DigestMismatch {
        sequence: u64,
        relayed: String,
        logged: String,
    },
}

/// Outcome of verifying one identity's log
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncVerdict {
    Synced,
    Pending { behind: u64 },
    Inconsistent(InconsistencyKind),
    ChainBroken { at: u64 },
    SequenceGap { missing: u64 },
    DuplicateSequence { at: u64 },
    DigestMismatch { at: u64 },
}

impl SyncVerdict {
    /// Integrity failures of the log itself
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            SyncVerdict::ChainBroken { .. }
                | SyncVerdict::SequenceGap { .. }
                | SyncVerdict::DuplicateSequence { .. }
                | SyncVerdict::DigestMismatch { .. }
        )
    }

    pub fn is_failure(&self) -> bool {
        self.is_integrity_failure() || matches!(self, SyncVerdict::Inconsistent(_))
    }
}

impl fmt::Display for SyncVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncVerdict::Synced => write!(f, "SYNCED"),
            SyncVerdict::Pending { behind } => write!(f, "PENDING (relay behind by {})", behind),
            SyncVerdict::Inconsistent(InconsistencyKind::RelayAhead { relayed, log_max }) => write!(
                f,
                "INCONSISTENT (relayed sequence {} beyond log tip {})",
                relayed, log_max
            ),
            SyncVerdict::Inconsistent(InconsistencyKind::DigestMismatch {
                sequence,
                relayed,
                logged,
            }) => write!(
                f,
                "INCONSISTENT (sequence {} relayed as {} but logged as {})",
                sequence, relayed, logged
            ),
            SyncVerdict::ChainBroken { at } => write!(f, "ChainBroken(at={})", at),
            SyncVerdict::SequenceGap { missing } => write!(f, "SequenceGap(missing={})", missing),
            SyncVerdict::DuplicateSequence { at } => write!(f, "DuplicateSequence(at={})", at),
            SyncVerdict::DigestMismatch { at } => write!(f, "DigestMismatch(at={})", at),
        }
    }
}

/// Where the relayed position was taken from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelaySource {
    Ledger,
    AnchorStore,
    /// Supplied by the caller
    Known,
    /// Nothing relayed could be found
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub identity: String,
    pub event_count: usize,
    pub max_sequence: Option<u64>,
    pub tip_digest: Option<String>,
    /// -1 when nothing has been relayed
    pub relayed_sequence: i64,
    pub source: RelaySource,
    pub verdict: SyncVerdict,
}

impl VerificationReport {
    pub fn is_failure(&self) -> bool {
        self.verdict.is_failure()
    }

    /// One-line human-readable result
    pub fn summary(&self) -> String {
        let icon = match &self.verdict {
            SyncVerdict::Synced => "✅",
            SyncVerdict::Pending { .. } => "⚠️",
            _ => "❌",
        };
        format!(
            "{} {}: {} [log tip: {}, relayed: {} via {:?}]",
            icon,
            self.identity,
            self.verdict,
            self.max_sequence
                .map(|seq| seq.to_string())
                .unwrap_or_else(|| "-".to_string()),
            self.relayed_sequence,
            self.source
        )
    }
}
