//! Log Verification
//!
//! Replays an identity's log, checks sequence continuity, hash linkage and
//! content digests, then compares the replayed tip with what was relayed.
//! Verification only reads: it can run next to an active writer and stops
//! at the tip that was committed when the replay opened.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::anchor::AnchorStore;
use crate::error::Result;
use crate::event_log::{Event, EventLog, EventType};
use crate::ledger::Ledger;
use crate::verifier::report::{InconsistencyKind, RelaySource, SyncVerdict, VerificationReport};

/// Outcome of replaying the log on its own
#[derive(Debug)]
struct ReplayOutcome {
    event_count: usize,
    /// Digest of each event, indexed by sequence
    digests: Vec<String>,
    integrity: Option<SyncVerdict>,
}

impl ReplayOutcome {
    fn max_sequence(&self) -> Option<u64> {
        self.digests.len().checked_sub(1).map(|max| max as u64)
    }
}

/// Relayed position as reported by one source
#[derive(Debug)]
struct RelayedPosition {
    sequence: i64,
    digest: Option<String>,
    source: RelaySource,
}

pub struct LogVerifier {
    log: EventLog,
    store: Option<Arc<dyn AnchorStore>>,
    ledger: Option<Arc<dyn Ledger>>,
}

impl LogVerifier {
    pub fn new(log: EventLog) -> Self {
        Self {
            log,
            store: None,
            ledger: None,
        }
    }

    pub fn with_anchor_store(mut self, store: Arc<dyn AnchorStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_ledger(mut self, ledger: Arc<dyn Ledger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Verify `identity` against the ledger, falling back to its anchor record
    pub async fn verify(&self, identity: &str) -> Result<VerificationReport> {
        let mut outcome = self.replay(identity)?;
        if outcome.integrity.is_some() {
            return Ok(self.report(identity, outcome, None));
        }

        let Some(max) = outcome.max_sequence() else {
            return Ok(self.report(identity, outcome, None));
        };

        let position = match self.ledger_position(identity, max).await {
            Some(position) => position,
            None => self.anchor_position(identity).await,
        };

        // Anchors are only published after the event is committed, so a
        // position past the replayed tip means the log grew meanwhile.
        if position.sequence > max as i64 {
            debug!(
                "{} grew past sequence {} during verification, replaying again",
                identity, max
            );
            outcome = self.replay(identity)?;
        }
        Ok(self.report(identity, outcome, Some(position)))
    }

    /// Verify `identity` against a relayed sequence supplied by the caller
    pub fn verify_against(&self, identity: &str, relayed: i64) -> Result<VerificationReport> {
        let outcome = self.replay(identity)?;
        let position = RelayedPosition {
            sequence: relayed,
            digest: None,
            source: RelaySource::Known,
        };
        Ok(self.report(identity, outcome, Some(position)))
    }

    /// Verify every identity in the log store
    pub async fn verify_all(&self) -> Result<Vec<VerificationReport>> {
        let mut reports = Vec::new();
        for identity in self.log.identities()? {
            reports.push(self.verify(&identity).await?);
        }
        Ok(reports)
    }

    fn replay(&self, identity: &str) -> Result<ReplayOutcome> {
        let replay = self.log.replay(identity)?;
        debug!(
            "Replaying {} ({} committed bytes)",
            identity,
            replay.committed_len()
        );

        let mut outcome = ReplayOutcome {
            event_count: 0,
            digests: Vec::new(),
            integrity: None,
        };
        let mut prior: Option<Event> = None;
        let mut first_bad_digest: Option<u64> = None;

        for item in replay {
            let expected = outcome.digests.len() as u64;
            let event = match item {
                Ok(event) => event,
                Err(e) => {
                    warn!("Unreadable event in log of {}: {}", identity, e);
                    outcome.integrity = Some(SyncVerdict::ChainBroken { at: expected });
                    return Ok(outcome);
                }
            };
            outcome.event_count += 1;

            if let Some(verdict) = check_event(identity, &event, prior.as_ref(), expected) {
                outcome.integrity = Some(verdict);
                return Ok(outcome);
            }
            if first_bad_digest.is_none() && !event.verify_digest() {
                first_bad_digest = Some(event.sequence);
            }

            outcome.digests.push(event.digest.clone());
            prior = Some(event);
        }

        outcome.integrity = match (first_bad_digest, outcome.digests.is_empty()) {
            (Some(at), _) => Some(SyncVerdict::DigestMismatch { at }),
            (None, true) => Some(SyncVerdict::ChainBroken { at: 0 }),
            (None, false) => None,
        };
        Ok(outcome)
    }

    /// Highest relayed sequence according to the ledger. `None` when the
    /// ledger is not configured or could not be queried.
    async fn ledger_position(&self, identity: &str, max: u64) -> Option<RelayedPosition> {
        let ledger = self.ledger.as_ref()?;

        let result: std::result::Result<RelayedPosition, crate::ledger::LedgerError> = async {
            if let Some(digest) = ledger.get_anchor(identity, max + 1).await? {
                return Ok(RelayedPosition {
                    sequence: (max + 1) as i64,
                    digest: Some(digest),
                    source: RelaySource::Ledger,
                });
            }

            // Relays may skip superseded sequences, so walk down to the newest one
            for sequence in (0..=max).rev() {
                if let Some(digest) = ledger.get_anchor(identity, sequence).await? {
                    return Ok(RelayedPosition {
                        sequence: sequence as i64,
                        digest: Some(digest),
                        source: RelaySource::Ledger,
                    });
                }
            }

            Ok(RelayedPosition {
                sequence: -1,
                digest: None,
                source: RelaySource::Ledger,
            })
        }
        .await;

        match result {
            Ok(position) => Some(position),
            Err(e) => {
                warn!(
                    "Ledger lookup for {} failed, falling back to anchor record: {}",
                    identity, e
                );
                None
            }
        }
    }

    async fn anchor_position(&self, identity: &str) -> RelayedPosition {
        let unavailable = RelayedPosition {
            sequence: -1,
            digest: None,
            source: RelaySource::Unavailable,
        };
        let Some(store) = self.store.as_ref() else {
            return unavailable;
        };

        match store.read(identity).await {
            Ok(record) => RelayedPosition {
                sequence: record.sequence as i64,
                digest: Some(record.digest),
                source: RelaySource::AnchorStore,
            },
            Err(e) => {
                debug!("No usable anchor record for {}: {}", identity, e);
                unavailable
            }
        }
    }

    fn report(
        &self,
        identity: &str,
        outcome: ReplayOutcome,
        position: Option<RelayedPosition>,
    ) -> VerificationReport {
        let position = position.unwrap_or(RelayedPosition {
            sequence: -1,
            digest: None,
            source: RelaySource::Unavailable,
        });
        let max_sequence = outcome.max_sequence();
        let tip_digest = outcome.digests.last().cloned();

        let verdict = match (&outcome.integrity, max_sequence) {
            (Some(failure), _) => failure.clone(),
            (None, Some(max)) => sync_verdict(&outcome.digests, max, &position),
            (None, None) => SyncVerdict::ChainBroken { at: 0 },
        };

        let report = VerificationReport {
            identity: identity.to_string(),
            event_count: outcome.event_count,
            max_sequence,
            tip_digest,
            relayed_sequence: position.sequence,
            source: position.source,
            verdict,
        };
        info!("{}", report.summary());
        report
    }
}

/// Check sequencing and linkage of `event`, which should carry `expected`
fn check_event(identity: &str, event: &Event, prior: Option<&Event>, expected: u64) -> Option<SyncVerdict> {
    if event.sequence < expected {
        return Some(SyncVerdict::DuplicateSequence { at: event.sequence });
    }
    if event.sequence > expected {
        return Some(SyncVerdict::SequenceGap { missing: expected });
    }

    let linked = match prior {
        None => {
            event.event_type == EventType::Inception
                && event.prior_digest.is_none()
                && event.verify_identifier()
        }
        Some(prior) => event.event_type != EventType::Inception && event.links_to(prior),
    };

    if !linked || event.identity != identity {
        return Some(SyncVerdict::ChainBroken { at: event.sequence });
    }
    None
}

fn sync_verdict(digests: &[String], max: u64, position: &RelayedPosition) -> SyncVerdict {
    if position.sequence > max as i64 {
        return SyncVerdict::Inconsistent(InconsistencyKind::RelayAhead {
            relayed: position.sequence as u64,
            log_max: max,
        });
    }

    if position.sequence >= 0 {
        let sequence = position.sequence as u64;
        if let Some(relayed) = &position.digest {
            let logged = &digests[sequence as usize];
            if relayed != logged {
                return SyncVerdict::Inconsistent(InconsistencyKind::DigestMismatch {
                    sequence,
                    relayed: relayed.clone(),
                    logged: logged.clone(),
                });
            }
        }
    }

    if position.sequence == max as i64 {
        SyncVerdict::Synced
    } else {
        SyncVerdict::Pending {
            behind: (max as i64 - position.sequence) as u64,
        }
    }
}
