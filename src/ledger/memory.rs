//! In-process ledger used for dry runs and tests.
//!
//! Supports failure injection per identity, including lost
//! acknowledgments where the entry lands but the caller sees an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use crate::ledger::{Confirmation, Ledger, LedgerError};

#[derive(Debug, Clone)]
enum FailureMode {
    /// Refuse the submission with the given error
    Refuse(LedgerError),
    /// Record the entry, then report it as unavailable
    LoseAck,
}

#[derive(Debug, Clone)]
struct FailurePlan {
    mode: FailureMode,
    remaining: Option<u32>,
}

#[derive(Debug, Clone)]
struct Entry {
    digest: String,
    block_number: u64,
    confirmed_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct MemoryLedger {
    entries: Mutex<BTreeMap<(String, u64), Entry>>,
    submissions: Mutex<Vec<(String, u64)>>,
    failures: Mutex<HashMap<String, FailurePlan>>,
    latency: Mutex<Option<Duration>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail submissions for `identity` with `error`, `times` times or forever
    pub fn fail_identity(&self, identity: &str, error: LedgerError, times: Option<u32>) {
        self.plan(identity, FailureMode::Refuse(error), times);
    }

    /// Record submissions for `identity` but drop the acknowledgment
    pub fn lose_acks(&self, identity: &str, times: u32) {
        self.plan(identity, FailureMode::LoseAck, Some(times));
    }

    /// Remove any injected failure for `identity`
    pub fn heal(&self, identity: &str) {
        self.lock_failures().remove(identity);
    }

    /// Delay every submission by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    /// Every submission attempt in call order, failed ones included
    pub fn submissions(&self) -> Vec<(String, u64)> {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Submission attempts for one identity, in call order
    pub fn submitted_sequences(&self, identity: &str) -> Vec<u64> {
        self.submissions()
            .into_iter()
            .filter(|(aid, _)| aid == identity)
            .map(|(_, seq)| seq)
            .collect()
    }

    /// Sequences durably recorded for `identity`, ascending
    pub fn recorded_sequences(&self, identity: &str) -> Vec<u64> {
        self.lock_entries()
            .keys()
            .filter(|(aid, _)| aid == identity)
            .map(|(_, seq)| *seq)
            .collect()
    }

    fn plan(&self, identity: &str, mode: FailureMode, remaining: Option<u32>) {
        self.lock_failures()
            .insert(identity.to_string(), FailurePlan { mode, remaining });
    }

    /// Take one injected failure for `identity`, if any is pending
    fn take_failure(&self, identity: &str) -> Option<FailureMode> {
        let mut failures = self.lock_failures();
        let plan = failures.get_mut(identity)?;
        let mode = plan.mode.clone();
        match plan.remaining.as_mut() {
            Some(0) => {
                failures.remove(identity);
                return None;
            }
            Some(remaining) => {
                *remaining -= 1;
                if *remaining == 0 {
                    failures.remove(identity);
                }
            }
            None => {}
        }
        Some(mode)
    }

    fn record(&self, identity: &str, sequence: u64, digest: &str) -> Result<Confirmation, LedgerError> {
        let mut entries = self.lock_entries();
        let next_block = entries.len() as u64 + 1;
        let key = (identity.to_string(), sequence);

        let (entry, newly_recorded) = match entries.get(&key) {
            Some(existing) => (existing.clone(), false),
            None => {
                let entry = Entry {
                    digest: digest.to_string(),
                    block_number: next_block,
                    confirmed_at: Utc::now(),
                };
                entries.insert(key, entry.clone());
                (entry, true)
            }
        };

        if entry.digest != digest {
            return Err(LedgerError::Conflict {
                identity: identity.to_string(),
                sequence,
                existing: entry.digest,
            });
        }

        Ok(Confirmation {
            identity: identity.to_string(),
            sequence,
            digest: entry.digest,
            block_number: entry.block_number,
            newly_recorded,
            confirmed_at: entry.confirmed_at,
        })
    }

    fn lock_entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<(String, u64), Entry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_failures(&self) -> std::sync::MutexGuard<'_, HashMap<String, FailurePlan>> {
        self.failures.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn submit_anchor(
        &self,
        identity: &str,
        sequence: u64,
        digest: &str,
    ) -> Result<Confirmation, LedgerError> {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((identity.to_string(), sequence));

        match self.take_failure(identity) {
            Some(FailureMode::Refuse(error)) => Err(error),
            Some(FailureMode::LoseAck) => {
                self.record(identity, sequence, digest)?;
                Err(LedgerError::Unavailable(
                    "connection reset before acknowledgment".to_string(),
                ))
            }
            None => self.record(identity, sequence, digest),
        }
    }

    async fn get_anchor(&self, identity: &str, sequence: u64) -> Result<Option<String>, LedgerError> {
        Ok(self
            .lock_entries()
            .get(&(identity.to_string(), sequence))
            .map(|entry| entry.digest.clone()))
    }
}
