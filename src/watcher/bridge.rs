//! Anchor Watcher
//!
//! Polls the anchor records of many identities and relays every new
//! sequence to the ledger. Each identity runs in its own task with its own
//! relay state, so a failing identity never holds back the others.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::anchor::AnchorStore;
use crate::config::{AppConfig, RetryConfig};
use crate::error::Result;
use crate::ledger::{Ledger, LedgerError};
use crate::watcher::backoff::Backoff;
use crate::watcher::checkpoint::CheckpointStore;
use crate::watcher::state::{RelayPhase, RelayState};

#[derive(Debug, Clone)]
pub struct WatcherSettings {
    pub poll_interval: Duration,
    pub submit_timeout: Duration,
    pub retry: RetryConfig,
    pub checkpoints: CheckpointStore,
}

impl WatcherSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            poll_interval: config.poll_interval(),
            submit_timeout: config.submit_timeout(),
            retry: config.retry.clone(),
            checkpoints: CheckpointStore::new(config.checkpoint_dir.clone())?,
        })
    }
}

/// Read-only copy of one identity's relay state
#[derive(Debug, Clone, Serialize)]
pub struct RelayStatus {
    pub identity: String,
    pub phase: RelayPhase,
    pub last_relayed: i64,
    pub pending_sequence: Option<u64>,
    pub abandoned_sequence: Option<u64>,
    pub consecutive_failures: u32,
    /// Consecutive failures reached the alert threshold
    pub alerting: bool,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl RelayStatus {
    fn from_state(identity: &str, state: &RelayState, alert_after: u32) -> Self {
        Self {
            identity: identity.to_string(),
            phase: state.phase(),
            last_relayed: state.last_relayed(),
            pending_sequence: state.pending().map(|record| record.sequence),
            abandoned_sequence: state.abandoned(),
            consecutive_failures: state.consecutive_failures(),
            alerting: state.consecutive_failures() >= alert_after,
            last_error: state.last_error().map(str::to_string),
            updated_at: Utc::now(),
        }
    }
}

/// Status copies published by relay tasks for the status endpoint
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    inner: Arc<RwLock<HashMap<String, RelayStatus>>>,
}

impl StatusBoard {
    fn publish(&self, identity: &str, state: &RelayState, alert_after: u32) {
        let status = RelayStatus::from_state(identity, state, alert_after);
        self.inner
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(identity.to_string(), status);
    }

    pub fn get(&self, identity: &str) -> Option<RelayStatus> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(identity)
            .cloned()
    }

    /// All statuses ordered by identity
    pub fn snapshot(&self) -> Vec<RelayStatus> {
        let mut statuses: Vec<RelayStatus> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        statuses.sort_by(|a, b| a.identity.cmp(&b.identity));
        statuses
    }
}

/// Fleet of per-identity relay tasks sharing one ledger
pub struct AnchorWatcher {
    store: Arc<dyn AnchorStore>,
    ledger: Arc<dyn Ledger>,
    settings: WatcherSettings,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
    board: StatusBoard,
}

impl AnchorWatcher {
    pub fn new(store: Arc<dyn AnchorStore>, ledger: Arc<dyn Ledger>, settings: WatcherSettings) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            store,
            ledger,
            settings,
            shutdown,
            tasks: Mutex::new(HashMap::new()),
            board: StatusBoard::default(),
        }
    }

    /// Start relaying `identity`. Returns false if it is already watched.
    ///
    /// An unreadable checkpoint restarts the identity from -1; the ledger
    /// absorbs the resubmission of an already anchored sequence.
    pub async fn watch(&self, identity: &str) -> Result<bool> {
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(identity) {
            return Ok(false);
        }

        let last_relayed = match self.settings.checkpoints.load(identity) {
            Ok(last_relayed) => last_relayed,
            Err(e) => {
                warn!("Ignoring relay checkpoint of {}: {}", identity, e);
                -1
            }
        };
        let task = RelayTask {
            identity: identity.to_string(),
            store: self.store.clone(),
            ledger: self.ledger.clone(),
            settings: self.settings.clone(),
            state: RelayState::new(last_relayed),
            backoff: Backoff::new(&self.settings.retry),
            board: self.board.clone(),
            shutdown: self.shutdown.subscribe(),
        };
        task.publish_status();

        tasks.insert(identity.to_string(), tokio::spawn(task.run()));
        info!("Watching {} (last relayed: {})", identity, last_relayed);
        Ok(true)
    }

    /// Watch every identity present in the anchor store; returns the new ones
    pub async fn watch_discovered(&self) -> Result<Vec<String>> {
        let mut added = Vec::new();
        for identity in self.store.identities().await? {
            match self.watch(&identity).await {
                Ok(true) => added.push(identity),
                Ok(false) => {}
                Err(e) => error!("Failed to watch discovered identity {}: {}", identity, e),
            }
        }
        if !added.is_empty() {
            info!("Discovered {} new identities", added.len());
        }
        Ok(added)
    }

    /// Periodically pick up identities that appear in the anchor store
    pub async fn discover_until_shutdown(&self, every: Duration) {
        let mut shutdown = self.shutdown.subscribe();
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.watch_discovered().await {
                warn!("Identity discovery failed: {}", e);
            }
        }
        debug!("Discovery loop stopped");
    }

    pub async fn watched(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.tasks.lock().await.keys().cloned().collect();
        identities.sort();
        identities
    }

    pub fn status_board(&self) -> StatusBoard {
        self.board.clone()
    }

    /// Receiver that flips to true when shutdown starts
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Signal every task to stop and wait for them. In-flight submissions
    /// finish or time out first.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let tasks: Vec<(String, JoinHandle<()>)> = self.tasks.lock().await.drain().collect();
        for (identity, handle) in tasks {
            if let Err(e) = handle.await {
                error!("Relay task for {} ended abnormally: {}", identity, e);
            }
        }
        info!("Anchor watcher stopped");
    }
}

struct RelayTask {
    identity: String,
    store: Arc<dyn AnchorStore>,
    ledger: Arc<dyn Ledger>,
    settings: WatcherSettings,
    state: RelayState,
    backoff: Backoff,
    board: StatusBoard,
    shutdown: watch::Receiver<bool>,
}

impl RelayTask {
    async fn run(mut self) {
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *self.shutdown.borrow() {
                break;
            }
            self.poll_once().await;
        }
        debug!("Relay task for {} stopped", self.identity);
    }

    async fn poll_once(&mut self) {
        let record = match self.store.read(&self.identity).await {
            Ok(record) => record,
            Err(e) if e.is_transient() => {
                debug!("Skipping poll for {}: {}", self.identity, e);
                return;
            }
            Err(e) => {
                warn!("Failed to read anchor record for {}: {}", self.identity, e);
                return;
            }
        };

        let sequence = record.sequence;
        if !self.state.detect(record) {
            return;
        }
        info!("New anchor detected for {}: sequence {}", self.identity, sequence);
        self.publish_status();
        self.relay_pending().await;
    }

    /// Submit the captured record until it is confirmed, abandoned or
    /// shutdown interrupts the backoff.
    async fn relay_pending(&mut self) {
        let Some(record) = self.state.pending().cloned() else {
            return;
        };
        self.backoff.reset();

        loop {
            self.state.begin_submit();
            self.publish_status();

            let outcome = timeout(
                self.settings.submit_timeout,
                self.ledger
                    .submit_anchor(&record.identity, record.sequence, &record.digest),
            )
            .await
            .unwrap_or(Err(LedgerError::Timeout(self.settings.submit_timeout)));

            match outcome {
                Ok(confirmation) => {
                    self.state.confirm();
                    self.publish_status();
                    if let Err(e) = self
                        .settings
                        .checkpoints
                        .save(&self.identity, self.state.last_relayed())
                    {
                        error!("Failed to checkpoint relay of {}: {}", self.identity, e);
                    }
                    self.state.settle();
                    self.publish_status();
                    info!(
                        "Relay confirmed for {} at sequence {} (block {}, new entry: {})",
                        self.identity,
                        confirmation.sequence,
                        confirmation.block_number,
                        confirmation.newly_recorded
                    );
                    return;
                }
                Err(e) if e.is_retryable() => {
                    let failures = self.state.fail(e.to_string());
                    self.publish_status();

                    let delay = self.backoff.next_delay();
                    if failures >= self.settings.retry.alert_after_failures {
                        error!(
                            "ALERT: relay of {} #{} failed {} times in a row: {}",
                            self.identity, record.sequence, failures, e
                        );
                    } else {
                        warn!(
                            "Relay of {} #{} failed (attempt {}), retrying in {:?}: {}",
                            self.identity, record.sequence, failures, delay, e
                        );
                    }

                    if self.wait_or_shutdown(delay).await {
                        self.state.reset();
                        self.publish_status();
                        return;
                    }
                }
                // Conflict: the ledger holds another digest for this sequence
                Err(e) => {
                    error!(
                        "ALERT: abandoning relay of {} #{}: {}",
                        self.identity, record.sequence, e
                    );
                    self.state.abandon(e.to_string());
                    self.publish_status();
                    return;
                }
            }
        }
    }

    /// Sleep for `delay`; returns true if shutdown was requested meanwhile
    async fn wait_or_shutdown(&mut self, delay: Duration) -> bool {
        if *self.shutdown.borrow() {
            return true;
        }
        tokio::select! {
            _ = sleep(delay) => false,
            changed = self.shutdown.changed() => changed.is_err() || *self.shutdown.borrow(),
        }
    }

    fn publish_status(&self) {
        self.board
            .publish(&self.identity, &self.state, self.settings.retry.alert_after_failures);
    }
}
