//! Simulated telemetry sensor.
//!
//! A sensor owns one identity (provisioned on first start, resumed by
//! alias afterwards) and commits one telemetry event per cycle, publishing
//! the anchor of every committed event.

use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::anchor::AnchorPublisher;
use crate::error::{BridgeError, Result};
use crate::event_log::{Event, EventType};

pub struct SensorNode {
    name: String,
    identity: String,
    publisher: AnchorPublisher,
    cycle: u64,
}

impl SensorNode {
    /// Alias of the numbered sensor `id`
    pub fn alias_for(id: u32) -> String {
        format!("drone_sensor_{}", id)
    }

    /// Resume the identity registered under `name`, or incept a new one
    pub async fn provision(publisher: AnchorPublisher, name: &str) -> Result<Self> {
        let (identity, cycle) = match publisher.log().identity_for_alias(name).await {
            Some(identity) => {
                let record = publisher.publish_latest(&identity).await?;
                info!("Loaded identity for {}: {} (tip #{})", name, identity, record.sequence);
                (identity, record.sequence)
            }
            None => {
                let icp = publisher.incept(name, json!({ "sensor": name })).await?;
                info!("Created new identity for {}: {}", name, icp.identity);
                (icp.identity, 0)
            }
        };

        Ok(Self {
            name: name.to_string(),
            identity,
            publisher,
            cycle,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn telemetry(&self, cycle: u64) -> Value {
        json!({
            "sensor": self.name,
            "cycle": cycle,
            "temp": 45 + (cycle % 10),
            "status": "ACTIVE",
        })
    }

    /// Commit the next telemetry reading and publish its anchor.
    ///
    /// The cycle follows the committed tip, also when the event was
    /// committed but its anchor could not be published.
    pub async fn record_cycle(&mut self) -> Result<Event> {
        let cycle = self.cycle + 1;
        let result = self
            .publisher
            .append(&self.identity, EventType::Interaction, self.telemetry(cycle))
            .await;
        if let Ok(tip) = self.publisher.log().latest(&self.identity).await {
            self.cycle = tip.sequence;
        }
        result
    }

    /// Record a cycle every `every` until `shutdown` flips to true. A failed
    /// cycle is logged and the anchor is republished on the next tick; only
    /// losing the log to another writer stops the sensor.
    pub async fn run(&mut self, every: Duration, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stale = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }

            if stale {
                match self.publisher.publish_latest(&self.identity).await {
                    Ok(record) => {
                        info!("Republished anchor of {} at #{}", self.name, record.sequence);
                        stale = false;
                    }
                    Err(e) => {
                        warn!("Anchor of {} still stale: {}", self.name, e);
                        continue;
                    }
                }
            }

            match self.record_cycle().await {
                Ok(_) => {}
                Err(e @ BridgeError::ConcurrentWriter(_)) => return Err(e),
                Err(e) => {
                    error!("Sensor {} failed cycle {}: {}", self.name, self.cycle + 1, e);
                    stale = true;
                }
            }
        }

        info!("Sensor {} stopped after cycle {}", self.name, self.cycle);
        Ok(())
    }
}
