use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use anchor_bridge::anchor::{AnchorPublisher, FileAnchorStore};
use anchor_bridge::config::AppConfig;
use anchor_bridge::event_log::EventLog;
use anchor_bridge::logging::init_tracing;
use anchor_bridge::sensor::SensorNode;

/// Simulated telemetry sensor committing to its own event log
#[derive(Parser, Debug)]
#[command(name = "sensor-node", version)]
struct Args {
    /// Sensor number; the sensor is named drone_sensor_<ID>
    #[arg(long, conflicts_with = "name")]
    id: Option<u32>,

    /// Explicit sensor name (alias of its identity)
    #[arg(long)]
    name: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("anchor_bridge=info,sensor_node=info");
    let args = Args::parse();

    let name = match (args.id, args.name) {
        (Some(id), None) => SensorNode::alias_for(id),
        (None, Some(name)) => name,
        _ => return Err(anyhow!("Pass either --id or --name")),
    };

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let log = EventLog::open(&config.log_dir).context("Failed to open event log store")?;
    let store = Arc::new(FileAnchorStore::new(&config.anchor_dir).context("Failed to open anchor store")?);
    let publisher = AnchorPublisher::new(log, store);

    info!("Initializing {}", name);
    let mut sensor = SensorNode::provision(publisher, &name)
        .await
        .with_context(|| format!("Failed to provision {}", name))?;
    info!("{} running as {}", sensor.name(), sensor.identity());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping...");
        }
        let _ = shutdown_tx.send(true);
    });

    sensor
        .run(config.sensor_interval(), shutdown_rx)
        .await
        .context("Sensor stopped on error")?;
    Ok(())
}
