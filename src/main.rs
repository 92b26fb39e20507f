use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use anchor_bridge::anchor::{AnchorStore, FileAnchorStore};
use anchor_bridge::config::AppConfig;
use anchor_bridge::ledger;
use anchor_bridge::logging::{init_tracing, DEFAULT_DIRECTIVES};
use anchor_bridge::server;
use anchor_bridge::watcher::{AnchorWatcher, WatcherSettings};

/// Relay new event log anchors to the ledger
#[derive(Parser, Debug)]
#[command(name = "anchor-bridge", version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing(DEFAULT_DIRECTIVES);
    let args = Args::parse();

    info!("Starting anchor bridge");

    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    info!("Configuration loaded");

    let ledger = match ledger::connect(&config.ledger).await {
        Ok(ledger) => ledger,
        Err(e) => {
            error!("Ledger configuration error: {}", e);
            std::process::exit(2);
        }
    };

    let store: Arc<dyn AnchorStore> = Arc::new(
        FileAnchorStore::new(&config.anchor_dir).context("Failed to open anchor store")?,
    );
    let settings = WatcherSettings::from_config(&config).context("Failed to prepare relay checkpoints")?;
    let watcher = Arc::new(AnchorWatcher::new(store, ledger, settings));

    if config.identities.is_empty() {
        let discovered = watcher.watch_discovered().await?;
        info!(
            "No identities configured, watching {} discovered in {}",
            discovered.len(),
            config.anchor_dir.display()
        );

        let discovery = watcher.clone();
        let every = config.discover_interval();
        tokio::spawn(async move {
            discovery.discover_until_shutdown(every).await;
        });
    } else {
        for identity in &config.identities {
            if let Err(e) = watcher.watch(identity).await {
                error!("Failed to watch {}, skipping: {}", identity, e);
            }
        }
    }

    let status_server = config.status_addr.clone().map(|addr| {
        let board = watcher.status_board();
        let shutdown = watcher.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = server::serve(&addr, board, shutdown).await {
                error!("Status server failed: {}", e);
            }
        })
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    watcher.shutdown().await;
    if let Some(handle) = status_server {
        let _ = handle.await;
    }

    info!("Anchor bridge stopped");
    Ok(())
}
