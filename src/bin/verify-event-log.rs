use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

use anchor_bridge::anchor::FileAnchorStore;
use anchor_bridge::config::{AppConfig, LedgerKind};
use anchor_bridge::event_log::EventLog;
use anchor_bridge::ledger;
use anchor_bridge::logging::init_tracing;
use anchor_bridge::verifier::{LogVerifier, VerificationReport};

/// Replay event logs and cross-check them against relayed anchors
#[derive(Parser, Debug)]
#[command(name = "verify-event-log", version)]
struct Args {
    /// Identity (AID) to verify; every identity when omitted
    #[arg(short, long, conflicts_with = "alias")]
    identity: Option<String>,

    /// Sensor alias to verify, e.g. drone_sensor_1
    #[arg(short, long)]
    alias: Option<String>,

    /// Compare against this relayed sequence instead of the ledger
    #[arg(long, requires = "identity")]
    relayed: Option<i64>,

    /// Skip the ledger and use anchor records only
    #[arg(long)]
    no_ledger: bool,

    /// Print the replayed events
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("anchor_bridge=warn,verify_event_log=info");
    let args = Args::parse();

    match run(args).await {
        Ok(true) => Ok(()),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("Verification failed: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns false when any identity failed verification
async fn run(args: Args) -> Result<bool> {
    let config = AppConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let log = EventLog::open(&config.log_dir).context("Failed to open event log store")?;

    let mut verifier = LogVerifier::new(log.clone())
        .with_anchor_store(Arc::new(FileAnchorStore::new(&config.anchor_dir)?));
    if !args.no_ledger && config.ledger.kind != LedgerKind::Memory {
        match ledger::connect(&config.ledger).await {
            Ok(ledger) => verifier = verifier.with_ledger(ledger),
            Err(e) => warn!("Ledger unavailable, using anchor records: {}", e),
        }
    }

    let identities = match (&args.identity, &args.alias) {
        (Some(identity), _) => vec![identity.clone()],
        (None, Some(alias)) => vec![log
            .identity_for_alias(alias)
            .await
            .ok_or_else(|| anyhow!("Unknown alias: {}", alias))?],
        (None, None) => log.identities()?,
    };
    if identities.is_empty() {
        return Err(anyhow!("No event logs found in {}", config.log_dir.display()));
    }

    let mut all_ok = true;
    for identity in identities {
        if args.verbose {
            print_events(&log, &identity)?;
        }

        let report = match args.relayed {
            Some(relayed) => verifier.verify_against(&identity, relayed)?,
            None => verifier.verify(&identity).await?,
        };
        all_ok &= !report.is_failure();
        print_report(&report);
    }

    Ok(all_ok)
}

fn print_events(log: &EventLog, identity: &str) -> Result<()> {
    println!("\nEvent log of {}", identity);
    println!("{:<5} | {:<4} | {:<71} | PAYLOAD", "SEQ", "TYPE", "DIGEST");
    println!("{}", "-".repeat(100));

    for event in log.replay(identity)? {
        match event {
            Ok(event) => println!(
                "{:<5} | {:<4} | {:<71} | {}",
                event.sequence,
                event.event_type.as_str(),
                event.digest,
                event.payload
            ),
            Err(e) => {
                println!("{:<5} | {:<4} | {:<71} | {}", "?", "?", "unreadable", e);
                break;
            }
        }
    }
    Ok(())
}

fn print_report(report: &VerificationReport) {
    println!("{}", report.summary());
}
