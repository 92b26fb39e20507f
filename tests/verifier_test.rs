//! Verifier scenarios over logs written by sensors and relayed by the
//! watcher.

mod common;

use anchor_bridge::event_log::Event;
use anchor_bridge::ledger::MemoryLedger;
use anchor_bridge::verifier::{LogVerifier, RelaySource, SyncVerdict};
use anchor_bridge::watcher::AnchorWatcher;
use common::{fast_settings, wait_for_relay, TestFleet};
use std::fs;
use std::sync::Arc;

#[tokio::test]
async fn test_pending_until_relay_catches_up() {
    let fleet = TestFleet::new();
    let ledger = Arc::new(MemoryLedger::new());
    let mut sensor = fleet.sensor(1).await;
    for _ in 0..5 {
        sensor.record_cycle().await.unwrap();
    }

    let verifier = LogVerifier::new(fleet.log.clone())
        .with_anchor_store(fleet.store.clone())
        .with_ledger(ledger.clone());

    let before = verifier.verify(sensor.identity()).await.unwrap();
    assert_eq!(before.source, RelaySource::Ledger);
    assert_eq!(before.verdict, SyncVerdict::Pending { behind: 6 });

    let watcher = AnchorWatcher::new(
        fleet.store.clone(),
        ledger.clone(),
        fast_settings(fleet.checkpoints()),
    );
    watcher.watch(sensor.identity()).await.unwrap();
    wait_for_relay(&watcher.status_board(), sensor.identity(), 5).await;
    watcher.shutdown().await;

    let after = verifier.verify(sensor.identity()).await.unwrap();
    assert_eq!(after.verdict, SyncVerdict::Synced);
    assert_eq!(after.relayed_sequence, 5);
}

#[tokio::test]
async fn test_corrupted_log_never_synced() {
    let fleet = TestFleet::new();
    let mut sensor = fleet.sensor(1).await;
    for _ in 0..4 {
        sensor.record_cycle().await.unwrap();
    }

    let path = fleet.log.log_path(sensor.identity());
    let mut lines: Vec<String> = fs::read_to_string(&path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    let mut event: Event = serde_json::from_str(&lines[2]).unwrap();
    event.prior_digest = Some(format!("sha256:{}", "0".repeat(64)));
    lines[2] = serde_json::to_string(&event).unwrap();
    fs::write(&path, lines.join("\n") + "\n").unwrap();

    // The anchor record still points at the tip, which would otherwise be SYNCED
    let verifier = LogVerifier::new(fleet.log.clone()).with_anchor_store(fleet.store.clone());
    let report = verifier.verify(sensor.identity()).await.unwrap();
    assert_eq!(report.verdict, SyncVerdict::ChainBroken { at: 2 });
    assert!(report.is_failure());
}

#[tokio::test]
async fn test_verify_while_sensor_appends() {
    let fleet = TestFleet::new();
    let mut sensor = fleet.sensor(1).await;
    let identity = sensor.identity().to_string();
    let verifier = LogVerifier::new(fleet.log.clone());

    let writer = tokio::spawn(async move {
        for _ in 0..50 {
            sensor.record_cycle().await.unwrap();
        }
    });

    for _ in 0..20 {
        let report = verifier.verify_against(&identity, 0).unwrap();
        assert!(!report.verdict.is_integrity_failure(), "{}", report.summary());
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();

    let report = verifier.verify_against(&identity, 50).unwrap();
    assert_eq!(report.verdict, SyncVerdict::Synced);
}

#[tokio::test]
async fn test_verify_all_covers_fleet() {
    let fleet = TestFleet::new();
    fleet.sensor(1).await;
    fleet.sensor(2).await;

    let verifier = LogVerifier::new(fleet.log.clone()).with_anchor_store(fleet.store.clone());
    let reports = verifier.verify_all().await.unwrap();
    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.verdict == SyncVerdict::Synced));
}
