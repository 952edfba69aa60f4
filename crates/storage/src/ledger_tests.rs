// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fb_core::ManualClock;
use std::time::Duration;
use tempfile::tempdir;

fn ledger_in(dir: &Path, clock: ManualClock) -> FirmwareLedger<ManualClock> {
    FirmwareLedger::load(dir.join("firmware_ledger.json"), clock)
}

fn record(ledger: &FirmwareLedger<ManualClock>, port: &str) {
    ledger
        .record_deployment(port, "fw-hash", "src-hash", Path::new("/p"), "uno", "flags-hash")
        .unwrap();
}

#[test]
fn test_record_then_current() {
    let dir = tempdir().unwrap();
    let ledger = ledger_in(dir.path(), ManualClock::new());
    record(&ledger, "COM3");

    assert!(ledger.is_current("COM3", "fw-hash"));
    assert!(!ledger.is_current("COM3", "other-hash"));
    assert!(!ledger.is_current("COM4", "fw-hash"));
}

#[test]
fn test_entry_goes_stale_after_24h() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new();
    let ledger = ledger_in(dir.path(), clock.clone());
    record(&ledger, "COM3");

    clock.advance(Duration::from_secs(STALE_AFTER_SECS - 60));
    assert!(ledger.is_current("COM3", "fw-hash"));

    clock.advance(Duration::from_secs(120));
    assert!(!ledger.is_current("COM3", "fw-hash"));
    assert!(ledger.needs_redeploy("COM3", "src-hash", "flags-hash", None, None));
}

#[test]
fn test_needs_redeploy_matrix() {
    let dir = tempdir().unwrap();
    let ledger = ledger_in(dir.path(), ManualClock::new());
    record(&ledger, "COM3");

    // Unchanged: no redeploy
    assert!(!ledger.needs_redeploy("COM3", "src-hash", "flags-hash", Some(Path::new("/p")), Some("uno")));
    // Source changed
    assert!(ledger.needs_redeploy("COM3", "other", "flags-hash", None, None));
    // Flags changed
    assert!(ledger.needs_redeploy("COM3", "src-hash", "other", None, None));
    // Different project
    assert!(ledger.needs_redeploy("COM3", "src-hash", "flags-hash", Some(Path::new("/q")), None));
    // Different environment
    assert!(ledger.needs_redeploy("COM3", "src-hash", "flags-hash", None, Some("esp32dev")));
    // Unknown port
    assert!(ledger.needs_redeploy("COM9", "src-hash", "flags-hash", None, None));
}

#[test]
fn test_clear_port() {
    let dir = tempdir().unwrap();
    let ledger = ledger_in(dir.path(), ManualClock::new());
    record(&ledger, "COM3");
    record(&ledger, "COM4");

    ledger.clear("COM3").unwrap();
    assert!(!ledger.is_current("COM3", "fw-hash"));
    assert!(ledger.is_current("COM4", "fw-hash"));

    ledger.clear_all().unwrap();
    assert!(!ledger.is_current("COM4", "fw-hash"));
}

#[test]
fn test_clear_stale() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new();
    let ledger = ledger_in(dir.path(), clock.clone());
    record(&ledger, "COM3");

    clock.advance(Duration::from_secs(3600));
    record(&ledger, "COM4");

    let removed = ledger.clear_stale(1800).unwrap();
    assert_eq!(removed, 1);
    assert!(ledger.get_entry("COM3").is_none());
    assert!(ledger.get_entry("COM4").is_some());
}

#[test]
fn test_ledger_persists() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::new();
    {
        let ledger = ledger_in(dir.path(), clock.clone());
        record(&ledger, "COM3");
    }

    let reloaded = ledger_in(dir.path(), clock);
    assert!(reloaded.is_current("COM3", "fw-hash"));
    let entry = reloaded.get_entry("COM3").unwrap();
    assert_eq!(entry.environment, "uno");
    assert_eq!(entry.source_hash, "src-hash");
}

#[test]
fn test_corrupt_ledger_resets() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("firmware_ledger.json");
    std::fs::write(&path, b"not json at all").unwrap();

    let ledger = FirmwareLedger::load(path, ManualClock::new());
    assert!(ledger.get_entry("COM3").is_none());
    // Still usable after reset
    record(&ledger, "COM3");
    assert!(ledger.is_current("COM3", "fw-hash"));
}
