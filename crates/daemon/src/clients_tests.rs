// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fb_core::ManualClock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

const TIMEOUT: Duration = Duration::from_secs(30);

fn manager(clock: &ManualClock) -> ClientConnectionManager<ManualClock> {
    ClientConnectionManager::new(clock.clone(), TIMEOUT)
}

fn own_pid() -> u32 {
    std::process::id()
}

#[test]
fn test_register_generates_monotonic_ids() {
    let clock = ManualClock::new();
    let clients = manager(&clock);

    let a = clients.register_client(None, own_pid(), HashMap::new());
    let b = clients.register_client(None, own_pid(), HashMap::new());
    assert_eq!(a.client_id, "client-1");
    assert_eq!(b.client_id, "client-2");
    assert_eq!(clients.client_count(), 2);
}

#[test]
fn test_register_with_explicit_id_and_metadata() {
    let clock = ManualClock::new();
    let clients = manager(&clock);

    let mut metadata = HashMap::new();
    metadata.insert("tool".to_string(), "ci-runner".to_string());
    let info = clients.register_client(
        Some(ClientId::new("ci-7")),
        own_pid(),
        metadata,
    );
    assert_eq!(info.client_id, "ci-7");
    assert_eq!(info.metadata.get("tool").map(String::as_str), Some("ci-runner"));
}

#[test]
fn test_heartbeat_keeps_client_alive() {
    let clock = ManualClock::new();
    let clients = manager(&clock);
    let info = clients.register_client(None, own_pid(), HashMap::new());

    clock.advance(Duration::from_secs(20));
    assert!(clients.is_client_alive(&info.client_id));
    assert!(clients.update_heartbeat(&info.client_id));

    clock.advance(Duration::from_secs(20));
    assert!(clients.is_client_alive(&info.client_id));

    clock.advance(Duration::from_secs(31));
    assert!(!clients.is_client_alive(&info.client_id));
    assert_eq!(clients.get_dead_clients(), vec![info.client_id]);
}

#[test]
fn test_dead_pid_detected_eagerly() {
    let clock = ManualClock::new();
    let clients = manager(&clock);

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    let info = clients.register_client(None, dead_pid, HashMap::new());
    // Heartbeat is fresh, but the PID probe wins
    assert!(!clients.is_client_alive(&info.client_id));
}

#[test]
fn test_resource_attach_detach() {
    let clock = ManualClock::new();
    let clients = manager(&clock);
    let info = clients.register_client(None, own_pid(), HashMap::new());

    assert!(clients.attach_resource(&info.client_id, "serial:COM3"));
    assert!(clients.attach_resource(&info.client_id, "serial:COM4"));
    assert_eq!(clients.get_client_resources(&info.client_id).len(), 2);

    assert!(clients.detach_resource(&info.client_id, "serial:COM3"));
    assert!(!clients.detach_resource(&info.client_id, "serial:COM3"));
    assert_eq!(clients.get_client_resources(&info.client_id).len(), 1);

    assert!(!clients.attach_resource(&ClientId::new("ghost"), "x"));
}

#[test]
fn test_cleanup_callbacks_receive_client_info() {
    let clock = ManualClock::new();
    let clients = manager(&clock);
    let seen: Arc<parking_lot::Mutex<Vec<String>>> = Arc::default();

    {
        let seen = Arc::clone(&seen);
        clients.register_cleanup_callback(Box::new(move |info| {
            seen.lock().push(info.client_id.to_string());
        }));
    }

    let info = clients.register_client(None, own_pid(), HashMap::new());
    clients.attach_resource(&info.client_id, "serial:COM3");
    assert!(clients.unregister_client(&info.client_id));

    assert_eq!(seen.lock().as_slice(), &[info.client_id.to_string()]);
    assert_eq!(clients.client_count(), 0);
    // Second unregister is a no-op
    assert!(!clients.unregister_client(&info.client_id));
}

#[test]
fn test_panicking_callback_does_not_block_others() {
    let clock = ManualClock::new();
    let clients = manager(&clock);
    let fired = Arc::new(AtomicUsize::new(0));

    clients.register_cleanup_callback(Box::new(|_info| {
        panic!("boom");
    }));
    {
        let fired = Arc::clone(&fired);
        clients.register_cleanup_callback(Box::new(move |_info| {
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let info = clients.register_client(None, own_pid(), HashMap::new());
    assert!(clients.unregister_client(&info.client_id));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn test_cleanup_dead_clients_fires_callbacks() {
    let clock = ManualClock::new();
    let clients = manager(&clock);
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        clients.register_cleanup_callback(Box::new(move |_info| {
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let dying = clients.register_client(None, own_pid(), HashMap::new());
    clients.register_client(Some(ClientId::new("survivor")), own_pid(), HashMap::new());

    clock.advance(Duration::from_secs(31));
    clients.update_heartbeat(&ClientId::new("survivor"));

    let swept = clients.cleanup_dead_clients();
    assert_eq!(swept, vec![dying.client_id]);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert_eq!(clients.client_count(), 1);
}

#[test]
fn test_clear_all_skips_callbacks() {
    let clock = ManualClock::new();
    let clients = manager(&clock);
    let fired = Arc::new(AtomicUsize::new(0));
    {
        let fired = Arc::clone(&fired);
        clients.register_cleanup_callback(Box::new(move |_info| {
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    clients.register_client(None, own_pid(), HashMap::new());
    clients.register_client(None, own_pid(), HashMap::new());
    assert_eq!(clients.clear_all_clients(), 2);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
}
