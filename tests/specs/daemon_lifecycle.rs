//! Daemon start/stop lifecycle.

use crate::prelude::*;
use std::time::Duration;

#[test]
fn start_creates_pid_status_and_lock_files() {
    let world = World::new();
    world.start_daemon();

    let pid = world.daemon_pid().unwrap();
    assert!(pid_alive(pid));
    assert!(world.daemon_dir.join("fbuild_daemon.lock").exists());
    assert!(world.daemon_dir.join("daemon.log").exists());

    let status = world.wait_for_status(Duration::from_secs(5), |s| s["state"] == "idle");
    assert_eq!(status["daemon_pid"], pid);
}

#[test]
fn second_start_attaches_to_running_daemon() {
    let world = World::new();
    world.start_daemon();
    let pid = world.daemon_pid().unwrap();

    let output = world.fbuild().args(["daemon", "start"]).output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("already running"), "{stdout}");
    assert_eq!(world.daemon_pid(), Some(pid));
}

#[test]
fn stop_terminates_daemon_and_clears_pid() {
    let world = World::new();
    world.start_daemon();
    let pid = world.daemon_pid().unwrap();

    let output = world.fbuild().args(["daemon", "stop"]).output().unwrap();
    assert!(output.status.success());

    // Graceful shutdown removes the PID file
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if !pid_alive(pid) && world.daemon_pid().is_none() {
            return;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    panic!("daemon did not stop cleanly");
}

#[test]
fn status_without_daemon_reports_not_running() {
    let world = World::new();
    let output = world.fbuild().arg("status").output().unwrap();
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("not running"));
}
