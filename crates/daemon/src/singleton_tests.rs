// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use fb_core::paths::DaemonPaths;
use serial_test::serial;
use tempfile::tempdir;

fn manager(dir: &std::path::Path) -> SingletonManager {
    SingletonManager::new(DaemonPaths::in_dir(dir))
}

#[test]
fn test_read_pid_absent() {
    let dir = tempdir().unwrap();
    assert_eq!(manager(dir.path()).read_pid(), None);
}

#[test]
fn test_corrupt_pid_file_treated_as_absent() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    std::fs::write(mgr.pid_file_path(), "not a pid\n").unwrap();
    assert_eq!(mgr.read_pid(), None);
    assert!(!mgr.is_alive());
}

#[test]
fn test_stale_pid_file_not_alive() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());

    // Spawn and reap a process so its PID is definitely dead
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();

    std::fs::write(mgr.pid_file_path(), format!("{dead_pid}\n")).unwrap();
    assert_eq!(mgr.read_pid(), Some(dead_pid));
    assert!(!mgr.is_alive());
}

#[test]
fn test_acquire_writes_own_pid_atomically() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());

    let lock = mgr.acquire().unwrap();
    assert_eq!(mgr.read_pid(), Some(std::process::id()));
    assert!(mgr.is_alive());
    assert!(!mgr.pid_file_path().with_extension("tmp").exists());

    lock.remove_pid_file();
    assert_eq!(mgr.read_pid(), None);
}

#[test]
fn test_second_acquire_fails_while_lock_held() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());

    let _lock = mgr.acquire().unwrap();
    let second = manager(dir.path());
    assert!(matches!(
        second.acquire(),
        Err(SingletonError::AlreadyRunning)
    ));
}

#[test]
fn test_spawn_or_attach_sees_running_daemon() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());

    // Pretend this test process is the daemon
    let _lock = mgr.acquire().unwrap();

    let outcome = mgr.spawn_or_attach(std::path::Path::new("/nonexistent/fbuildd"), 1234);
    assert_eq!(
        outcome,
        SpawnOutcome::AlreadyRunning {
            pid: std::process::id()
        }
    );
}

#[test]
fn test_spawn_or_attach_accepts_pid_mismatch() {
    // The launcher must accept any live PID in the file, not just the
    // process it spawned. Simulate a wrapper by writing a different live
    // PID (our own) before calling spawn_or_attach with a daemon binary
    // that does nothing.
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());
    std::fs::write(mgr.pid_file_path(), format!("{}\n", std::process::id())).unwrap();

    let outcome = mgr.spawn_or_attach(std::path::Path::new("/nonexistent/fbuildd"), 42);
    assert_eq!(
        outcome,
        SpawnOutcome::AlreadyRunning {
            pid: std::process::id()
        }
    );
}

#[test]
#[serial]
fn test_spawn_or_attach_failure_when_daemon_never_starts() {
    let dir = tempdir().unwrap();
    let mgr = manager(dir.path());

    // `true` exits immediately without writing a PID file. Shrink the
    // window by pre-creating a stale PID file pointing at a dead process;
    // the launcher must clear it, spawn, then time out waiting.
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    std::fs::write(mgr.pid_file_path(), format!("{dead_pid}\n")).unwrap();

    std::env::set_var("FBUILD_ATTACH_TIMEOUT_SECS", "1");
    let outcome = mgr.spawn_or_attach(std::path::Path::new("true"), 42);
    std::env::remove_var("FBUILD_ATTACH_TIMEOUT_SECS");
    assert!(matches!(outcome, SpawnOutcome::Failed { .. }));
    // The stale PID file was cleared by the winner
    assert_eq!(mgr.read_pid(), None);
}

#[test]
fn test_publish_startup_failure_observable() {
    let dir = tempdir().unwrap();
    let paths = DaemonPaths::in_dir(dir.path());
    publish_startup_failure(&paths, "lock directory unwritable");

    let status = fb_storage::StatusFile::new(paths.status_file()).read_or_default();
    assert_eq!(status.state, fb_core::DaemonState::Failed);
    assert!(status.message.contains("lock directory unwritable"));
}

#[test]
fn test_publish_startup_failure_skips_when_live_daemon_owns_directory() {
    // A spawn-race loser must not overwrite the winner's status file
    let dir = tempdir().unwrap();
    let paths = DaemonPaths::in_dir(dir.path());

    // The "winner" is another live process, distinct from this one
    let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
    let winner_pid = child.id();
    std::fs::write(paths.pid_file(), format!("{winner_pid}\n")).unwrap();

    let winner_status = fb_core::StatusSnapshot::idle(winner_pid, 1);
    fb_storage::StatusFile::new(paths.status_file())
        .write(&winner_status)
        .unwrap();

    publish_startup_failure(&paths, "loser could not bind");

    let status = fb_storage::StatusFile::new(paths.status_file()).read_or_default();
    assert_eq!(status.state, fb_core::DaemonState::Idle);
    assert_eq!(status.daemon_pid, winner_pid);

    let _ = child.kill();
    let _ = child.wait();
}

#[test]
fn test_publish_startup_failure_writes_over_stale_pid() {
    // A dead "winner" doesn't suppress the failure report
    let dir = tempdir().unwrap();
    let paths = DaemonPaths::in_dir(dir.path());

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    std::fs::write(paths.pid_file(), format!("{dead_pid}\n")).unwrap();

    publish_startup_failure(&paths, "lock directory unwritable");

    let status = fb_storage::StatusFile::new(paths.status_file()).read_or_default();
    assert_eq!(status.state, fb_core::DaemonState::Failed);
}
