// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn test_own_pid_is_alive() {
    assert!(pid_alive(std::process::id()));
}

#[test]
fn test_init_pid_is_alive() {
    // PID 1 always exists; we can't signal it, but EPERM still means alive.
    assert!(pid_alive(1));
}

#[cfg(unix)]
#[test]
fn test_dead_pid_is_not_alive() {
    use std::process::Command;

    let mut child = Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();

    assert!(!pid_alive(pid));
}

#[cfg(unix)]
#[test]
fn test_terminate_with_escalation() {
    use std::process::Command;
    use std::time::Duration;

    let mut child = Command::new("sleep").arg("30").spawn().unwrap();
    let pid = child.id();
    assert!(pid_alive(pid));

    // Reap on a helper thread so the killed child doesn't linger as a zombie
    let reaper = std::thread::spawn(move || {
        let _ = child.wait();
    });

    assert!(terminate_with_escalation(pid, Duration::from_secs(2)));
    reaper.join().unwrap();
    assert!(!pid_alive(pid));
}
