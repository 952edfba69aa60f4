// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process liveness probes and termination.
//!
//! The cancellation registry probes caller PIDs on a hot path (every cache
//! TTL), so liveness is checked in-process with `kill(pid, 0)` rather than
//! by shelling out.

use std::time::{Duration, Instant};

/// True if a process with `pid` exists and is visible to us.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 performs the permission/existence check without delivering
    // anything. EPERM still means the process exists.
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    // No portable cheap probe; report alive so cleanup never fires on a
    // live client. Heartbeat timeouts still catch dead clients.
    true
}

/// Terminate `pid`: SIGTERM, wait up to `grace`, then SIGKILL.
///
/// Returns true once the process is gone.
#[cfg(unix)]
pub fn terminate_with_escalation(pid: u32, grace: Duration) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let target = Pid::from_raw(pid as i32);
    let _ = kill(target, Signal::SIGTERM);

    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        if !pid_alive(pid) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let _ = kill(target, Signal::SIGKILL);
    !pid_alive(pid)
}

#[cfg(not(unix))]
pub fn terminate_with_escalation(_pid: u32, _grace: Duration) -> bool {
    false
}

#[cfg(test)]
#[path = "process_tests.rs"]
mod tests;
