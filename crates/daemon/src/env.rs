// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Environment variable configuration for the daemon.

use std::time::Duration;

/// Compilation worker override (`FBUILD_WORKERS`).
pub fn workers() -> Option<usize> {
    std::env::var("FBUILD_WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .filter(|&n| n > 0)
}

/// Request-file poll interval override in milliseconds
/// (`FBUILD_POLL_MS`, default 500).
pub fn poll_interval() -> Duration {
    std::env::var("FBUILD_POLL_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_millis(500))
}

/// Client heartbeat timeout override in seconds
/// (`FBUILD_HEARTBEAT_TIMEOUT_SECS`, default 30).
pub fn heartbeat_timeout() -> Duration {
    std::env::var("FBUILD_HEARTBEAT_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(30))
}

#[cfg(test)]
#[path = "env_tests.rs"]
mod tests;
