// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon-wide status snapshot, persisted to `daemon_status.json`.

use crate::port::PortStatus;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Coarse daemon state published to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonState {
    Idle,
    Building,
    Deploying,
    Monitoring,
    Installing,
    Completed,
    Failed,
    Unknown,
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonState::Idle => write!(f, "idle"),
            DaemonState::Building => write!(f, "building"),
            DaemonState::Deploying => write!(f, "deploying"),
            DaemonState::Monitoring => write!(f, "monitoring"),
            DaemonState::Installing => write!(f, "installing"),
            DaemonState::Completed => write!(f, "completed"),
            DaemonState::Failed => write!(f, "failed"),
            DaemonState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lock counters published through the status file.
///
/// Maps resource key to the number of completed acquisitions (bookkeeping,
/// not hold state).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LockStatusReport {
    #[serde(default)]
    pub port_locks: BTreeMap<String, u64>,
    #[serde(default)]
    pub project_locks: BTreeMap<String, u64>,
}

/// Complete daemon status document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: DaemonState,
    pub message: String,
    #[serde(default)]
    pub current_operation: Option<String>,
    pub daemon_pid: u32,
    /// Epoch seconds when the daemon started
    pub daemon_started_at: u64,
    /// Epoch seconds when this snapshot was written
    pub updated_at: u64,
    pub operation_in_progress: bool,
    #[serde(default)]
    pub port_states: BTreeMap<String, PortStatus>,
    #[serde(default)]
    pub lock_status: LockStatusReport,
}

impl StatusSnapshot {
    /// Default snapshot used when the status file is absent or unreadable.
    pub fn idle(daemon_pid: u32, daemon_started_at: u64) -> Self {
        Self {
            state: DaemonState::Idle,
            message: String::new(),
            current_operation: None,
            daemon_pid,
            daemon_started_at,
            updated_at: 0,
            operation_in_progress: false,
            port_states: BTreeMap::new(),
            lock_status: LockStatusReport::default(),
        }
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
