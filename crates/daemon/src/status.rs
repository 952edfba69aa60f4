// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status manager: the daemon's published state.
//!
//! Composes the coarse daemon state, the port-state map, and lock counters
//! into `daemon_status.json`. A single internal mutex totally orders the
//! writes, so clients polling the file see a consistent progression.

use crate::locks::ResourceLockManager;
use crate::port_state::PortStateManager;
use fb_core::{Clock, DaemonState, StatusSnapshot};
use fb_storage::StatusFile;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::warn;

/// Writes the daemon status snapshot.
pub struct StatusManager<C: Clock> {
    clock: C,
    file: StatusFile,
    daemon_pid: u32,
    daemon_started_at: u64,
    port_states: Arc<PortStateManager>,
    locks: Arc<ResourceLockManager<C>>,
    /// Serializes writes so status transitions are totally ordered
    write_lock: Mutex<()>,
}

impl<C: Clock> StatusManager<C> {
    pub fn new(
        clock: C,
        file: StatusFile,
        daemon_pid: u32,
        daemon_started_at: u64,
        port_states: Arc<PortStateManager>,
        locks: Arc<ResourceLockManager<C>>,
    ) -> Self {
        Self {
            clock,
            file,
            daemon_pid,
            daemon_started_at,
            port_states,
            locks,
            write_lock: Mutex::new(()),
        }
    }

    /// Publish a new status snapshot.
    pub fn update(
        &self,
        state: DaemonState,
        message: impl Into<String>,
        current_operation: Option<String>,
        operation_in_progress: bool,
    ) {
        let _ordered = self.write_lock.lock();

        let snapshot = StatusSnapshot {
            state,
            message: message.into(),
            current_operation,
            daemon_pid: self.daemon_pid,
            daemon_started_at: self.daemon_started_at,
            updated_at: self.clock.epoch_secs(),
            operation_in_progress,
            port_states: self.port_states.all(),
            lock_status: self.locks.get_lock_status(),
        };

        if let Err(e) = self.file.write(&snapshot) {
            warn!(error = %e, "failed to write status file");
        }
    }

    /// Current published status (Idle default when unreadable).
    pub fn read(&self) -> StatusSnapshot {
        self.file.read_or_default()
    }
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
