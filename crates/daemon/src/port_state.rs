// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Published per-port state.
//!
//! A coarse, user-visible map of what each port is doing. The real
//! serialization is the port lock; this map exists so status queries can
//! say *who* holds a port and *why*.

use fb_core::{OperationId, PortActivity, PortStatus};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;

/// Thread-safe `port -> PortStatus` map.
#[derive(Default)]
pub struct PortStateManager {
    states: Mutex<BTreeMap<String, PortStatus>>,
}

impl PortStateManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a port as busy with an operation.
    pub fn set_busy(
        &self,
        port: &str,
        activity: PortActivity,
        client_pid: u32,
        project_dir: &Path,
        environment: &str,
        operation_id: &OperationId,
    ) {
        self.states.lock().insert(
            port.to_string(),
            PortStatus {
                state: activity,
                client_pid: Some(client_pid),
                project_dir: Some(project_dir.to_path_buf()),
                environment: Some(environment.to_string()),
                operation_id: Some(operation_id.clone()),
            },
        );
    }

    /// Return a port to idle.
    pub fn set_idle(&self, port: &str) {
        self.states
            .lock()
            .insert(port.to_string(), PortStatus::idle());
    }

    pub fn get(&self, port: &str) -> PortStatus {
        self.states
            .lock()
            .get(port)
            .cloned()
            .unwrap_or_else(PortStatus::idle)
    }

    /// Snapshot of every known port.
    pub fn all(&self) -> BTreeMap<String, PortStatus> {
        self.states.lock().clone()
    }

    /// Drop ports that are idle (status housekeeping).
    pub fn prune_idle(&self) -> usize {
        let mut states = self.states.lock();
        let before = states.len();
        states.retain(|_, status| status.state != PortActivity::Idle);
        before - states.len()
    }
}

#[cfg(test)]
#[path = "port_state_tests.rs"]
mod tests;
