// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation registry: structured tracking of every accepted request.
//!
//! Replaces a bare "busy" flag. Operations move Queued → Running →
//! terminal; `started_at`/`completed_at` are stamped automatically on those
//! transitions. Terminal operations are retained up to `max_history`,
//! oldest evicted first.

use fb_core::{Clock, Operation, OperationId, OperationState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// Default retained terminal operations.
const DEFAULT_MAX_HISTORY: usize = 100;

/// Counts by state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RegistryStatistics {
    pub total: usize,
    pub queued: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Tracks all daemon operations.
pub struct OperationRegistry<C: Clock> {
    clock: C,
    max_history: usize,
    operations: Mutex<HashMap<OperationId, Operation>>,
}

impl<C: Clock> OperationRegistry<C> {
    pub fn new(clock: C) -> Self {
        Self::with_history(clock, DEFAULT_MAX_HISTORY)
    }

    pub fn with_history(clock: C, max_history: usize) -> Self {
        Self {
            clock,
            max_history,
            operations: Mutex::new(HashMap::new()),
        }
    }

    /// Register a new operation, evicting old terminal ones beyond the cap.
    pub fn register_operation(&self, operation: Operation) -> OperationId {
        let operation_id = operation.operation_id.clone();
        let mut operations = self.operations.lock();
        operations.insert(operation_id.clone(), operation);
        Self::evict_old(&mut operations, self.max_history);
        operation_id
    }

    /// Transition an operation's state, stamping timestamps.
    pub fn update_state(&self, operation_id: &OperationId, state: OperationState) {
        let mut operations = self.operations.lock();
        let Some(op) = operations.get_mut(operation_id) else {
            warn!(operation = %operation_id, "cannot update unknown operation");
            return;
        };

        let old_state = op.state;
        op.state = state;

        if state == OperationState::Running && op.started_at.is_none() {
            op.started_at = Some(self.clock.epoch_ms());
        }
        if state.is_terminal() && op.completed_at.is_none() {
            op.completed_at = Some(self.clock.epoch_ms());
        }

        debug!(operation = %operation_id, from = %old_state, to = %state, "operation state");
    }

    /// Attach a failure message to an operation.
    pub fn set_error(&self, operation_id: &OperationId, message: impl Into<String>) {
        if let Some(op) = self.operations.lock().get_mut(operation_id) {
            op.error_message = Some(message.into());
        }
    }

    /// Link a watchdog execution to its operation.
    pub fn add_subprocess_id(&self, operation_id: &OperationId, execution_id: &str) {
        if let Some(op) = self.operations.lock().get_mut(operation_id) {
            op.subprocess_ids.push(execution_id.to_string());
        }
    }

    /// Link submitted compile jobs to their operation.
    pub fn add_compilation_job_ids(&self, operation_id: &OperationId, job_ids: &[String]) {
        if let Some(op) = self.operations.lock().get_mut(operation_id) {
            op.compilation_job_ids.extend_from_slice(job_ids);
        }
    }

    pub fn get_operation(&self, operation_id: &OperationId) -> Option<Operation> {
        self.operations.lock().get(operation_id).cloned()
    }

    /// Queued and running operations.
    pub fn get_active_operations(&self) -> Vec<Operation> {
        self.operations
            .lock()
            .values()
            .filter(|op| op.state.is_active())
            .cloned()
            .collect()
    }

    pub fn get_operations_by_project(&self, project_dir: &Path) -> Vec<Operation> {
        self.operations
            .lock()
            .values()
            .filter(|op| op.project_dir == project_dir)
            .cloned()
            .collect()
    }

    pub fn is_project_busy(&self, project_dir: &Path) -> bool {
        self.operations
            .lock()
            .values()
            .any(|op| op.project_dir == project_dir && op.state.is_active())
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        let operations = self.operations.lock();
        let mut stats = RegistryStatistics {
            total: operations.len(),
            ..Default::default()
        };
        for op in operations.values() {
            match op.state {
                OperationState::Queued => stats.queued += 1,
                OperationState::Running => stats.running += 1,
                OperationState::Completed => stats.completed += 1,
                OperationState::Failed => stats.failed += 1,
                OperationState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Remove terminal operations, optionally only ones older than
    /// `older_than_secs`. Returns how many were removed.
    pub fn clear_completed(&self, older_than_secs: Option<u64>) -> usize {
        let now = self.clock.epoch_ms();
        let mut operations = self.operations.lock();
        let before = operations.len();
        operations.retain(|_, op| {
            if !op.state.is_terminal() {
                return true;
            }
            match older_than_secs {
                None => false,
                Some(threshold) => {
                    let completed = op.completed_at.unwrap_or(0);
                    now.saturating_sub(completed) <= threshold * 1000
                }
            }
        });
        before - operations.len()
    }

    fn evict_old(operations: &mut HashMap<OperationId, Operation>, max_history: usize) {
        let mut terminal: Vec<(OperationId, u64)> = operations
            .values()
            .filter(|op| op.state.is_terminal())
            .map(|op| (op.operation_id.clone(), op.completed_at.unwrap_or(0)))
            .collect();

        if terminal.len() <= max_history {
            return;
        }

        terminal.sort_by_key(|(_, completed)| *completed);
        let excess = terminal.len() - max_history;
        for (operation_id, _) in terminal.into_iter().take(excess) {
            operations.remove(&operation_id);
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
