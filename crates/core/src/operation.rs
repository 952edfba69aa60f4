// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operation model: the live record of one accepted request.

use crate::clock::Clock;
use crate::id::{OperationId, RequestId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Kind of daemon operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Build,
    Deploy,
    Monitor,
    InstallDeps,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Build => write!(f, "build"),
            OperationKind::Deploy => write!(f, "deploy"),
            OperationKind::Monitor => write!(f, "monitor"),
            OperationKind::InstallDeps => write!(f, "install_deps"),
        }
    }
}

/// State of a daemon operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl OperationState {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationState::Completed | OperationState::Failed | OperationState::Cancelled
        )
    }

    /// Queued or Running.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationState::Queued => write!(f, "queued"),
            OperationState::Running => write!(f, "running"),
            OperationState::Completed => write!(f, "completed"),
            OperationState::Failed => write!(f, "failed"),
            OperationState::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Tracks one accepted request through its lifecycle.
///
/// Created on acceptance in `Queued`, moved to `Running` once the required
/// locks are held, and finally to a terminal state when the processor
/// returns. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub operation_id: OperationId,
    pub kind: OperationKind,
    pub project_dir: PathBuf,
    pub environment: String,
    pub state: OperationState,
    pub request_id: RequestId,
    pub caller_pid: u32,
    pub created_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    pub error_message: Option<String>,
    /// IDs of watchdog subprocess executions spawned for this operation
    #[serde(default)]
    pub subprocess_ids: Vec<String>,
    /// IDs of compilation jobs submitted for this operation
    #[serde(default)]
    pub compilation_job_ids: Vec<String>,
}

impl Operation {
    pub fn new(
        operation_id: OperationId,
        kind: OperationKind,
        project_dir: PathBuf,
        environment: impl Into<String>,
        request_id: RequestId,
        caller_pid: u32,
        clock: &impl Clock,
    ) -> Self {
        Self {
            operation_id,
            kind,
            project_dir,
            environment: environment.into(),
            state: OperationState::Queued,
            request_id,
            caller_pid,
            created_at: clock.epoch_ms(),
            started_at: None,
            completed_at: None,
            error_message: None,
            subprocess_ids: Vec::new(),
            compilation_job_ids: Vec::new(),
        }
    }

    /// Duration in milliseconds, if the operation has started and finished.
    pub fn duration_ms(&self) -> Option<u64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "operation_tests.rs"]
mod tests;
