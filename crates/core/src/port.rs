// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Published per-port state, visible through the status snapshot.

use crate::id::OperationId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Coarse activity state of one serial port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortActivity {
    Idle,
    Uploading,
    Monitoring,
}

impl fmt::Display for PortActivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortActivity::Idle => write!(f, "idle"),
            PortActivity::Uploading => write!(f, "uploading"),
            PortActivity::Monitoring => write!(f, "monitoring"),
        }
    }
}

/// Published record for one port: who is doing what to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortStatus {
    pub state: PortActivity,
    #[serde(default)]
    pub client_pid: Option<u32>,
    #[serde(default)]
    pub project_dir: Option<PathBuf>,
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub operation_id: Option<OperationId>,
}

impl PortStatus {
    pub fn idle() -> Self {
        Self {
            state: PortActivity::Idle,
            client_pid: None,
            project_dir: None,
            environment: None,
            operation_id: None,
        }
    }
}

impl Default for PortStatus {
    fn default() -> Self {
        Self::idle()
    }
}
