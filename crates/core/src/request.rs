// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request data model for the daemon protocol.
//!
//! Clients drop one JSON document per request into the daemon directory
//! (`build_request.json`, `deploy_request.json`, ...). Every request carries
//! the same [`RequestMeta`] identification block plus kind-specific fields.

use crate::id::RequestId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Shared identification fields carried by every request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestMeta {
    /// Absolute path to the project being operated on
    pub project_dir: PathBuf,
    /// Build profile name from the project config (e.g. `uno`, `esp32dev`)
    pub environment: String,
    /// PID of the requesting client process
    pub caller_pid: u32,
    /// Directory the client was invoked from
    pub caller_cwd: PathBuf,
    /// Unique request identifier, also names the cancel signal file
    pub request_id: RequestId,
}

/// Build request: compile the project without touching any device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildRequest {
    #[serde(flatten)]
    pub meta: RequestMeta,
    /// Remove build artifacts before compiling
    #[serde(default)]
    pub clean_build: bool,
    #[serde(default)]
    pub verbose: bool,
    /// Compilation worker override (None = daemon default)
    #[serde(default)]
    pub jobs: Option<usize>,
}

/// Deploy request: build, flash, and optionally monitor afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(flatten)]
    pub meta: RequestMeta,
    /// Target serial port (None = auto-detect by the flasher)
    #[serde(default)]
    pub port: Option<String>,
    #[serde(default)]
    pub clean_build: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub jobs: Option<usize>,
    /// Start a monitor session after a successful upload
    #[serde(default)]
    pub monitor_after: bool,
    #[serde(default)]
    pub monitor_halt_on_error: Option<String>,
    #[serde(default)]
    pub monitor_halt_on_success: Option<String>,
    #[serde(default)]
    pub monitor_expect: Option<String>,
    /// Monitor wall-clock timeout in seconds
    #[serde(default)]
    pub monitor_timeout: Option<u64>,
}

/// Monitor request: stream serial output, optionally pattern-matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorRequest {
    #[serde(flatten)]
    pub meta: RequestMeta,
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
    #[serde(default)]
    pub halt_on_error: Option<String>,
    #[serde(default)]
    pub halt_on_success: Option<String>,
    #[serde(default)]
    pub expect: Option<String>,
    /// Wall-clock timeout in seconds (None = monitor until halted)
    #[serde(default)]
    pub timeout: Option<u64>,
}

fn default_baud() -> u32 {
    115_200
}

/// Install-dependencies request: drive the package download pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstallDepsRequest {
    #[serde(flatten)]
    pub meta: RequestMeta,
    #[serde(default)]
    pub verbose: bool,
}

/// Serial monitor API: attach a client to a shared port session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialAttachRequest {
    pub client_id: String,
    pub caller_pid: u32,
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud_rate: u32,
}

/// Serial monitor API: detach a client from its session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialDetachRequest {
    pub client_id: String,
    pub port: String,
}

/// Serial monitor API: poll for bytes after a previously seen sequence number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialPollRequest {
    pub client_id: String,
    pub port: String,
    #[serde(default)]
    pub last_seen_seq: u64,
}

/// A parsed request of any kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Build(BuildRequest),
    Deploy(DeployRequest),
    Monitor(MonitorRequest),
    InstallDeps(InstallDepsRequest),
    SerialAttach(SerialAttachRequest),
    SerialDetach(SerialDetachRequest),
    SerialPoll(SerialPollRequest),
}

impl Request {
    /// Shared meta block, when the request kind carries one.
    pub fn meta(&self) -> Option<&RequestMeta> {
        match self {
            Request::Build(r) => Some(&r.meta),
            Request::Deploy(r) => Some(&r.meta),
            Request::Monitor(r) => Some(&r.meta),
            Request::InstallDeps(r) => Some(&r.meta),
            Request::SerialAttach(_) | Request::SerialDetach(_) | Request::SerialPoll(_) => None,
        }
    }

    /// Request ID for operations that own one.
    pub fn request_id(&self) -> Option<&RequestId> {
        self.meta().map(|m| &m.request_id)
    }
}

#[cfg(test)]
#[path = "request_tests.rs"]
mod tests;
