// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test builders shared across crates' tests.

use crate::id::RequestId;
use crate::request::{BuildRequest, DeployRequest, MonitorRequest, RequestMeta};
use std::path::PathBuf;

/// Meta block pointing at a throwaway project.
pub fn meta(project_dir: impl Into<PathBuf>, request_id: &str) -> RequestMeta {
    RequestMeta {
        project_dir: project_dir.into(),
        environment: "uno".to_string(),
        caller_pid: std::process::id(),
        caller_cwd: PathBuf::from("/tmp"),
        request_id: RequestId::new(request_id),
    }
}

pub fn build_request(project_dir: impl Into<PathBuf>, request_id: &str) -> BuildRequest {
    BuildRequest {
        meta: meta(project_dir, request_id),
        clean_build: false,
        verbose: false,
        jobs: None,
    }
}

pub fn deploy_request(
    project_dir: impl Into<PathBuf>,
    request_id: &str,
    port: Option<&str>,
) -> DeployRequest {
    DeployRequest {
        meta: meta(project_dir, request_id),
        port: port.map(str::to_string),
        clean_build: false,
        verbose: false,
        jobs: None,
        monitor_after: false,
        monitor_halt_on_error: None,
        monitor_halt_on_success: None,
        monitor_expect: None,
        monitor_timeout: None,
    }
}

pub fn monitor_request(
    project_dir: impl Into<PathBuf>,
    request_id: &str,
    port: &str,
) -> MonitorRequest {
    MonitorRequest {
        meta: meta(project_dir, request_id),
        port: port.to_string(),
        baud_rate: 115_200,
        halt_on_error: None,
        halt_on_success: None,
        expect: None,
        timeout: None,
    }
}
