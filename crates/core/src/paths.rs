// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Well-known daemon file locations.
//!
//! One daemon serves all projects for a user. Its files live under
//! `~/.fbuild/daemon/`, or `~/.fbuild/daemon_dev/` when `FBUILD_DEV_MODE=1`
//! isolates a development daemon from the production one.
//! `FBUILD_DAEMON_DIR` overrides both (used by tests for isolation).

use crate::id::RequestId;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors resolving the daemon directory.
#[derive(Debug, Error)]
pub enum PathsError {
    #[error("Could not determine home directory")]
    NoHomeDir,
}

/// Check if development mode is enabled.
pub fn is_dev_mode() -> bool {
    std::env::var("FBUILD_DEV_MODE").map(|v| v == "1").unwrap_or(false)
}

/// Resolved paths for every daemon file.
#[derive(Debug, Clone)]
pub struct DaemonPaths {
    dir: PathBuf,
}

impl DaemonPaths {
    /// Resolve the daemon directory from the environment.
    pub fn resolve() -> Result<Self, PathsError> {
        if let Ok(dir) = std::env::var("FBUILD_DAEMON_DIR") {
            return Ok(Self { dir: PathBuf::from(dir) });
        }

        let home = dirs::home_dir().ok_or(PathsError::NoHomeDir)?;
        let dir = if is_dev_mode() {
            home.join(".fbuild").join("daemon_dev")
        } else {
            home.join(".fbuild").join("daemon")
        };
        Ok(Self { dir })
    }

    /// Use an explicit directory (tests, embedded setups).
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn pid_file(&self) -> PathBuf {
        self.dir.join("fbuild_daemon.pid")
    }

    pub fn lock_file(&self) -> PathBuf {
        self.dir.join("fbuild_daemon.lock")
    }

    pub fn status_file(&self) -> PathBuf {
        self.dir.join("daemon_status.json")
    }

    pub fn log_file(&self) -> PathBuf {
        self.dir.join("daemon.log")
    }

    pub fn file_cache(&self) -> PathBuf {
        self.dir.join("file_cache.json")
    }

    pub fn firmware_ledger(&self) -> PathBuf {
        self.dir.join("firmware_ledger.json")
    }

    pub fn build_request(&self) -> PathBuf {
        self.dir.join("build_request.json")
    }

    pub fn deploy_request(&self) -> PathBuf {
        self.dir.join("deploy_request.json")
    }

    pub fn monitor_request(&self) -> PathBuf {
        self.dir.join("monitor_request.json")
    }

    pub fn install_deps_request(&self) -> PathBuf {
        self.dir.join("install_deps_request.json")
    }

    pub fn serial_attach_request(&self) -> PathBuf {
        self.dir.join("serial_monitor_attach_request.json")
    }

    pub fn serial_detach_request(&self) -> PathBuf {
        self.dir.join("serial_monitor_detach_request.json")
    }

    pub fn serial_poll_request(&self) -> PathBuf {
        self.dir.join("serial_monitor_poll_request.json")
    }

    pub fn serial_response(&self) -> PathBuf {
        self.dir.join("serial_monitor_response.json")
    }

    /// Cancellation signal file for one request.
    pub fn cancel_signal(&self, request_id: &RequestId) -> PathBuf {
        self.dir.join(format!("cancel_{}.signal", request_id))
    }
}

/// Project-relative output directory (`<project>/.fbuild/`).
pub fn project_out_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(".fbuild")
}

/// Monitor line output file for a project.
pub fn monitor_output_file(project_dir: &Path) -> PathBuf {
    project_out_dir(project_dir).join("monitor_output.txt")
}

/// Monitor final summary file for a project.
pub fn monitor_summary_file(project_dir: &Path) -> PathBuf {
    project_out_dir(project_dir).join("monitor_summary.json")
}

#[cfg(test)]
#[path = "paths_tests.rs"]
mod tests;
