// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status snapshot persistence.
//!
//! Clients poll `daemon_status.json` to follow operation progress, so every
//! write must be atomic and every read must tolerate a missing or damaged
//! file by falling back to an Idle default.

use crate::atomic::{load_json, save_json_atomic, AtomicIoError};
use fb_core::StatusSnapshot;
use std::path::{Path, PathBuf};

/// Reader/writer for the daemon status document.
#[derive(Debug, Clone)]
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Atomically replace the status document.
    pub fn write(&self, snapshot: &StatusSnapshot) -> Result<(), AtomicIoError> {
        save_json_atomic(&self.path, snapshot)
    }

    /// Read the status document, or an Idle default if absent/corrupt.
    pub fn read_or_default(&self) -> StatusSnapshot {
        match load_json::<StatusSnapshot>(&self.path) {
            Ok(Some(snapshot)) => snapshot,
            _ => StatusSnapshot::idle(0, 0),
        }
    }

    /// Read the status document if present and well-formed.
    pub fn read(&self) -> Result<Option<StatusSnapshot>, AtomicIoError> {
        load_json(&self.path)
    }
}

#[cfg(test)]
#[path = "status_file_tests.rs"]
mod tests;
