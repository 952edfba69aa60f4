// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Firmware ledger: what firmware is currently on each port.
//!
//! The deploy processor consults this to skip re-flashing a device that
//! already runs the exact firmware being deployed. Entries go stale after
//! 24 hours because devices get re-flashed out-of-band (other tools, other
//! machines) and the cost of a wrong skip is much higher than the cost of
//! a redundant upload.

use crate::atomic::{load_json, save_json_atomic, AtomicIoError};
use chrono::{DateTime, Utc};
use fb_core::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Age after which a ledger entry is no longer trusted.
pub const STALE_AFTER_SECS: u64 = 24 * 60 * 60;

/// What was last uploaded to one port.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirmwareEntry {
    pub firmware_hash: String,
    pub source_hash: String,
    pub project_dir: PathBuf,
    pub environment: String,
    /// Epoch seconds of the upload
    pub upload_timestamp: u64,
    pub build_flags_hash: String,
    /// Wall-clock upload time, for humans reading the ledger file
    #[serde(default)]
    pub uploaded_at: Option<DateTime<Utc>>,
}

/// Persistent `port -> FirmwareEntry` map.
pub struct FirmwareLedger<C: Clock> {
    ledger_path: PathBuf,
    clock: C,
    entries: Mutex<HashMap<String, FirmwareEntry>>,
}

impl<C: Clock> FirmwareLedger<C> {
    /// Load the ledger, resetting it if the file is corrupt (soft failure).
    pub fn load(ledger_path: PathBuf, clock: C) -> Self {
        let entries = match load_json::<HashMap<String, FirmwareEntry>>(&ledger_path) {
            Ok(Some(map)) => {
                debug!(entries = map.len(), "loaded firmware ledger");
                map
            }
            Ok(None) => HashMap::new(),
            Err(e) => {
                warn!(error = %e, path = %ledger_path.display(), "failed to load firmware ledger, resetting");
                HashMap::new()
            }
        };

        Self {
            ledger_path,
            clock,
            entries: Mutex::new(entries),
        }
    }

    /// Record a successful upload.
    pub fn record_deployment(
        &self,
        port: &str,
        firmware_hash: impl Into<String>,
        source_hash: impl Into<String>,
        project_dir: &Path,
        environment: &str,
        build_flags_hash: impl Into<String>,
    ) -> Result<(), AtomicIoError> {
        let entry = FirmwareEntry {
            firmware_hash: firmware_hash.into(),
            source_hash: source_hash.into(),
            project_dir: project_dir.to_path_buf(),
            environment: environment.to_string(),
            upload_timestamp: self.clock.epoch_secs(),
            build_flags_hash: build_flags_hash.into(),
            uploaded_at: Some(Utc::now()),
        };

        info!(port, firmware_hash = %entry.firmware_hash.get(..12).unwrap_or(&entry.firmware_hash), "recording deployment");
        let snapshot = {
            let mut entries = self.entries.lock();
            entries.insert(port.to_string(), entry);
            entries.clone()
        };
        save_json_atomic(&self.ledger_path, &snapshot)
    }

    /// True if `port` verifiably runs `firmware_hash` and the record is fresh.
    pub fn is_current(&self, port: &str, firmware_hash: &str) -> bool {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(port) else {
            return false;
        };

        entry.firmware_hash == firmware_hash && !self.is_stale(entry)
    }

    /// Whether a deploy must actually flash the device.
    ///
    /// Redeploy is required when the source hash, build-flags hash, project,
    /// or environment differs from the recorded upload, or when the record
    /// is missing or stale.
    pub fn needs_redeploy(
        &self,
        port: &str,
        source_hash: &str,
        build_flags_hash: &str,
        project_dir: Option<&Path>,
        environment: Option<&str>,
    ) -> bool {
        let entries = self.entries.lock();
        let Some(entry) = entries.get(port) else {
            return true;
        };

        if self.is_stale(entry) {
            return true;
        }
        if entry.source_hash != source_hash {
            return true;
        }
        if entry.build_flags_hash != build_flags_hash {
            return true;
        }
        if let Some(project) = project_dir {
            if entry.project_dir != project {
                return true;
            }
        }
        if let Some(env) = environment {
            if entry.environment != env {
                return true;
            }
        }

        false
    }

    /// Entry for one port, if recorded.
    pub fn get_entry(&self, port: &str) -> Option<FirmwareEntry> {
        self.entries.lock().get(port).cloned()
    }

    /// Forget one port.
    pub fn clear(&self, port: &str) -> Result<(), AtomicIoError> {
        let removed = self.entries.lock().remove(port).is_some();
        if removed {
            let snapshot = self.entries.lock().clone();
            save_json_atomic(&self.ledger_path, &snapshot)?;
        }
        Ok(())
    }

    /// Forget everything.
    pub fn clear_all(&self) -> Result<(), AtomicIoError> {
        self.entries.lock().clear();
        save_json_atomic(&self.ledger_path, &HashMap::<String, FirmwareEntry>::new())
    }

    /// Drop entries older than `threshold_secs`. Returns how many were removed.
    pub fn clear_stale(&self, threshold_secs: u64) -> Result<usize, AtomicIoError> {
        let now = self.clock.epoch_secs();
        let removed = {
            let mut entries = self.entries.lock();
            let before = entries.len();
            entries.retain(|_, e| now.saturating_sub(e.upload_timestamp) <= threshold_secs);
            before - entries.len()
        };

        if removed > 0 {
            let snapshot = self.entries.lock().clone();
            save_json_atomic(&self.ledger_path, &snapshot)?;
            info!(removed, "cleared stale firmware ledger entries");
        }
        Ok(removed)
    }

    fn is_stale(&self, entry: &FirmwareEntry) -> bool {
        let now = self.clock.epoch_secs();
        now.saturating_sub(entry.upload_timestamp) > STALE_AFTER_SECS
    }
}

#[cfg(test)]
#[path = "ledger_tests.rs"]
mod tests;
