// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Named resource locks for ports and project directories.
//!
//! Locks are state records rather than OS mutexes so guards stay `Send` and
//! can be held across await points in processors. Two keys in the same
//! domain never contend; the same key across domains never contends.
//! Records are retained after release so acquisition counters survive for
//! status reporting; `cleanup_unused_locks` prunes idle ones.

use fb_core::{Clock, LockStatusReport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, info};

/// Lock domain. Ordering matters: processors acquire Project before Port,
/// which makes deadlock between two processors impossible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockDomain {
    Project,
    Port,
}

impl fmt::Display for LockDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LockDomain::Project => write!(f, "project"),
            LockDomain::Port => write!(f, "port"),
        }
    }
}

/// Lock errors.
#[derive(Debug, Error)]
pub enum LockError {
    /// Non-blocking acquisition of a held lock. The message carries the
    /// resource name for the UI.
    #[error("{domain} {key} is in use by another operation")]
    Unavailable { domain: LockDomain, key: String },
}

#[derive(Debug, Default)]
struct LockRecord {
    /// Holder token (client or operation ID); None when free
    holder: Option<String>,
    /// Reentrant depth for the current holder
    depth: u32,
    /// Bumped on every force-release so stale guards don't double-release
    generation: u64,
    /// Acquisition attempts, successful or not (status bookkeeping)
    acquisitions: u64,
    /// Epoch ms of the last acquisition attempt
    last_acquired_ms: u64,
}

#[derive(Debug)]
struct Inner {
    records: Mutex<HashMap<(LockDomain, String), LockRecord>>,
    released: Notify,
}

/// Scoped lock guard. Dropping it releases one level of the hold.
#[derive(Debug)]
pub struct ResourceGuard {
    inner: Arc<Inner>,
    domain: LockDomain,
    key: String,
    generation: u64,
}

impl ResourceGuard {
    pub fn domain(&self) -> LockDomain {
        self.domain
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        let mut records = self.inner.records.lock();
        if let Some(record) = records.get_mut(&(self.domain, self.key.clone())) {
            // A force-release (dead client cleanup) may have superseded us
            if record.generation == self.generation && record.depth > 0 {
                record.depth -= 1;
                if record.depth == 0 {
                    record.holder = None;
                }
            }
        }
        drop(records);
        self.inner.released.notify_waiters();
    }
}

/// Per-domain named locks with non-blocking and blocking acquisition.
pub struct ResourceLockManager<C: Clock> {
    inner: Arc<Inner>,
    clock: C,
}

impl<C: Clock> ResourceLockManager<C> {
    pub fn new(clock: C) -> Self {
        Self {
            inner: Arc::new(Inner {
                records: Mutex::new(HashMap::new()),
                released: Notify::new(),
            }),
            clock,
        }
    }

    /// Non-blocking acquire. Fails fast with the resource name when held
    /// by a different holder; reentrant for the same `holder` token.
    pub fn try_acquire(
        &self,
        domain: LockDomain,
        key: &str,
        holder: &str,
    ) -> Result<ResourceGuard, LockError> {
        let mut records = self.inner.records.lock();
        let record = records
            .entry((domain, key.to_string()))
            .or_default();

        record.acquisitions += 1;
        record.last_acquired_ms = self.clock.epoch_ms();

        match &record.holder {
            Some(current) if current != holder => Err(LockError::Unavailable {
                domain,
                key: key.to_string(),
            }),
            _ => {
                record.holder = Some(holder.to_string());
                record.depth += 1;
                debug!(%domain, key, holder, depth = record.depth, "lock acquired");
                Ok(ResourceGuard {
                    inner: Arc::clone(&self.inner),
                    domain,
                    key: key.to_string(),
                    generation: record.generation,
                })
            }
        }
    }

    /// Blocking acquire: waits indefinitely. Callers enforce timeouts
    /// out-of-band.
    pub async fn acquire(
        &self,
        domain: LockDomain,
        key: &str,
        holder: &str,
    ) -> ResourceGuard {
        loop {
            // Register for wakeup before the attempt to avoid a lost notify
            let released = self.inner.released.notified();
            match self.try_acquire(domain, key, holder) {
                Ok(guard) => return guard,
                Err(_) => released.await,
            }
        }
    }

    pub fn acquire_port_lock(&self, port: &str, holder: &str) -> Result<ResourceGuard, LockError> {
        self.try_acquire(LockDomain::Port, port, holder)
    }

    pub fn acquire_project_lock(
        &self,
        project: &str,
        holder: &str,
    ) -> Result<ResourceGuard, LockError> {
        self.try_acquire(LockDomain::Project, project, holder)
    }

    /// True if the key is currently held.
    pub fn is_held(&self, domain: LockDomain, key: &str) -> bool {
        self.inner
            .records
            .lock()
            .get(&(domain, key.to_string()))
            .map(|r| r.holder.is_some())
            .unwrap_or(false)
    }

    /// Force-release every lock held by `holder`. Returns how many were
    /// released. Fired by the client disconnect callback.
    pub fn release_all_client_locks(&self, holder: &str) -> usize {
        let mut released = 0;
        {
            let mut records = self.inner.records.lock();
            for record in records.values_mut() {
                if record.holder.as_deref() == Some(holder) {
                    record.holder = None;
                    record.depth = 0;
                    record.generation += 1;
                    released += 1;
                }
            }
        }
        if released > 0 {
            info!(holder, released, "force-released client locks");
            self.inner.released.notify_waiters();
        }
        released
    }

    /// Remove free lock records not acquired within `older_than_secs`.
    pub fn cleanup_unused_locks(&self, older_than_secs: u64) -> usize {
        let now = self.clock.epoch_ms();
        let mut records = self.inner.records.lock();
        let before = records.len();
        records.retain(|_, record| {
            record.holder.is_some()
                || now.saturating_sub(record.last_acquired_ms) <= older_than_secs * 1000
        });
        before - records.len()
    }

    /// Clear everything. Shutdown only.
    pub fn clear_all(&self) -> usize {
        let mut records = self.inner.records.lock();
        let count = records.len();
        records.clear();
        count
    }

    /// Acquisition counters per domain, for the status file.
    pub fn get_lock_status(&self) -> LockStatusReport {
        let records = self.inner.records.lock();
        let mut report = LockStatusReport::default();
        for ((domain, key), record) in records.iter() {
            match domain {
                LockDomain::Port => {
                    report.port_locks.insert(key.clone(), record.acquisitions);
                }
                LockDomain::Project => {
                    report.project_locks.insert(key.clone(), record.acquisitions);
                }
            }
        }
        report
    }
}

#[cfg(test)]
#[path = "locks_tests.rs"]
mod tests;
