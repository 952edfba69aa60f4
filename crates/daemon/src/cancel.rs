// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cooperative cancellation.
//!
//! Two sources: a `cancel_<request_id>.signal` file created by the client,
//! and death of the caller process. Checks are cached for a short TTL so
//! phase-boundary polling doesn't hammer the filesystem. Operation kinds
//! are classified cancellable or continue: aborting a dependency download
//! midway is worse than finishing it, and a deploy that has started
//! flashing must not leave the device half-written.

use fb_core::paths::DaemonPaths;
use fb_core::{CancelSource, OperationKind, RequestId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info};

/// Cache TTL for cancellation checks.
const CHECK_TTL: Duration = Duration::from_millis(100);

/// Result of a cancellation check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCheck {
    NotCancelled,
    /// The signal file exists
    SignalFile,
    /// The caller process is gone
    ProcessDead,
}

impl CancelCheck {
    pub fn source(&self) -> Option<CancelSource> {
        match self {
            CancelCheck::NotCancelled => None,
            CancelCheck::SignalFile => Some(CancelSource::SignalFile),
            CancelCheck::ProcessDead => Some(CancelSource::ProcessDead),
        }
    }
}

/// Whether an operation phase honors cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    Cancellable,
    /// Finishing is safer than aborting
    Continue,
}

impl CancelPolicy {
    /// Default classification per operation kind. Deploy starts cancellable
    /// and flips to Continue once its upload phase begins.
    pub fn for_kind(kind: OperationKind) -> Self {
        match kind {
            OperationKind::InstallDeps => CancelPolicy::Continue,
            OperationKind::Build | OperationKind::Deploy | OperationKind::Monitor => {
                CancelPolicy::Cancellable
            }
        }
    }
}

/// The typed "operation cancelled" failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("operation cancelled ({source})")]
pub struct CancelledError {
    pub source: CancelSource,
}

/// Signal-file and caller-liveness cancellation checks with a TTL cache.
pub struct CancellationRegistry {
    paths: DaemonPaths,
    cache: Mutex<HashMap<RequestId, (Instant, CancelCheck)>>,
}

impl CancellationRegistry {
    pub fn new(paths: DaemonPaths) -> Self {
        Self {
            paths,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Check both cancellation sources, serving cached results within the
    /// TTL. Once a cancellation is observed it stays observed.
    pub fn check_cancellation(&self, request_id: &RequestId, caller_pid: u32) -> CancelCheck {
        {
            let cache = self.cache.lock();
            if let Some((at, result)) = cache.get(request_id) {
                if *result != CancelCheck::NotCancelled || at.elapsed() < CHECK_TTL {
                    return *result;
                }
            }
        }

        let result = if self.paths.cancel_signal(request_id).exists() {
            CancelCheck::SignalFile
        } else if !fb_adapters::pid_alive(caller_pid) {
            CancelCheck::ProcessDead
        } else {
            CancelCheck::NotCancelled
        };

        if result != CancelCheck::NotCancelled {
            debug!(request = %request_id, ?result, "cancellation detected");
        }
        self.cache
            .lock()
            .insert(request_id.clone(), (Instant::now(), result));
        result
    }

    /// Raise the typed cancellation failure when the phase is cancellable.
    ///
    /// Continue-class phases observe cancellation but keep going.
    pub fn check_and_raise_if_cancelled(
        &self,
        request_id: &RequestId,
        caller_pid: u32,
        policy: CancelPolicy,
    ) -> Result<(), CancelledError> {
        let check = self.check_cancellation(request_id, caller_pid);
        match (policy, check.source()) {
            (CancelPolicy::Cancellable, Some(source)) => {
                info!(request = %request_id, %source, "cancelling operation");
                Err(CancelledError { source })
            }
            _ => Ok(()),
        }
    }

    /// Remove the signal file and cached verdict once a cancellation has
    /// been handled.
    pub fn clear(&self, request_id: &RequestId) {
        let signal = self.paths.cancel_signal(request_id);
        if signal.exists() {
            let _ = std::fs::remove_file(&signal);
        }
        self.cache.lock().remove(request_id);
    }
}

#[cfg(test)]
#[path = "cancel_tests.rs"]
mod tests;
