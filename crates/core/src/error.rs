// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Failure taxonomy surfaced to clients.
//!
//! Subsystems carry their own `thiserror` enums; processors translate those
//! into one of these kinds with a one-line human message before the status
//! manager publishes it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which watchdog bound a timed-out subprocess hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutBound {
    /// Total wall-clock limit exceeded
    Total,
    /// No stdout/stderr output for the inactivity window
    Inactivity,
}

impl fmt::Display for TimeoutBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutBound::Total => write!(f, "total"),
            TimeoutBound::Inactivity => write!(f, "inactivity"),
        }
    }
}

/// Why an operation was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelSource {
    /// The client created `cancel_<request_id>.signal`
    SignalFile,
    /// The caller process died
    ProcessDead,
}

impl fmt::Display for CancelSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelSource::SignalFile => write!(f, "cancelled by user"),
            CancelSource::ProcessDead => write!(f, "client process died"),
        }
    }
}

impl std::error::Error for CancelSource {}

/// User-visible failure kinds carried on the request/response channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureKind {
    /// Non-blocking acquire on a held lock; names the busy resource
    LockUnavailable { resource: String },
    /// Port occupied by a user operation; carries the port's published state
    ResourceBusy { port: String, state: String },
    SubprocessFailed {
        exit_code: i32,
        phase: String,
        stderr: String,
    },
    SubprocessTimedOut {
        bound: TimeoutBound,
        phase: String,
    },
    Cancelled { source: CancelSource },
    DaemonStartupFailed { message: String },
    ConfigInvalid { message: String },
    PortNotFound { port: String },
    PortPermissionDenied { port: String },
    FirmwareLedgerCorrupt { port: String },
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::LockUnavailable { resource } => {
                write!(f, "{} is in use by another operation", resource)
            }
            FailureKind::ResourceBusy { port, state } => {
                write!(f, "port {} is busy ({})", port, state)
            }
            FailureKind::SubprocessFailed {
                exit_code, phase, ..
            } => write!(f, "{} failed with exit code {}", phase, exit_code),
            FailureKind::SubprocessTimedOut { bound, phase } => {
                write!(f, "{} timed out ({})", phase, bound)
            }
            FailureKind::Cancelled { source } => write!(f, "{}", source),
            FailureKind::DaemonStartupFailed { message } => {
                write!(f, "daemon startup failed: {}", message)
            }
            FailureKind::ConfigInvalid { message } => {
                write!(f, "invalid project configuration: {}", message)
            }
            FailureKind::PortNotFound { port } => write!(f, "port {} not found", port),
            FailureKind::PortPermissionDenied { port } => {
                write!(f, "permission denied opening port {}", port)
            }
            FailureKind::FirmwareLedgerCorrupt { port } => {
                write!(f, "firmware ledger entry for {} was corrupt and has been reset", port)
            }
        }
    }
}
