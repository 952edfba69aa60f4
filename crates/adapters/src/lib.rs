// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fb-adapters: OS-facing adapters for the fbuild daemon.
//!
//! Everything that touches a process table, a child process, or a serial
//! device lives here behind small seams so the daemon crates stay testable
//! without hardware.

pub mod process;
pub mod serial;
pub mod subprocess;

pub use process::{pid_alive, terminate_with_escalation};
pub use serial::{SerialConnector, SerialError, SerialStream, SystemSerialConnector};
pub use subprocess::{
    CommandOutput, ExecutionRecord, SubprocessError, WatchdogCommand, WatchdogRunner,
};

#[cfg(any(test, feature = "test-support"))]
pub use serial::fake::{FakeConnector, FakePort, OpenOutcome};
