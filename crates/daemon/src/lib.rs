// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! fb-daemon: The fbuild build daemon.
//!
//! A singleton background process that serializes build, deploy, and
//! serial-monitor requests from many concurrent clients against shared
//! physical resources: serial ports and project directories.
//!
//! Architecture:
//! - Receiver task: polls request drop files, dispatches to processors
//! - Processors: one per request kind, driven by a common lock/status
//!   lifecycle
//! - Subsystems: owned by [`context::DaemonContext`], constructed once per
//!   daemon invocation

pub mod cancel;
pub mod clients;
pub mod context;
pub mod env;
pub mod locks;
pub mod port_state;
pub mod processors;
pub mod receiver;
pub mod registry;
pub mod serial_manager;
pub mod singleton;
pub mod status;

pub use cancel::{CancelCheck, CancelPolicy, CancellationRegistry, CancelledError};
pub use clients::{ClientConnectionManager, ClientInfo};
pub use context::{ContextOptions, DaemonContext, SystemContext};
pub use locks::{LockDomain, LockError, ResourceGuard, ResourceLockManager};
pub use port_state::PortStateManager;
pub use receiver::RequestReceiver;
pub use registry::OperationRegistry;
pub use serial_manager::{SerialManagerError, SerialNotice, SerialPollData, SharedSerialManager};
pub use singleton::{SingletonManager, SpawnOutcome};
pub use status::StatusManager;
