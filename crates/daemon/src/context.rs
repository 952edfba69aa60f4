// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon context: the single owner of every subsystem.
//!
//! Constructed once per daemon invocation, in dependency order, and passed
//! explicitly into request processors. Cleanup sets the shutdown flag
//! before touching any subsystem so callbacks running on other threads can
//! short-circuit instead of submitting new work, then shuts subsystems
//! down in reverse dependency order, logging and continuing on failure.

use crate::cancel::CancellationRegistry;
use crate::clients::ClientConnectionManager;
use crate::locks::ResourceLockManager;
use crate::port_state::PortStateManager;
use crate::registry::OperationRegistry;
use crate::serial_manager::SharedSerialManager;
use crate::status::StatusManager;
use fb_adapters::{SerialConnector, WatchdogRunner};
use fb_core::paths::DaemonPaths;
use fb_core::{Clock, SystemClock};
use fb_engine::{BuildDeps, CompilationQueue, ErrorCollector, ToolchainProvider};
use fb_storage::{FileCache, FirmwareLedger, StatusFile};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Construction knobs.
pub struct ContextOptions {
    pub workers: usize,
    pub heartbeat_timeout: Duration,
    pub connector: Arc<dyn SerialConnector>,
    pub provider: Arc<dyn ToolchainProvider>,
}

/// All daemon state, wired together.
pub struct DaemonContext<C: Clock> {
    pub paths: DaemonPaths,
    pub clock: C,
    pub daemon_pid: u32,
    pub daemon_started_at: u64,

    pub locks: Arc<ResourceLockManager<C>>,
    pub clients: Arc<ClientConnectionManager<C>>,
    pub registry: OperationRegistry<C>,
    pub cancellations: CancellationRegistry,
    pub serial: Arc<SharedSerialManager>,
    pub port_states: Arc<PortStateManager>,
    pub status: StatusManager<C>,

    pub queue: CompilationQueue,
    pub file_cache: FileCache,
    pub ledger: FirmwareLedger<C>,
    pub runner: WatchdogRunner,
    pub provider: Arc<dyn ToolchainProvider>,

    is_shutting_down: AtomicBool,
    operation_in_progress: Mutex<bool>,
}

/// The production context.
pub type SystemContext = DaemonContext<SystemClock>;

impl<C: Clock + 'static> DaemonContext<C> {
    /// Instantiate every subsystem and register cross-component cleanup.
    pub fn new(paths: DaemonPaths, clock: C, options: ContextOptions) -> Self {
        info!("initializing daemon context");

        let locks = Arc::new(ResourceLockManager::new(clock.clone()));
        let clients = Arc::new(ClientConnectionManager::new(
            clock.clone(),
            options.heartbeat_timeout,
        ));
        let registry = OperationRegistry::new(clock.clone());
        let cancellations = CancellationRegistry::new(paths.clone());
        let serial = Arc::new(SharedSerialManager::new(options.connector));
        let port_states = Arc::new(PortStateManager::new());

        let daemon_pid = std::process::id();
        let daemon_started_at = clock.epoch_secs();
        let status = StatusManager::new(
            clock.clone(),
            StatusFile::new(paths.status_file()),
            daemon_pid,
            daemon_started_at,
            Arc::clone(&port_states),
            Arc::clone(&locks),
        );

        let queue = CompilationQueue::start(options.workers);
        info!(workers = options.workers, "compilation queue started");

        let file_cache = FileCache::load(paths.file_cache());
        let ledger = FirmwareLedger::load(paths.firmware_ledger(), clock.clone());
        let runner = WatchdogRunner::default();

        // Client disconnect releases everything the client held
        {
            let locks = Arc::clone(&locks);
            let serial = Arc::clone(&serial);
            clients.register_cleanup_callback(Box::new(move |client| {
                let released = locks.release_all_client_locks(client.client_id.as_str());
                if released > 0 {
                    info!(client = %client.client_id, released, "released locks for disconnected client");
                }
                let detached = serial.disconnect_client(&client.client_id);
                if detached > 0 {
                    info!(client = %client.client_id, detached, "detached disconnected client from serial sessions");
                }
            }));
        }

        info!("daemon context initialized");
        Self {
            paths,
            clock,
            daemon_pid,
            daemon_started_at,
            locks,
            clients,
            registry,
            cancellations,
            serial,
            port_states,
            status,
            queue,
            file_cache,
            ledger,
            runner,
            provider: options.provider,
            is_shutting_down: AtomicBool::new(false),
            operation_in_progress: Mutex::new(false),
        }
    }

    /// Engine-facing view of the shared build subsystems.
    ///
    /// The error collector is per-operation so concurrent operations don't
    /// mix failure reports; callers create one and pass it in.
    pub fn build_deps<'a>(&'a self, errors: &'a ErrorCollector) -> BuildDeps<'a> {
        BuildDeps {
            queue: &self.queue,
            file_cache: &self.file_cache,
            errors,
            runner: &self.runner,
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.is_shutting_down.load(Ordering::SeqCst)
    }

    /// Coarse informational flag; real serialization is the resource locks.
    pub fn set_operation_in_progress(&self, value: bool) {
        *self.operation_in_progress.lock() = value;
    }

    pub fn operation_in_progress(&self) -> bool {
        *self.operation_in_progress.lock()
    }

    /// Shut everything down in reverse dependency order.
    pub fn cleanup(&self) {
        // Flag first: cleanup callbacks on other threads check it before
        // submitting new work
        self.is_shutting_down.store(true, Ordering::SeqCst);
        info!("shutting down daemon context");

        self.serial.shutdown();
        info!("shared serial manager shut down");

        let clients = self.clients.clear_all_clients();
        info!(clients, "client connections cleared");

        self.queue.shutdown();
        info!("compilation queue shut down");

        let locks = self.locks.clear_all();
        info!(locks, "resource locks cleared");

        info!("daemon context cleaned up");
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;
