// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::locks::LockDomain;
use fb_adapters::FakeConnector;
use fb_core::paths::DaemonPaths;
use fb_core::{ClientId, ManualClock};
use fb_engine::{EnvConfig, OrchestratorError, Platform, Toolchain, ToolchainProvider};
use std::collections::HashMap;
use std::path::Path;
use tempfile::tempdir;

struct NullProvider;

#[async_trait::async_trait]
impl ToolchainProvider for NullProvider {
    fn toolchain(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        _project_dir: &Path,
    ) -> Result<Toolchain, OrchestratorError> {
        Err(OrchestratorError::ToolchainMissing("null".to_string()))
    }

    async fn ensure_installed(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        _runner: &fb_adapters::WatchdogRunner,
        _progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), OrchestratorError> {
        Ok(())
    }

    fn flash_command(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        _port: Option<&str>,
        _firmware: &Path,
    ) -> Result<fb_adapters::WatchdogCommand, OrchestratorError> {
        Err(OrchestratorError::ToolchainMissing("null".to_string()))
    }
}

fn context(
    dir: &Path,
    connector: FakeConnector,
) -> DaemonContext<ManualClock> {
    DaemonContext::new(
        DaemonPaths::in_dir(dir),
        ManualClock::new(),
        ContextOptions {
            workers: 1,
            heartbeat_timeout: Duration::from_secs(30),
            connector: Arc::new(connector),
            provider: Arc::new(NullProvider),
        },
    )
}

#[tokio::test]
async fn test_disconnect_callback_releases_locks_and_sessions() {
    let dir = tempdir().unwrap();
    let connector = FakeConnector::new();
    connector.add_port("COM3");
    let ctx = context(dir.path(), connector);

    // Register a client holding a lock and a serial session
    let client = ctx
        .clients
        .register_client(Some(ClientId::new("client-x")), std::process::id(), HashMap::new());
    let _guard = ctx
        .locks
        .acquire_project_lock("/p", client.client_id.as_str())
        .unwrap();
    ctx.serial
        .open_port("COM3", 115_200, &client.client_id)
        .await
        .unwrap();

    assert!(ctx.locks.is_held(LockDomain::Project, "/p"));
    assert!(ctx.serial.has_session("COM3"));

    // Unregister fires the wired cleanup callback
    ctx.clients.unregister_client(&client.client_id);

    assert!(!ctx.locks.is_held(LockDomain::Project, "/p"));
    // Last attached client: the session closed with it
    assert!(!ctx.serial.has_session("COM3"));

    ctx.cleanup();
}

#[tokio::test]
async fn test_cleanup_sets_flag_first_and_stops_intake() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), FakeConnector::new());

    assert!(!ctx.is_shutting_down());
    ctx.cleanup();
    assert!(ctx.is_shutting_down());

    // The compilation queue refuses new jobs after cleanup
    let job = fb_engine::CompileJob {
        job_id: "late".to_string(),
        compiler: "cc".into(),
        flags: vec![],
        include_paths: vec![],
        source: "/dev/null".into(),
        object: dir.path().join("late.o"),
    };
    assert!(matches!(
        ctx.queue.submit(job),
        Err(fb_engine::QueueError::ShuttingDown)
    ));
}

#[test]
fn test_operation_in_progress_flag() {
    let dir = tempdir().unwrap();
    let ctx = context(dir.path(), FakeConnector::new());

    assert!(!ctx.operation_in_progress());
    ctx.set_operation_in_progress(true);
    assert!(ctx.operation_in_progress());
    ctx.set_operation_in_progress(false);
    assert!(!ctx.operation_in_progress());
    ctx.cleanup();
}
