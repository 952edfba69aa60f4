// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::context::{ContextOptions, DaemonContext};
use crate::locks::LockDomain;
use fb_adapters::{FakeConnector, WatchdogCommand, WatchdogRunner};
use fb_core::test_support::{build_request, deploy_request, monitor_request};
use fb_core::{ManualClock, PortActivity};
use fb_engine::{EnvConfig, OrchestratorError, Platform, Toolchain, ToolchainProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Provider backed by a stub shell script that writes its `-o` target.
struct StubProvider {
    tool: PathBuf,
}

impl StubProvider {
    fn install(dir: &Path) -> Self {
        let tool = dir.join("stub-tool");
        std::fs::write(
            &tool,
            r#"#!/bin/sh
out=""
prev=""
for a in "$@"; do
    if [ "$prev" = "-o" ]; then out="$a"; fi
    prev="$a"
done
if [ -z "$out" ]; then
    for a in "$@"; do out="$a"; done
fi
echo "artifact for $out" > "$out"
exit 0
"#,
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        Self { tool }
    }
}

#[async_trait::async_trait]
impl ToolchainProvider for StubProvider {
    fn toolchain(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        _project_dir: &Path,
    ) -> Result<Toolchain, OrchestratorError> {
        Ok(Toolchain {
            compiler: self.tool.clone(),
            linker: self.tool.clone(),
            objcopy: None,
            image_ext: "hex",
            base_flags: vec!["-Os".to_string()],
            link_flags: vec![],
            include_paths: vec![],
        })
    }

    async fn ensure_installed(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        _runner: &WatchdogRunner,
        progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), OrchestratorError> {
        progress("stub toolchain present");
        Ok(())
    }

    fn flash_command(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        port: Option<&str>,
        firmware: &Path,
    ) -> Result<WatchdogCommand, OrchestratorError> {
        let mut cmd = WatchdogCommand::new(&self.tool);
        if let Some(port) = port {
            cmd = cmd.args(["-P".to_string(), port.to_string()]);
        }
        Ok(cmd
            .args(["-o".to_string(), format!("{}.flashed", firmware.display())])
            .total_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(10)))
    }
}

/// Provider whose flash command always fails.
struct FailingFlashProvider {
    inner: StubProvider,
}

#[async_trait::async_trait]
impl ToolchainProvider for FailingFlashProvider {
    fn toolchain(
        &self,
        platform: Platform,
        env: &EnvConfig,
        project_dir: &Path,
    ) -> Result<Toolchain, OrchestratorError> {
        self.inner.toolchain(platform, env, project_dir)
    }

    async fn ensure_installed(
        &self,
        platform: Platform,
        env: &EnvConfig,
        runner: &WatchdogRunner,
        progress: &(dyn for<'a> Fn(&'a str) + Send + Sync),
    ) -> Result<(), OrchestratorError> {
        self.inner.ensure_installed(platform, env, runner, progress).await
    }

    fn flash_command(
        &self,
        _platform: Platform,
        _env: &EnvConfig,
        _port: Option<&str>,
        _firmware: &Path,
    ) -> Result<WatchdogCommand, OrchestratorError> {
        Ok(WatchdogCommand::new("sh")
            .args(["-c", "echo 'flash: device did not respond' >&2; exit 2"])
            .total_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(5)))
    }
}

struct Harness {
    _dir: TempDir,
    ctx: Arc<DaemonContext<ManualClock>>,
    connector: FakeConnector,
    project_dir: PathBuf,
}

fn harness_with_provider(
    make_provider: impl FnOnce(&Path) -> Arc<dyn ToolchainProvider>,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::new();
    let connector = FakeConnector::new();
    let provider = make_provider(dir.path());

    let daemon_dir = dir.path().join("daemon");
    let project_dir = dir.path().join("blink");
    std::fs::create_dir_all(project_dir.join("src")).unwrap();
    std::fs::write(project_dir.join("src/main.cpp"), "int main() {}").unwrap();
    std::fs::write(
        project_dir.join("platformio.ini"),
        "[env:uno]\nplatform = atmelavr\nboard = uno\n",
    )
    .unwrap();

    let ctx = Arc::new(DaemonContext::new(
        fb_core::paths::DaemonPaths::in_dir(&daemon_dir),
        clock,
        ContextOptions {
            workers: 2,
            heartbeat_timeout: Duration::from_secs(30),
            connector: Arc::new(connector.clone()),
            provider,
        },
    ));

    Harness {
        _dir: dir,
        ctx,
        connector,
        project_dir,
    }
}

fn harness() -> Harness {
    harness_with_provider(|dir| Arc::new(StubProvider::install(dir)))
}

#[tokio::test]
async fn test_build_happy_path() {
    let h = harness();
    let request = build_request(&h.project_dir, "req-1");

    let outcome = process_request(&BuildProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);

    // Registry recorded the full lifecycle
    let op = h.ctx.registry.get_operation(&outcome.operation_id).unwrap();
    assert_eq!(op.state, OperationState::Completed);
    assert!(op.started_at.is_some() && op.completed_at.is_some());

    // Status reflects completion and the project lock was released
    let status = h.ctx.status.read();
    assert_eq!(status.state, DaemonState::Completed);
    assert!(!status.operation_in_progress);
    assert!(!h
        .ctx
        .locks
        .is_held(LockDomain::Project, &h.project_dir.display().to_string()));

    // Firmware artifact exists
    assert!(h
        .project_dir
        .join(".fbuild/build/uno/firmware.elf")
        .exists());
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_path_unsafe_request_id_rejected() {
    let h = harness();
    let mut request = build_request(&h.project_dir, "req-1");
    request.meta.request_id = fb_core::RequestId::new("../../escape");

    let outcome = process_request(&BuildProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Failed);
    assert!(outcome.message.contains("filesystem-safe"), "{}", outcome.message);
    // Nothing was created outside the daemon directory
    assert!(!h._dir.path().join("escape").exists());
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_validation_failure_fails_before_any_lock() {
    let h = harness();
    let mut request = build_request(&h.project_dir, "req-1");
    request.meta.project_dir = PathBuf::from("/nonexistent/project");

    let outcome = process_request(&BuildProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Failed);
    assert!(outcome.message.contains("does not exist"));
    assert!(!h
        .ctx
        .locks
        .is_held(LockDomain::Project, "/nonexistent/project"));
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_busy_project_fails_fast_with_resource_name() {
    let h = harness();
    let key = h.project_dir.display().to_string();
    let _held = h.ctx.locks.acquire_project_lock(&key, "other-op").unwrap();

    let request = build_request(&h.project_dir, "req-1");
    let start = std::time::Instant::now();
    let outcome = process_request(&BuildProcessor, &request, h.ctx.as_ref()).await;

    assert_eq!(outcome.state, OperationState::Failed);
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(outcome.message.contains(&key), "message: {}", outcome.message);
    assert!(outcome.message.contains("in use"));
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_locks_released_after_execute_error() {
    // Config parse failure happens inside execute, after locks are held
    let h = harness();
    std::fs::remove_file(h.project_dir.join("platformio.ini")).unwrap();

    let request = build_request(&h.project_dir, "req-1");
    let outcome = process_request(&BuildProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Failed);

    // The next request on the same project acquires the lock immediately
    std::fs::write(
        h.project_dir.join("platformio.ini"),
        "[env:uno]\nplatform = atmelavr\n",
    )
    .unwrap();
    let retry = build_request(&h.project_dir, "req-2");
    let outcome = process_request(&BuildProcessor, &retry, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_cancellation_via_signal_file() {
    let h = harness();
    let request = build_request(&h.project_dir, "req-cancel");
    // Signal exists before the operation starts: first check raises
    std::fs::write(h.ctx.paths.cancel_signal(&request.meta.request_id), b"").unwrap();

    let outcome = process_request(&BuildProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Cancelled);
    assert!(outcome.message.contains("cancelled"));

    // The framework cleared the signal file
    assert!(!h
        .ctx
        .paths
        .cancel_signal(&request.meta.request_id)
        .exists());
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_deploy_flashes_and_records_ledger() {
    let h = harness();
    h.connector.add_port("COM3");
    let request = deploy_request(&h.project_dir, "req-1", Some("COM3"));

    let outcome = process_request(&DeployProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);

    // Flasher ran: its marker file exists next to the firmware
    let flashed = h
        .project_dir
        .join(".fbuild/build/uno/firmware.elf.flashed");
    assert!(flashed.exists());

    // Ledger has the entry and the port returned to idle
    let entry = h.ctx.ledger.get_entry("COM3").unwrap();
    assert_eq!(entry.environment, "uno");
    assert_eq!(h.ctx.port_states.get("COM3").state, PortActivity::Idle);

    // The operation is linked to the flasher execution
    let op = h.ctx.registry.get_operation(&outcome.operation_id).unwrap();
    assert_eq!(op.subprocess_ids.len(), 1);
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_deploy_skips_upload_when_ledger_current() {
    let h = harness();
    h.connector.add_port("COM3");

    let first = deploy_request(&h.project_dir, "req-1", Some("COM3"));
    let outcome = process_request(&DeployProcessor, &first, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);

    // Remove the flash marker; a second identical deploy must not recreate it
    let flashed = h
        .project_dir
        .join(".fbuild/build/uno/firmware.elf.flashed");
    std::fs::remove_file(&flashed).unwrap();

    let second = deploy_request(&h.project_dir, "req-2", Some("COM3"));
    let outcome = process_request(&DeployProcessor, &second, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);
    assert!(!flashed.exists(), "upload should have been skipped");
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_deploy_redeploys_after_source_change() {
    let h = harness();
    h.connector.add_port("COM3");

    let first = deploy_request(&h.project_dir, "req-1", Some("COM3"));
    process_request(&DeployProcessor, &first, h.ctx.as_ref()).await;

    let flashed = h
        .project_dir
        .join(".fbuild/build/uno/firmware.elf.flashed");
    std::fs::remove_file(&flashed).unwrap();
    std::fs::write(h.project_dir.join("src/main.cpp"), "int main() { return 1; }").unwrap();

    let second = deploy_request(&h.project_dir, "req-2", Some("COM3"));
    let outcome = process_request(&DeployProcessor, &second, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);
    assert!(flashed.exists(), "source change must force re-upload");
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_deploy_flash_failure_surfaces_phase_and_stderr() {
    let h = harness_with_provider(|dir| {
        Arc::new(FailingFlashProvider {
            inner: StubProvider::install(dir),
        })
    });
    h.connector.add_port("COM3");

    let request = deploy_request(&h.project_dir, "req-1", Some("COM3"));
    let outcome = process_request(&DeployProcessor, &request, h.ctx.as_ref()).await;

    assert_eq!(outcome.state, OperationState::Failed);
    assert!(outcome.message.contains("upload"), "{}", outcome.message);
    // No ledger entry for a failed upload; port back to idle
    assert!(h.ctx.ledger.get_entry("COM3").is_none());
    assert_eq!(h.ctx.port_states.get("COM3").state, PortActivity::Idle);
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_deploy_with_monitor_after_holds_port_and_summarizes() {
    let h = harness();
    let port = h.connector.add_port("COM3");

    let mut request = deploy_request(&h.project_dir, "req-1", Some("COM3"));
    request.monitor_after = true;
    request.monitor_halt_on_success = Some("READY".to_string());
    request.monitor_timeout = Some(30);

    // Feed the success line once the monitor attaches
    let feeder = {
        let port = port.clone();
        let ctx = Arc::clone(&h.ctx);
        tokio::spawn(async move {
            // Wait for the monitor phase to open the session
            for _ in 0..200 {
                if ctx.serial.has_session("COM3") {
                    port.feed(b"boot\nREADY\n");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let outcome = process_request(&DeployProcessor, &request, h.ctx.as_ref()).await;
    feeder.await.unwrap();
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);

    let summary_path = h.project_dir.join(".fbuild/monitor_summary.json");
    let summary: MonitorSummary =
        serde_json::from_str(&std::fs::read_to_string(summary_path).unwrap()).unwrap();
    assert!(summary.success_found);
    assert_eq!(summary.exit_reason, "success_detected");
    assert_eq!(summary.lines_processed, 2);

    let output = std::fs::read_to_string(h.project_dir.join(".fbuild/monitor_output.txt")).unwrap();
    assert_eq!(output, "boot\nREADY\n");
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_monitor_halt_on_error_fails_operation() {
    let h = harness();
    let port = h.connector.add_port("/dev/ttyUSB0");
    let mut request = monitor_request(&h.project_dir, "req-1", "/dev/ttyUSB0");
    request.halt_on_error = Some("panic".to_string());
    request.timeout = Some(30);

    let feeder = {
        let port = port.clone();
        let ctx = Arc::clone(&h.ctx);
        tokio::spawn(async move {
            for _ in 0..200 {
                if ctx.serial.has_session("/dev/ttyUSB0") {
                    port.feed(b"Guru Meditation: panic on core 1\n");
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
    };

    let outcome = process_request(&MonitorProcessor, &request, h.ctx.as_ref()).await;
    feeder.await.unwrap();
    assert_eq!(outcome.state, OperationState::Failed);

    let summary: MonitorSummary = serde_json::from_str(
        &std::fs::read_to_string(h.project_dir.join(".fbuild/monitor_summary.json")).unwrap(),
    )
    .unwrap();
    assert!(summary.error_found);
    assert_eq!(summary.exit_reason, "error_detected");

    // Port lock and state released after failure
    assert!(!h.ctx.locks.is_held(LockDomain::Port, "/dev/ttyUSB0"));
    assert_eq!(h.ctx.port_states.get("/dev/ttyUSB0").state, PortActivity::Idle);
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_monitor_timeout_with_expect_not_found_fails() {
    let h = harness();
    h.connector.add_port("COM7");
    let mut request = monitor_request(&h.project_dir, "req-1", "COM7");
    request.expect = Some("CALIBRATED".to_string());
    request.timeout = Some(1);

    let outcome = process_request(&MonitorProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Failed);

    let summary: MonitorSummary = serde_json::from_str(
        &std::fs::read_to_string(h.project_dir.join(".fbuild/monitor_summary.json")).unwrap(),
    )
    .unwrap();
    assert!(!summary.expected_found);
    assert_eq!(summary.exit_reason, "timeout");
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_monitor_rejects_invalid_pattern() {
    let h = harness();
    h.connector.add_port("COM7");
    let mut request = monitor_request(&h.project_dir, "req-1", "COM7");
    request.expect = Some("[unclosed".to_string());

    let outcome = process_request(&MonitorProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Failed);
    assert!(outcome.message.contains("invalid pattern"));
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_install_deps_reports_progress_and_succeeds() {
    let h = harness();
    let request = fb_core::InstallDepsRequest {
        meta: fb_core::test_support::meta(&h.project_dir, "req-1"),
        verbose: false,
    };

    let outcome = process_request(&InstallDepsProcessor, &request, h.ctx.as_ref()).await;
    assert_eq!(outcome.state, OperationState::Completed, "{}", outcome.message);
    h.ctx.cleanup();
}

#[tokio::test]
async fn test_concurrent_builds_of_different_projects() {
    // Two projects build in parallel; both locks released afterwards
    let h = harness();
    let other_project = h._dir.path().join("other");
    std::fs::create_dir_all(other_project.join("src")).unwrap();
    std::fs::write(other_project.join("src/main.cpp"), "int other;").unwrap();
    std::fs::write(
        other_project.join("platformio.ini"),
        "[env:uno]\nplatform = atmelavr\n",
    )
    .unwrap();

    let request_a = build_request(&h.project_dir, "req-a");
    let request_b = build_request(&other_project, "req-b");

    let ctx_a = Arc::clone(&h.ctx);
    let ctx_b = Arc::clone(&h.ctx);
    let (a, b) = tokio::join!(
        async move { process_request(&BuildProcessor, &request_a, ctx_a.as_ref()).await },
        async move { process_request(&BuildProcessor, &request_b, ctx_b.as_ref()).await },
    );

    assert_eq!(a.state, OperationState::Completed, "{}", a.message);
    assert_eq!(b.state, OperationState::Completed, "{}", b.message);

    let report = h.ctx.locks.get_lock_status();
    assert_eq!(report.project_locks.len(), 2);
    assert!(report.port_locks.is_empty());
    assert!(!h
        .ctx
        .locks
        .is_held(LockDomain::Project, &h.project_dir.display().to_string()));
    h.ctx.cleanup();
}
