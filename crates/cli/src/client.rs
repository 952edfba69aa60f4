// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon client: spawn-or-attach, request drop, completion polling.

use crate::{Cli, Command, DaemonCommand};
use anyhow::{bail, Context};
use fb_core::paths::{monitor_summary_file, DaemonPaths};
use fb_core::{
    BuildRequest, DaemonState, DeployRequest, InstallDepsRequest, MonitorRequest, RequestId,
    RequestMeta, StatusSnapshot,
};
use fb_daemon::singleton::{SingletonManager, SpawnOutcome};
use fb_storage::StatusFile;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

/// Status poll cadence while waiting for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// If the daemon hasn't picked our request up within this window, the drop
/// file was probably overwritten by a racing client; drop it again.
const REDROP_AFTER: Duration = Duration::from_secs(5);

pub async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let paths = DaemonPaths::resolve()?;

    match cli.command {
        Command::Status => {
            let status = StatusFile::new(paths.status_file()).read_or_default();
            print_status(&status, &SingletonManager::new(paths));
            Ok(ExitCode::SUCCESS)
        }
        Command::Cancel { ref request_id } => {
            let signal = paths.cancel_signal(&RequestId::new(request_id.clone()));
            std::fs::write(&signal, b"").with_context(|| {
                format!("failed to create cancel signal {}", signal.display())
            })?;
            println!("cancellation requested for {request_id}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Daemon { ref command } => match command {
            DaemonCommand::Start => {
                let outcome = ensure_daemon(&paths)?;
                match outcome {
                    SpawnOutcome::Started { pid, .. } => println!("daemon started (pid {pid})"),
                    SpawnOutcome::AlreadyRunning { pid } => {
                        println!("daemon already running (pid {pid})")
                    }
                    SpawnOutcome::Failed { message } => bail!("{message}"),
                }
                Ok(ExitCode::SUCCESS)
            }
            DaemonCommand::Stop => stop_daemon(&paths),
        },
        ref command => submit_and_wait(&cli, command, &paths).await,
    }
}

/// Build the request document, drop it, and wait for the daemon's verdict.
async fn submit_and_wait(
    cli: &Cli,
    command: &Command,
    paths: &DaemonPaths,
) -> anyhow::Result<ExitCode> {
    ensure_live_daemon(paths)?;

    let meta = request_meta(cli)?;
    let request_id = meta.request_id.clone();
    let project_dir = meta.project_dir.clone();

    let (file, payload, is_monitor) = match command {
        Command::Build {
            clean,
            verbose,
            jobs,
        } => (
            paths.build_request(),
            serde_json::to_string_pretty(&BuildRequest {
                meta,
                clean_build: *clean,
                verbose: *verbose,
                jobs: *jobs,
            })?,
            false,
        ),
        Command::Deploy {
            port,
            clean,
            verbose,
            jobs,
            monitor,
            halt_on_error,
            halt_on_success,
            expect,
            timeout,
        } => (
            paths.deploy_request(),
            serde_json::to_string_pretty(&DeployRequest {
                meta,
                port: port.clone(),
                clean_build: *clean,
                verbose: *verbose,
                jobs: *jobs,
                monitor_after: *monitor,
                monitor_halt_on_error: halt_on_error.clone(),
                monitor_halt_on_success: halt_on_success.clone(),
                monitor_expect: expect.clone(),
                monitor_timeout: *timeout,
            })?,
            *monitor,
        ),
        Command::Monitor {
            port,
            baud,
            halt_on_error,
            halt_on_success,
            expect,
            timeout,
        } => (
            paths.monitor_request(),
            serde_json::to_string_pretty(&MonitorRequest {
                meta,
                port: port.clone(),
                baud_rate: *baud,
                halt_on_error: halt_on_error.clone(),
                halt_on_success: halt_on_success.clone(),
                expect: expect.clone(),
                timeout: *timeout,
            })?,
            true,
        ),
        Command::InstallDeps { verbose } => (
            paths.install_deps_request(),
            serde_json::to_string_pretty(&InstallDepsRequest {
                meta,
                verbose: *verbose,
            })?,
            false,
        ),
        _ => bail!("internal: non-request command reached submit_and_wait"),
    };

    write_request(&file, &payload)?;
    println!("request {request_id} submitted ({})", file.display());
    wait_for_completion(paths, &file, &payload, &request_id, &project_dir, is_monitor).await
}

/// Poll the status file until our operation reaches a terminal state.
/// Ctrl-C drops the cancel signal and exits 130.
///
/// The drop file holds one request at a time, so a racing client can
/// overwrite ours before the daemon polls. If our request never shows up
/// in the status within [`REDROP_AFTER`], it is dropped again once the
/// slot frees up.
async fn wait_for_completion(
    paths: &DaemonPaths,
    request_file: &Path,
    payload: &str,
    request_id: &RequestId,
    project_dir: &Path,
    show_monitor_output: bool,
) -> anyhow::Result<ExitCode> {
    let status_file = StatusFile::new(paths.status_file());
    let tag = format!("[{request_id}]");
    let mut seen_running = false;
    let mut last_message = String::new();
    let mut last_drop = std::time::Instant::now();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let signal = paths.cancel_signal(request_id);
                let _ = std::fs::write(&signal, b"");
                eprintln!("\ninterrupted; cancellation requested");
                return Ok(crate::interrupted_exit());
            }
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }

        let status = status_file.read_or_default();
        let ours = status
            .current_operation
            .as_deref()
            .map(|op| op.contains(&tag))
            .unwrap_or(false);

        if !seen_running
            && !ours
            && last_drop.elapsed() > REDROP_AFTER
            && !request_file.exists()
        {
            // Lost the drop race; the slot is free again
            write_request(request_file, payload)?;
            last_drop = std::time::Instant::now();
            continue;
        }

        if ours && status.message != last_message {
            last_message = status.message.clone();
            println!("{}", status.message);
        }

        if ours && status.operation_in_progress {
            seen_running = true;
            continue;
        }

        if ours && !status.operation_in_progress {
            seen_running = true;
            if show_monitor_output {
                print_monitor_summary(project_dir);
            }
            return Ok(match status.state {
                DaemonState::Completed => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            });
        }

        // Another operation took the status slot after ours finished
        if seen_running && !ours {
            return Ok(ExitCode::SUCCESS);
        }
    }
}

fn print_monitor_summary(project_dir: &Path) {
    let path = monitor_summary_file(project_dir);
    if let Ok(content) = std::fs::read_to_string(&path) {
        println!("monitor summary: {}", content.trim());
    }
}

fn print_status(status: &StatusSnapshot, singleton: &SingletonManager) {
    if singleton.is_alive() {
        println!("daemon: running (pid {})", status.daemon_pid);
    } else {
        println!("daemon: not running");
    }
    println!("state: {}", status.state);
    if !status.message.is_empty() {
        println!("message: {}", status.message);
    }
    if let Some(op) = &status.current_operation {
        println!("operation: {op}");
    }
    for (port, state) in &status.port_states {
        println!("port {port}: {}", state.state);
    }
    for (project, count) in &status.lock_status.project_locks {
        println!("project lock {project}: {count} acquisitions");
    }
}

/// Shared request fields from CLI arguments.
fn request_meta(cli: &Cli) -> anyhow::Result<RequestMeta> {
    let cwd = std::env::current_dir().context("cannot determine working directory")?;
    let project_dir = match &cli.project {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("project directory {} not found", dir.display()))?,
        None => cwd.clone(),
    };

    if cli.environment.is_empty() {
        bail!("an environment is required (-e <name>, from platformio.ini)");
    }

    Ok(RequestMeta {
        project_dir,
        environment: cli.environment.clone(),
        caller_pid: std::process::id(),
        caller_cwd: cwd,
        request_id: RequestId::generate(),
    })
}

/// Atomically drop a request payload (write sibling temp, then rename).
fn write_request(path: &Path, payload: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, payload)
        .and_then(|()| std::fs::rename(&tmp, path))
        .with_context(|| format!("failed to write request file {}", path.display()))
}

/// Make sure a daemon is serving the daemon directory.
fn ensure_live_daemon(paths: &DaemonPaths) -> anyhow::Result<()> {
    match ensure_daemon(paths)? {
        SpawnOutcome::Failed { message } => bail!("daemon unavailable: {message}"),
        _ => Ok(()),
    }
}

fn ensure_daemon(paths: &DaemonPaths) -> anyhow::Result<SpawnOutcome> {
    let singleton = SingletonManager::new(paths.clone());
    let binary = find_daemon_binary();
    Ok(singleton.spawn_or_attach(&binary, std::process::id()))
}

/// Locate the `fbuildd` binary: explicit override, then a sibling of this
/// executable, then PATH.
fn find_daemon_binary() -> PathBuf {
    if let Ok(path) = std::env::var("FBUILD_DAEMON_BINARY") {
        return PathBuf::from(path);
    }

    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("fbuildd");
            if sibling.exists() {
                return sibling;
            }
        }
    }

    PathBuf::from("fbuildd")
}

fn stop_daemon(paths: &DaemonPaths) -> anyhow::Result<ExitCode> {
    let singleton = SingletonManager::new(paths.clone());
    let Some(pid) = singleton.read_pid() else {
        println!("daemon not running");
        return Ok(ExitCode::SUCCESS);
    };

    if !fb_adapters::pid_alive(pid) {
        println!("daemon not running (stale pid file)");
        return Ok(ExitCode::SUCCESS);
    }

    if fb_adapters::terminate_with_escalation(pid, Duration::from_secs(5)) {
        println!("daemon stopped (pid {pid})");
        Ok(ExitCode::SUCCESS)
    } else {
        bail!("failed to stop daemon (pid {pid})")
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
