// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fbuild daemon (fbuildd)
//!
//! Background process that serializes build, deploy, and serial-monitor
//! requests from fbuild clients against shared serial ports and project
//! directories.
//!
//! Architecture:
//! - Receiver task: polls request drop files, dispatches to processors
//! - Heartbeat sweeper: releases resources of dead clients
//! - Main task: waits for shutdown signals, then tears down the context

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::sync::Arc;

use fb_adapters::SystemSerialConnector;
use fb_core::paths::DaemonPaths;
use fb_core::{DaemonState, SystemClock};
use fb_daemon::context::{ContextOptions, DaemonContext};
use fb_daemon::receiver::{spawn_heartbeat_sweeper, RequestReceiver};
use fb_daemon::singleton::{publish_startup_failure, SingletonError, SingletonManager};
use fb_engine::{CompilationQueue, HostToolchainProvider};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Handle info flags before any lock acquisition
    if let Some(arg) = std::env::args().nth(1) {
        match arg.as_str() {
            "--version" | "-V" | "-v" => {
                println!("fbuildd {}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
            "--help" | "-h" | "help" => {
                println!("fbuildd {}", env!("CARGO_PKG_VERSION"));
                println!("fbuild daemon - serializes build/deploy/monitor requests");
                println!();
                println!("USAGE:");
                println!("    fbuildd");
                println!();
                println!("The daemon is typically started by the `fbuild` CLI and should");
                println!("not be invoked directly. It watches request drop files in the");
                println!("daemon directory (~/.fbuild/daemon).");
                println!();
                println!("OPTIONS:");
                println!("    -h, --help       Print help information");
                println!("    -v, --version    Print version information");
                return Ok(());
            }
            _ => {
                eprintln!("error: unexpected argument '{arg}'");
                eprintln!("Usage: fbuildd [--help | --version]");
                std::process::exit(1);
            }
        }
    }

    let paths = DaemonPaths::resolve()?;
    std::fs::create_dir_all(paths.dir())?;

    // Rotate the log if it has grown too large, then write the startup
    // marker (before tracing setup, so clients can find this attempt)
    rotate_log_if_needed(&paths.log_file());
    write_startup_marker(&paths)?;

    let log_guard = setup_logging(&paths)?;
    info!("starting fbuild daemon");

    // Singleton election: hold the lifetime lock or bow out
    let singleton = SingletonManager::new(paths.clone());
    let daemon_lock = match singleton.acquire() {
        Ok(lock) => lock,
        Err(SingletonError::AlreadyRunning) => {
            // Losing the spawn race is benign: another daemon (possibly
            // still finishing startup) holds the lock. Exit quietly
            // without touching the shared status file, which belongs to
            // the winner. Launchers never see this as a failure.
            match singleton.read_pid() {
                Some(pid) => eprintln!("fbuildd is already running (pid {pid})"),
                None => eprintln!("fbuildd is already running"),
            }
            info!("another daemon holds the singleton lock, exiting");
            drop(log_guard);
            return Ok(());
        }
        Err(e) => {
            write_startup_error(&paths, &e.to_string());
            error!("failed to start daemon: {e}");
            drop(log_guard);
            std::process::exit(1);
        }
    };

    let workers = fb_daemon::env::workers().unwrap_or_else(CompilationQueue::default_workers);
    let ctx = Arc::new(DaemonContext::new(
        paths.clone(),
        SystemClock,
        ContextOptions {
            workers,
            heartbeat_timeout: fb_daemon::env::heartbeat_timeout(),
            connector: Arc::new(SystemSerialConnector),
            provider: Arc::new(HostToolchainProvider),
        },
    ));

    // Publish the initial Idle status so clients see a live daemon
    ctx.status
        .update(DaemonState::Idle, "daemon started", None, false);

    let shutdown = Arc::new(Notify::new());
    let receiver = RequestReceiver::new(Arc::clone(&ctx), Arc::clone(&shutdown));
    let receiver_task = tokio::spawn(receiver.run());
    spawn_heartbeat_sweeper(Arc::clone(&ctx));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    info!(dir = %paths.dir().display(), workers, "daemon ready");

    // Signal readiness to the launching client
    println!("READY");

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        }
        _ = sigint.recv() => {
            // A user interrupt stops intake; in-flight operations finish
            // during cleanup rather than erroring back to callers
            info!("received SIGINT, shutting down");
        }
    }

    shutdown.notify_waiters();
    ctx.cleanup();
    if let Err(e) = receiver_task.await {
        error!(error = %e, "receiver task failed during shutdown");
    }

    ctx.status
        .update(DaemonState::Idle, "daemon stopped", None, false);
    daemon_lock.remove_pid_file();
    info!("daemon stopped");
    Ok(())
}

/// Maximum log file size before rotation (10 MB).
const MAX_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Number of rotated log files to keep (daemon.log.1, .2, .3).
const MAX_ROTATED_LOGS: u32 = 3;

/// Rotate the daemon log file if it exceeds [`MAX_LOG_SIZE`].
///
/// Shifts `daemon.log` → `daemon.log.1` → `daemon.log.2` → `daemon.log.3`,
/// deleting the oldest. Best-effort: rotation failures are silently ignored
/// so the daemon still starts.
fn rotate_log_if_needed(log_path: &std::path::Path) {
    let size = match std::fs::metadata(log_path) {
        Ok(m) => m.len(),
        Err(_) => return,
    };

    if size < MAX_LOG_SIZE {
        return;
    }

    let log_str = log_path.display().to_string();

    for i in (1..MAX_ROTATED_LOGS).rev() {
        let from = format!("{log_str}.{i}");
        let to = format!("{log_str}.{}", i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    let _ = std::fs::rename(log_path, format!("{log_str}.1"));
}

/// Startup marker prefix written to the log before anything else.
/// Clients use this to find where the current startup attempt begins.
const STARTUP_MARKER_PREFIX: &str = "--- fbuildd: starting (pid: ";

fn write_startup_marker(paths: &DaemonPaths) -> std::io::Result<()> {
    use std::io::Write;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.log_file())?;
    writeln!(file, "{}{}) ---\n", STARTUP_MARKER_PREFIX, std::process::id())?;
    Ok(())
}

/// Write a startup error synchronously to the log file and status file.
/// This ensures the error is visible to the launching client even if the
/// process exits immediately.
fn write_startup_error(paths: &DaemonPaths, message: &str) {
    use std::io::Write;

    if let Ok(mut file) = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.log_file())
    {
        let _ = writeln!(file, "ERROR Failed to start daemon: {message}");
    }
    publish_startup_failure(paths, message);
}

fn setup_logging(
    paths: &DaemonPaths,
) -> Result<tracing_appender::non_blocking::WorkerGuard, std::io::Error> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let log_path = paths.log_file();
    let dir = log_path
        .parent()
        .ok_or_else(|| std::io::Error::other("log path has no parent"))?;
    let name = log_path
        .file_name()
        .ok_or_else(|| std::io::Error::other("log path has no file name"))?;

    let file_appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking))
        .init();

    Ok(guard)
}
