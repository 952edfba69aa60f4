// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fbuild: client CLI for the fbuild build daemon.
//!
//! Thin front-end: ensures a daemon is running, drops a request file into
//! the daemon directory, and polls the status file (and monitor summary)
//! for completion. Ctrl-C writes the cancel signal for the in-flight
//! request and exits 130.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

/// Exit code for a user interrupt, per convention (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "fbuild", version, about = "Build daemon client for embedded firmware projects")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Environment name from platformio.ini
    #[arg(short, long, global = true, default_value = "")]
    environment: String,
}

#[derive(Subcommand)]
enum Command {
    /// Compile the project
    Build {
        /// Remove build artifacts first
        #[arg(long)]
        clean: bool,
        #[arg(short, long)]
        verbose: bool,
        /// Compilation parallelism override
        #[arg(short, long)]
        jobs: Option<usize>,
    },
    /// Build, flash, and optionally monitor
    Deploy {
        /// Serial port (auto-detect when omitted)
        #[arg(short, long)]
        port: Option<String>,
        #[arg(long)]
        clean: bool,
        #[arg(short, long)]
        verbose: bool,
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Monitor after a successful upload
        #[arg(long)]
        monitor: bool,
        #[arg(long)]
        halt_on_error: Option<String>,
        #[arg(long)]
        halt_on_success: Option<String>,
        #[arg(long)]
        expect: Option<String>,
        /// Monitor timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Stream serial output from a device
    Monitor {
        #[arg(short, long)]
        port: String,
        #[arg(short, long, default_value_t = 115_200)]
        baud: u32,
        #[arg(long)]
        halt_on_error: Option<String>,
        #[arg(long)]
        halt_on_success: Option<String>,
        #[arg(long)]
        expect: Option<String>,
        /// Timeout in seconds (runs until halted when omitted)
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Install project toolchain dependencies
    InstallDeps {
        #[arg(short, long)]
        verbose: bool,
    },
    /// Show daemon status
    Status,
    /// Cancel an in-flight request by ID
    Cancel {
        request_id: String,
    },
    /// Daemon management
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

#[derive(Subcommand)]
enum DaemonCommand {
    /// Start the daemon if not already running
    Start,
    /// Stop a running daemon
    Stop,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match client::run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

pub(crate) fn interrupted_exit() -> ExitCode {
    ExitCode::from(EXIT_INTERRUPTED)
}
