// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Singleton election: at most one daemon per user per host.
//!
//! Two files cooperate. The daemon holds an exclusive `fs2` lock on
//! `fbuild_daemon.lock` for its whole lifetime; that lock is the
//! authoritative singleton guard. `fbuild_daemon.pid` is written atomically
//! by the daemon once it is up, and is what launchers poll.
//!
//! Launchers go through [`SingletonManager::spawn_or_attach`]: whoever
//! briefly wins the election lock spawns a daemon process; everyone else
//! polls the PID file. A launcher accepts *any* live PID it finds there,
//! even one that differs from the process it spawned, because process wrappers
//! routinely make the spawned PID differ from the daemon's real PID, and
//! a live daemon must never be reported as failure.

use fb_core::paths::DaemonPaths;
use fb_storage::save_json_atomic;
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// How long launchers wait for the PID file after the daemon is spawned.
/// `FBUILD_ATTACH_TIMEOUT_SECS` overrides (tests use short windows).
const ATTACH_TIMEOUT: Duration = Duration::from_secs(15);

/// Poll interval while waiting for the PID file.
const ATTACH_POLL: Duration = Duration::from_millis(100);

fn attach_timeout() -> Duration {
    std::env::var("FBUILD_ATTACH_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(ATTACH_TIMEOUT)
}

/// Singleton errors.
#[derive(Debug, Error)]
pub enum SingletonError {
    #[error("another daemon instance is already running")]
    AlreadyRunning,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of a spawn-or-attach attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnOutcome {
    /// This launcher's spawn produced the running daemon
    Started { pid: u32, launched_by: u32 },
    /// A daemon was already running (or another launcher won the race)
    AlreadyRunning { pid: u32 },
    /// No live daemon appeared within the attach window
    Failed { message: String },
}

impl SpawnOutcome {
    pub fn pid(&self) -> Option<u32> {
        match self {
            SpawnOutcome::Started { pid, .. } | SpawnOutcome::AlreadyRunning { pid } => Some(*pid),
            SpawnOutcome::Failed { .. } => None,
        }
    }
}

/// Guard holding the daemon-side lifetime lock.
///
/// Dropping it releases the lock; the daemon keeps it alive until exit.
pub struct DaemonLock {
    // NOTE(lifetime): held to maintain the exclusive file lock
    #[allow(dead_code)]
    lock_file: File,
    pid_file: PathBuf,
}

impl DaemonLock {
    /// Remove the PID file. Called during graceful shutdown.
    pub fn remove_pid_file(&self) {
        if self.pid_file.exists() {
            if let Err(e) = std::fs::remove_file(&self.pid_file) {
                warn!(error = %e, "failed to remove PID file");
            }
        }
    }
}

/// Manages the PID file and the spawn race.
#[derive(Debug, Clone)]
pub struct SingletonManager {
    paths: DaemonPaths,
}

impl SingletonManager {
    pub fn new(paths: DaemonPaths) -> Self {
        Self { paths }
    }

    pub fn pid_file_path(&self) -> PathBuf {
        self.paths.pid_file()
    }

    /// PID from the PID file, if present and parseable.
    ///
    /// A corrupt PID file is treated as absent.
    pub fn read_pid(&self) -> Option<u32> {
        let content = std::fs::read_to_string(self.paths.pid_file()).ok()?;
        content.trim().parse().ok()
    }

    /// True if the PID file names a live process.
    pub fn is_alive(&self) -> bool {
        self.read_pid()
            .map(fb_adapters::pid_alive)
            .unwrap_or(false)
    }

    /// Daemon-side: acquire the lifetime lock and publish our PID.
    ///
    /// Fails with [`SingletonError::AlreadyRunning`] when another daemon
    /// holds the lock. A stale PID file (dead process) is simply replaced:
    /// the lock, not the PID file, is the guard.
    pub fn acquire(&self) -> Result<DaemonLock, SingletonError> {
        std::fs::create_dir_all(self.paths.dir())?;

        // Open without truncating: the file may be locked by a live daemon
        // and truncation before holding the lock would be destructive.
        let lock_file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.paths.lock_file())?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| SingletonError::AlreadyRunning)?;

        let pid = std::process::id();
        write_pid_atomic(&self.paths.pid_file(), pid)?;
        info!(pid, pid_file = %self.paths.pid_file().display(), "singleton lock acquired");

        Ok(DaemonLock {
            lock_file,
            pid_file: self.paths.pid_file(),
        })
    }

    /// Launcher-side: ensure a daemon is running, spawning one if needed.
    ///
    /// Safe under a concurrent spawn storm: the election lock admits one
    /// spawner; everyone else waits for the PID file and accepts whatever
    /// live PID appears there.
    pub fn spawn_or_attach(&self, daemon_binary: &Path, launcher_pid: u32) -> SpawnOutcome {
        if let Some(pid) = self.live_pid() {
            return SpawnOutcome::AlreadyRunning { pid };
        }

        match self.try_election() {
            Ok(Some(_election)) => {
                // We won: clear any stale PID file, then spawn.
                // The election lock is released before the daemon starts:
                // the daemon takes its own lifetime lock on the same file.
                if self.read_pid().is_some() && !self.is_alive() {
                    debug!("removing stale PID file before spawn");
                    let _ = std::fs::remove_file(self.paths.pid_file());
                }
            }
            Ok(None) => {
                // Another launcher or a starting daemon holds the lock
                return match self.wait_for_daemon(attach_timeout()) {
                    Some(pid) => SpawnOutcome::AlreadyRunning { pid },
                    None => SpawnOutcome::Failed {
                        message: "daemon did not come up within the attach window".to_string(),
                    },
                };
            }
            Err(e) => {
                return SpawnOutcome::Failed {
                    message: format!("singleton election failed: {e}"),
                }
            }
        }

        if let Err(e) = spawn_daemon_process(daemon_binary) {
            return SpawnOutcome::Failed {
                message: format!("failed to spawn daemon: {e}"),
            };
        }

        match self.wait_for_daemon(attach_timeout()) {
            Some(pid) => SpawnOutcome::Started { pid, launched_by: launcher_pid },
            None => SpawnOutcome::Failed {
                message: "spawned daemon never became ready".to_string(),
            },
        }
    }

    /// PID of a live daemon, if any.
    fn live_pid(&self) -> Option<u32> {
        self.read_pid().filter(|&pid| fb_adapters::pid_alive(pid))
    }

    /// Briefly take the election lock. `Ok(Some(..))` means we won;
    /// `Ok(None)` means someone else holds it.
    fn try_election(&self) -> std::io::Result<Option<File>> {
        std::fs::create_dir_all(self.paths.dir())?;
        let file = std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.paths.lock_file())?;
        match file.try_lock_exclusive() {
            Ok(()) => {
                // Release immediately: the daemon we spawn needs this lock
                let _ = fs2::FileExt::unlock(&file);
                Ok(Some(file))
            }
            Err(_) => Ok(None),
        }
    }

    /// Poll for a live daemon PID, up to `timeout`.
    fn wait_for_daemon(&self, timeout: Duration) -> Option<u32> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(pid) = self.live_pid() {
                return Some(pid);
            }
            std::thread::sleep(ATTACH_POLL);
        }
        None
    }
}

/// Write the PID file atomically (temp + rename).
fn write_pid_atomic(path: &Path, pid: u32) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, format!("{pid}\n"))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Spawn the daemon binary detached from the launcher.
fn spawn_daemon_process(daemon_binary: &Path) -> std::io::Result<()> {
    std::process::Command::new(daemon_binary)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;
    Ok(())
}

/// Write a startup failure the launcher can observe instead of hanging.
///
/// Called by the daemon binary when early initialization fails: the status
/// file gets a Failed snapshot even though the daemon is about to exit.
///
/// Never fires while another live daemon owns the directory: a loser in a
/// spawn storm overwriting the winner's status file would make every
/// client see a healthy daemon as Failed.
pub fn publish_startup_failure(paths: &DaemonPaths, message: &str) {
    let manager = SingletonManager::new(paths.clone());
    if let Some(pid) = manager.read_pid() {
        if pid != std::process::id() && fb_adapters::pid_alive(pid) {
            debug!(pid, "live daemon present, not publishing startup failure");
            return;
        }
    }

    let mut snapshot = fb_core::StatusSnapshot::idle(std::process::id(), 0);
    snapshot.state = fb_core::DaemonState::Failed;
    snapshot.message = format!("daemon startup failed: {message}");
    if let Err(e) = save_json_atomic(&paths.status_file(), &snapshot) {
        warn!(error = %e, "failed to publish startup failure");
    }
}

#[cfg(test)]
#[path = "singleton_tests.rs"]
mod tests;
