// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Watchdog-bounded subprocess execution.
//!
//! External toolchain programs (compilers, linkers, flashers) run under two
//! bounds: a total wall-clock timeout and an inactivity timeout that fires
//! when neither stream produces a byte for the configured window. A flasher
//! blocked in driver I/O can ignore cooperative termination, so the kill
//! path escalates SIGTERM to SIGKILL after a grace period.

use fb_core::TimeoutBound;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// How often the watchdog re-checks the child and its bounds.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Grace period between SIGTERM and SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Default number of execution records retained for statistics.
const DEFAULT_MAX_HISTORY: usize = 1000;

/// Description of one watchdog-bounded command.
#[derive(Debug, Clone)]
pub struct WatchdogCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Total wall-clock bound
    pub total_timeout: Duration,
    /// Kill if neither stream produces output for this long
    pub idle_timeout: Duration,
}

impl WatchdogCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            env: Vec::new(),
            total_timeout: Duration::from_secs(300),
            idle_timeout: Duration::from_secs(5),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

/// Result of a clean (possibly non-zero) exit.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Watchdog execution errors.
#[derive(Debug, Error)]
pub enum SubprocessError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error while supervising subprocess: {0}")]
    Io(#[from] std::io::Error),

    /// A bound was hit; carries whatever output was captured before the kill.
    #[error("subprocess exceeded {bound} timeout after {elapsed:?}")]
    Timeout {
        bound: TimeoutBound,
        stdout: String,
        stderr: String,
        elapsed: Duration,
    },
}

/// One recorded execution, for the bounded history.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub program: String,
    pub exit_code: Option<i32>,
    pub error: Option<String>,
    pub elapsed: Option<Duration>,
}

impl ExecutionRecord {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0) && self.error.is_none()
    }
}

/// Aggregate statistics over the execution history.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerStatistics {
    pub total_executions: usize,
    pub successful: usize,
    pub failed: usize,
    pub average_duration: Duration,
}

/// Runs external programs under the watchdog and records every execution.
#[derive(Clone)]
pub struct WatchdogRunner {
    inner: Arc<RunnerState>,
}

struct RunnerState {
    history: Mutex<HashMap<String, ExecutionRecord>>,
    order: Mutex<Vec<String>>,
    counter: Mutex<u64>,
    max_history: usize,
}

impl Default for WatchdogRunner {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_HISTORY)
    }
}

impl WatchdogRunner {
    pub fn new(max_history: usize) -> Self {
        Self {
            inner: Arc::new(RunnerState {
                history: Mutex::new(HashMap::new()),
                order: Mutex::new(Vec::new()),
                counter: Mutex::new(0),
                max_history,
            }),
        }
    }

    /// Run `cmd` to completion or until a bound fires.
    ///
    /// Returns the execution ID alongside the outcome so callers can link the
    /// record into their operation.
    pub async fn run(
        &self,
        cmd: WatchdogCommand,
    ) -> (String, Result<CommandOutput, SubprocessError>) {
        let execution_id = self.register(&cmd);
        let result = run_watchdog(&cmd).await;
        self.finish(&execution_id, &result);
        (execution_id, result)
    }

    fn register(&self, cmd: &WatchdogCommand) -> String {
        let mut counter = self.inner.counter.lock();
        *counter += 1;
        let execution_id = format!("subprocess-{}", *counter);
        drop(counter);

        let record = ExecutionRecord {
            execution_id: execution_id.clone(),
            program: cmd.program.display().to_string(),
            exit_code: None,
            error: None,
            elapsed: None,
        };

        let mut history = self.inner.history.lock();
        let mut order = self.inner.order.lock();
        history.insert(execution_id.clone(), record);
        order.push(execution_id.clone());

        // Evict oldest completed records beyond the cap
        while order.len() > self.inner.max_history {
            let oldest = order.remove(0);
            history.remove(&oldest);
        }

        debug!(execution_id, program = %cmd.program.display(), "subprocess starting");
        execution_id
    }

    fn finish(&self, execution_id: &str, result: &Result<CommandOutput, SubprocessError>) {
        let mut history = self.inner.history.lock();
        let Some(record) = history.get_mut(execution_id) else {
            return;
        };
        match result {
            Ok(output) => {
                record.exit_code = Some(output.exit_code);
                record.elapsed = Some(output.elapsed);
            }
            Err(SubprocessError::Timeout { bound, elapsed, .. }) => {
                record.error = Some(format!("{bound} timeout"));
                record.elapsed = Some(*elapsed);
            }
            Err(e) => {
                record.error = Some(e.to_string());
            }
        }
    }

    pub fn get_execution(&self, execution_id: &str) -> Option<ExecutionRecord> {
        self.inner.history.lock().get(execution_id).cloned()
    }

    pub fn get_statistics(&self) -> RunnerStatistics {
        let history = self.inner.history.lock();
        let total = history.len();
        let successful = history.values().filter(|r| r.succeeded()).count();

        let durations: Vec<Duration> = history
            .values()
            .filter(|r| r.succeeded())
            .filter_map(|r| r.elapsed)
            .collect();
        let average_duration = if durations.is_empty() {
            Duration::ZERO
        } else {
            durations.iter().sum::<Duration>() / durations.len() as u32
        };

        RunnerStatistics {
            total_executions: total,
            successful,
            failed: total - successful,
            average_duration,
        }
    }

    /// Most recent failures, newest first.
    pub fn get_recent_failures(&self, count: usize) -> Vec<ExecutionRecord> {
        let history = self.inner.history.lock();
        let order = self.inner.order.lock();
        order
            .iter()
            .rev()
            .filter_map(|id| history.get(id))
            .filter(|r| !r.succeeded() && (r.exit_code.is_some() || r.error.is_some()))
            .take(count)
            .cloned()
            .collect()
    }

    pub fn clear_history(&self) {
        self.inner.history.lock().clear();
        self.inner.order.lock().clear();
    }
}

async fn run_watchdog(cmd: &WatchdogCommand) -> Result<CommandOutput, SubprocessError> {
    let start = Instant::now();

    let mut command = Command::new(&cmd.program);
    command
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &cmd.cwd {
        command.current_dir(cwd);
    }
    for (key, value) in &cmd.env {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(|source| SubprocessError::Spawn {
        program: cmd.program.display().to_string(),
        source,
    })?;

    let stdout_buf = Arc::new(Mutex::new(Vec::new()));
    let stderr_buf = Arc::new(Mutex::new(Vec::new()));
    let last_activity = Arc::new(Mutex::new(Instant::now()));

    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| spawn_capture(pipe, Arc::clone(&stdout_buf), Arc::clone(&last_activity)));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| spawn_capture(pipe, Arc::clone(&stderr_buf), Arc::clone(&last_activity)));

    enum WaitOutcome {
        Exited(std::process::ExitStatus),
        TimedOut(TimeoutBound),
    }

    let outcome = loop {
        if let Some(status) = child.try_wait()? {
            break WaitOutcome::Exited(status);
        }
        if start.elapsed() > cmd.total_timeout {
            break WaitOutcome::TimedOut(TimeoutBound::Total);
        }
        if last_activity.lock().elapsed() > cmd.idle_timeout {
            break WaitOutcome::TimedOut(TimeoutBound::Inactivity);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    };

    match outcome {
        WaitOutcome::Exited(status) => {
            // Drain capture tasks before reading the buffers
            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }

            Ok(CommandOutput {
                exit_code: status.code().unwrap_or(-1),
                stdout: String::from_utf8_lossy(&stdout_buf.lock()).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf.lock()).into_owned(),
                elapsed: start.elapsed(),
            })
        }
        WaitOutcome::TimedOut(bound) => {
            warn!(
                program = %cmd.program.display(),
                %bound,
                elapsed = ?start.elapsed(),
                "subprocess watchdog fired, killing child"
            );
            kill_with_escalation(&mut child).await;

            if let Some(task) = stdout_task {
                task.abort();
            }
            if let Some(task) = stderr_task {
                task.abort();
            }

            Err(SubprocessError::Timeout {
                bound,
                stdout: String::from_utf8_lossy(&stdout_buf.lock()).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf.lock()).into_owned(),
                elapsed: start.elapsed(),
            })
        }
    }
}

fn spawn_capture<R>(
    mut pipe: R,
    buf: Arc<Mutex<Vec<u8>>>,
    last_activity: Arc<Mutex<Instant>>,
) -> tokio::task::JoinHandle<()>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    buf.lock().extend_from_slice(&chunk[..n]);
                    *last_activity.lock() = Instant::now();
                }
            }
        }
    })
}

/// SIGTERM, wait [`KILL_GRACE`], then SIGKILL.
#[cfg(unix)]
async fn kill_with_escalation(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);

        let deadline = Instant::now() + KILL_GRACE;
        while Instant::now() < deadline {
            match child.try_wait() {
                Ok(Some(_)) => return,
                Ok(None) => tokio::time::sleep(Duration::from_millis(50)).await,
                Err(_) => break,
            }
        }
    }

    // Still running (or no PID): force-kill
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn kill_with_escalation(child: &mut Child) {
    // No cooperative signal that drivers respect; go straight to the
    // kernel-level kill.
    let _ = child.kill().await;
}

#[cfg(test)]
#[path = "subprocess_tests.rs"]
mod tests;
