// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Parallel compilation queue.
//!
//! A fixed pool of worker threads executes self-contained compile jobs.
//! Submission never blocks on pool capacity; parallelism is bounded by the
//! worker count. One job failing does not cancel its siblings; outcomes
//! flow back to the submitter, which aggregates failures through the error
//! collector.

use crate::cmdline::{needs_response_file, write_response_file};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Self-contained description of one compilation unit.
#[derive(Debug, Clone)]
pub struct CompileJob {
    pub job_id: String,
    pub compiler: PathBuf,
    pub flags: Vec<String>,
    pub include_paths: Vec<PathBuf>,
    pub source: PathBuf,
    pub object: PathBuf,
}

/// Result of one compile job.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub job_id: String,
    pub ok: bool,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Queue errors.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("compilation queue is shutting down")]
    ShuttingDown,

    #[error("compilation worker dropped the job")]
    WorkerGone,
}

/// Awaitable handle to a submitted job.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub async fn wait(self) -> Result<JobOutcome, QueueError> {
        self.rx.await.map_err(|_| QueueError::WorkerGone)
    }
}

struct QueuedJob {
    job: CompileJob,
    result_tx: oneshot::Sender<JobOutcome>,
}

#[derive(Default)]
struct QueueState {
    jobs: VecDeque<QueuedJob>,
    shutting_down: bool,
}

struct Shared {
    state: Mutex<QueueState>,
    wake: Condvar,
}

/// Fixed-size worker pool for compile jobs.
pub struct CompilationQueue {
    shared: Arc<Shared>,
    workers: Mutex<Vec<std::thread::JoinHandle<()>>>,
    worker_count: usize,
}

impl CompilationQueue {
    /// Start the pool with `workers` threads (minimum 1).
    pub fn start(workers: usize) -> Self {
        let workers = workers.max(1);
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            wake: Condvar::new(),
        });

        let handles = (0..workers)
            .filter_map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("fb-compile-{i}"))
                    .spawn(move || worker_loop(shared))
                    .map_err(|e| warn!(worker = i, error = %e, "failed to spawn compile worker"))
                    .ok()
            })
            .collect();

        Self {
            shared,
            workers: Mutex::new(handles),
            worker_count: workers,
        }
    }

    /// Default pool size: one worker per available core.
    pub fn default_workers() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4)
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Submit a job. Fails fast if the queue is shutting down.
    pub fn submit(&self, job: CompileJob) -> Result<JobHandle, QueueError> {
        let (result_tx, rx) = oneshot::channel();
        let job_id = job.job_id.clone();

        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return Err(QueueError::ShuttingDown);
            }
            state.jobs.push_back(QueuedJob { job, result_tx });
        }
        self.shared.wake.notify_one();

        Ok(JobHandle { job_id, rx })
    }

    /// Stop accepting jobs, let queued and running ones finish, join workers.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.shared.wake.notify_all();

        let handles = std::mem::take(&mut *self.workers.lock());
        for handle in handles {
            if handle.join().is_err() {
                warn!("compilation worker panicked during shutdown");
            }
        }
    }

    /// Jobs waiting for a worker (not counting ones currently executing).
    pub fn pending_jobs(&self) -> usize {
        self.shared.state.lock().jobs.len()
    }
}

fn worker_loop(shared: Arc<Shared>) {
    loop {
        let queued = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    break job;
                }
                if state.shutting_down {
                    return;
                }
                shared.wake.wait(&mut state);
            }
        };

        let outcome = run_compile(&queued.job);
        // Receiver may have been dropped (caller gave up); nothing to do then
        let _ = queued.result_tx.send(outcome);
    }
}

fn run_compile(job: &CompileJob) -> JobOutcome {
    let start = Instant::now();

    if let Some(parent) = job.object.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let include_args: Vec<String> = job
        .include_paths
        .iter()
        .map(|p| format!("-I{}", p.display()))
        .collect();

    let tail = [
        "-c".to_string(),
        job.source.display().to_string(),
        "-o".to_string(),
        job.object.display().to_string(),
    ];

    let mut all_args: Vec<String> = Vec::with_capacity(job.flags.len() + include_args.len() + 4);
    all_args.extend(job.flags.iter().cloned());
    all_args.extend(include_args.iter().cloned());
    all_args.extend(tail.iter().cloned());

    // Long include lists go through a response file to stay under the OS
    // command-line limit.
    let args = if needs_response_file(&all_args) {
        match write_response_file(&job.object, &include_args) {
            Ok(rsp) => {
                let mut args: Vec<String> = job.flags.clone();
                args.push(format!("@{}", rsp.display()));
                args.extend(tail.iter().cloned());
                args
            }
            Err(e) => {
                warn!(job_id = %job.job_id, error = %e, "failed to write response file");
                all_args
            }
        }
    } else {
        all_args
    };

    debug!(job_id = %job.job_id, source = %job.source.display(), "compiling");

    match Command::new(&job.compiler).args(&args).output() {
        Ok(output) => JobOutcome {
            job_id: job.job_id.clone(),
            ok: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration: start.elapsed(),
        },
        Err(e) => JobOutcome {
            job_id: job.job_id.clone(),
            ok: false,
            stdout: String::new(),
            stderr: format!("failed to run {}: {}", job.compiler.display(), e),
            duration: start.elapsed(),
        },
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
