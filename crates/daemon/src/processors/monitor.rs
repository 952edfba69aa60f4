// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Monitor processor: stream device output, optionally pattern-matching.
//!
//! Output lines go to `<project>/.fbuild/monitor_output.txt` as they
//! arrive; the final summary lands in `monitor_summary.json`. The monitor
//! attaches to the shared serial session like any other client, so bytes
//! it sees are exactly the bytes any concurrently attached client sees.

use crate::cancel::CancelPolicy;
use crate::context::DaemonContext;
use crate::locks::LockDomain;
use crate::processors::{ProcessorError, RequestProcessor};
use crate::serial_manager::{SerialManagerError, SerialNotice};
use fb_core::paths::{monitor_output_file, monitor_summary_file, project_out_dir};
use fb_core::{
    ClientId, Clock, DaemonState, FailureKind, MonitorRequest, OperationId, OperationKind,
    PortActivity, RequestMeta,
};
use fb_storage::save_json_atomic;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// How often the monitor polls its session for new bytes.
const MONITOR_POLL: Duration = Duration::from_millis(100);

/// Cancellation is checked at most this often.
const CANCEL_CHECK_EVERY: Duration = Duration::from_secs(1);

/// Final monitor report, persisted as `monitor_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSummary {
    pub expected_found: bool,
    pub error_found: bool,
    pub success_found: bool,
    pub lines_processed: u64,
    /// Seconds the monitor ran
    pub elapsed: f64,
    /// One of `timeout`, `error_detected`, `success_detected`,
    /// `serial_error`, `cancelled`
    pub exit_reason: String,
}

impl MonitorSummary {
    /// Whether the monitored run counts as a success: no error pattern hit,
    /// and the expected pattern (when given) was seen.
    pub fn is_success(&self, expect_given: bool) -> bool {
        !self.error_found && (!expect_given || self.expected_found)
    }
}

/// Everything one monitor session needs, shared with deploy's
/// monitor-after phase.
pub(crate) struct MonitorParams<'a> {
    pub port: &'a str,
    pub baud: u32,
    pub halt_on_error: Option<&'a str>,
    pub halt_on_success: Option<&'a str>,
    pub expect: Option<&'a str>,
    pub timeout: Option<Duration>,
    pub meta: &'a RequestMeta,
}

/// Processor for monitor requests.
pub struct MonitorProcessor;

#[async_trait::async_trait]
impl<C: Clock + 'static> RequestProcessor<C> for MonitorProcessor {
    type Request = MonitorRequest;

    fn operation_kind(&self) -> OperationKind {
        OperationKind::Monitor
    }

    fn meta<'r>(&self, request: &'r MonitorRequest) -> &'r RequestMeta {
        &request.meta
    }

    fn required_locks(&self, request: &MonitorRequest) -> Vec<(LockDomain, String)> {
        vec![(LockDomain::Port, request.port.clone())]
    }

    fn validate(&self, request: &MonitorRequest, _ctx: &DaemonContext<C>) -> Result<(), String> {
        if request.port.is_empty() {
            return Err("port is required".to_string());
        }
        for pattern in [
            &request.halt_on_error,
            &request.halt_on_success,
            &request.expect,
        ]
        .into_iter()
        .flatten()
        {
            if let Err(e) = Regex::new(pattern) {
                return Err(format!("invalid pattern {pattern:?}: {e}"));
            }
        }
        Ok(())
    }

    fn starting_state(&self) -> DaemonState {
        DaemonState::Monitoring
    }

    fn starting_message(&self, request: &MonitorRequest) -> String {
        format!("Monitoring {} at {} baud", request.port, request.baud_rate)
    }

    fn success_message(&self, request: &MonitorRequest) -> String {
        format!("Monitor finished on {}", request.port)
    }

    fn failure_message(&self, request: &MonitorRequest) -> String {
        format!("Monitor failed on {}", request.port)
    }

    async fn execute(
        &self,
        request: &MonitorRequest,
        ctx: &DaemonContext<C>,
        operation_id: &OperationId,
    ) -> Result<bool, ProcessorError> {
        let params = MonitorParams {
            port: &request.port,
            baud: request.baud_rate,
            halt_on_error: request.halt_on_error.as_deref(),
            halt_on_success: request.halt_on_success.as_deref(),
            expect: request.expect.as_deref(),
            timeout: request.timeout.map(Duration::from_secs),
            meta: &request.meta,
        };

        let summary = run_monitor_session(ctx, operation_id, &params).await?;
        Ok(summary.is_success(request.expect.is_some()))
    }
}

/// Run one monitor session to completion. The caller holds the port lock.
pub(crate) async fn run_monitor_session<C: Clock + 'static>(
    ctx: &DaemonContext<C>,
    operation_id: &OperationId,
    params: &MonitorParams<'_>,
) -> Result<MonitorSummary, ProcessorError> {
    let halt_on_error = compile_pattern(params.halt_on_error)?;
    let halt_on_success = compile_pattern(params.halt_on_success)?;
    let expect = compile_pattern(params.expect)?;

    ctx.port_states.set_busy(
        params.port,
        PortActivity::Monitoring,
        params.meta.caller_pid,
        &params.meta.project_dir,
        &params.meta.environment,
        operation_id,
    );

    let client = ClientId::for_monitor(operation_id);
    let open_result = ctx.serial.open_port(params.port, params.baud, &client).await;
    if let Err(e) = open_result {
        ctx.port_states.set_idle(params.port);
        return Err(map_serial_error(params.port, e));
    }

    let result =
        stream_session(ctx, params, &client, halt_on_error, halt_on_success, expect).await;

    if let Err(e) = ctx.serial.detach_client(params.port, &client) {
        warn!(port = params.port, error = %e, "monitor detach failed");
    }
    ctx.port_states.set_idle(params.port);

    let (summary, cancelled) = result?;
    write_summary(&params.meta.project_dir, &summary);
    info!(
        port = params.port,
        lines = summary.lines_processed,
        exit_reason = %summary.exit_reason,
        "monitor session finished"
    );

    if let Some(cancel) = cancelled {
        return Err(ProcessorError::Cancelled(cancel));
    }
    Ok(summary)
}

/// Inner streaming loop, separated so cleanup runs on every exit path.
async fn stream_session<C: Clock + 'static>(
    ctx: &DaemonContext<C>,
    params: &MonitorParams<'_>,
    client: &ClientId,
    halt_on_error: Option<Regex>,
    halt_on_success: Option<Regex>,
    expect: Option<Regex>,
) -> Result<(MonitorSummary, Option<crate::cancel::CancelledError>), ProcessorError> {
    let out_dir = project_out_dir(&params.meta.project_dir);
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| ProcessorError::Internal(format!("cannot create {}: {e}", out_dir.display())))?;
    let output_path = monitor_output_file(&params.meta.project_dir);
    let mut output = std::fs::File::create(&output_path)
        .map_err(|e| ProcessorError::Internal(format!("cannot create {}: {e}", output_path.display())))?;

    let started = Instant::now();
    let mut last_cancel_check = Instant::now();
    let mut seq = 0u64;
    let mut partial = String::new();

    let mut summary = MonitorSummary {
        expected_found: false,
        error_found: false,
        success_found: false,
        lines_processed: 0,
        elapsed: 0.0,
        exit_reason: String::new(),
    };
    let mut cancelled = None;

    'monitor: loop {
        if let Some(timeout) = params.timeout {
            if started.elapsed() >= timeout {
                summary.exit_reason = "timeout".to_string();
                break;
            }
        }

        if last_cancel_check.elapsed() >= CANCEL_CHECK_EVERY {
            last_cancel_check = Instant::now();
            if let Err(e) = ctx.cancellations.check_and_raise_if_cancelled(
                &params.meta.request_id,
                params.meta.caller_pid,
                CancelPolicy::Cancellable,
            ) {
                summary.exit_reason = "cancelled".to_string();
                cancelled = Some(e);
                break;
            }
        }

        let poll = match ctx.serial.poll(params.port, client, seq) {
            Ok(poll) => poll,
            Err(e) => {
                warn!(port = params.port, error = %e, "monitor poll failed");
                summary.error_found = true;
                summary.exit_reason = "serial_error".to_string();
                break;
            }
        };
        seq = poll.new_seq;

        for notice in &poll.notices {
            if let SerialNotice::SessionError { message } = notice {
                warn!(port = params.port, message, "serial session error during monitor");
                summary.error_found = true;
                summary.exit_reason = "serial_error".to_string();
                break 'monitor;
            }
        }

        partial.push_str(&poll.data);
        while let Some(newline) = partial.find('\n') {
            let line: String = partial.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            summary.lines_processed += 1;

            if writeln!(output, "{line}").is_err() {
                warn!(path = %output_path.display(), "failed to write monitor output");
            }

            if let Some(re) = &expect {
                if re.is_match(line) {
                    summary.expected_found = true;
                }
            }
            if let Some(re) = &halt_on_error {
                if re.is_match(line) {
                    summary.error_found = true;
                    summary.exit_reason = "error_detected".to_string();
                    break 'monitor;
                }
            }
            if let Some(re) = &halt_on_success {
                if re.is_match(line) {
                    summary.success_found = true;
                    summary.exit_reason = "success_detected".to_string();
                    break 'monitor;
                }
            }
        }

        let _ = output.flush();
        tokio::time::sleep(MONITOR_POLL).await;
    }

    let _ = output.flush();
    summary.elapsed = started.elapsed().as_secs_f64();
    Ok((summary, cancelled))
}

fn compile_pattern(pattern: Option<&str>) -> Result<Option<Regex>, ProcessorError> {
    pattern
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ProcessorError::Failure(FailureKind::ConfigInvalid {
                    message: format!("invalid pattern {p:?}: {e}"),
                })
            })
        })
        .transpose()
}

fn write_summary(project_dir: &std::path::Path, summary: &MonitorSummary) {
    let path = monitor_summary_file(project_dir);
    if let Err(e) = save_json_atomic(&path, summary) {
        warn!(path = %path.display(), error = %e, "failed to write monitor summary");
    }
}

/// Map serial manager failures onto the user-facing taxonomy.
fn map_serial_error(port: &str, e: SerialManagerError) -> ProcessorError {
    let message = e.to_string();
    let kind = if message.contains("permission denied") {
        FailureKind::PortPermissionDenied {
            port: port.to_string(),
        }
    } else if message.contains("not found") {
        FailureKind::PortNotFound {
            port: port.to_string(),
        }
    } else {
        return ProcessorError::Internal(message);
    };
    ProcessorError::Failure(kind)
}
