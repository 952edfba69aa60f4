// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deploy processor: build, flash, optionally monitor.
//!
//! The firmware ledger is consulted before flashing: when the device
//! verifiably runs this exact firmware already, the upload is skipped.
//! A successful upload is recorded immediately; a later monitor timeout
//! does not un-record it, because the firmware *is* on the device.
//!
//! Cancellation is honored up to the moment the flasher starts; from then
//! until the upload completes the operation continues regardless, since
//! aborting mid-write can leave the device unbootable. It becomes
//! cancellable again before monitor-after begins.

use crate::cancel::CancelPolicy;
use crate::context::DaemonContext;
use crate::locks::LockDomain;
use crate::processors::build::run_build_phase;
use crate::processors::monitor::{run_monitor_session, MonitorParams};
use crate::processors::{ProcessorError, RequestProcessor};
use fb_core::{
    Clock, DaemonState, DeployRequest, FailureKind, OperationId, OperationKind, PortActivity,
    RequestMeta,
};
use fb_engine::{
    BuildOutcome, ErrorCollector, IniProjectConfig, Platform, ProjectConfig,
};
use fb_adapters::SubprocessError;
use std::time::Duration;
use tracing::{info, warn};

/// Processor for deploy requests.
pub struct DeployProcessor;

#[async_trait::async_trait]
impl<C: Clock + 'static> RequestProcessor<C> for DeployProcessor {
    type Request = DeployRequest;

    fn operation_kind(&self) -> OperationKind {
        OperationKind::Deploy
    }

    fn meta<'r>(&self, request: &'r DeployRequest) -> &'r RequestMeta {
        &request.meta
    }

    fn required_locks(&self, request: &DeployRequest) -> Vec<(LockDomain, String)> {
        let mut locks = vec![(
            LockDomain::Project,
            request.meta.project_dir.display().to_string(),
        )];
        if let Some(port) = &request.port {
            locks.push((LockDomain::Port, port.clone()));
        }
        locks
    }

    fn validate(&self, request: &DeployRequest, _ctx: &DaemonContext<C>) -> Result<(), String> {
        if !request.meta.project_dir.exists() {
            return Err(format!(
                "project directory {} does not exist",
                request.meta.project_dir.display()
            ));
        }
        if request.monitor_after && request.port.is_none() {
            return Err("monitor_after requires an explicit port".to_string());
        }
        Ok(())
    }

    fn starting_state(&self) -> DaemonState {
        DaemonState::Deploying
    }

    fn starting_message(&self, request: &DeployRequest) -> String {
        match &request.port {
            Some(port) => format!(
                "Deploying {} to {}",
                request.meta.project_dir.display(),
                port
            ),
            None => format!("Deploying {}", request.meta.project_dir.display()),
        }
    }

    fn success_message(&self, request: &DeployRequest) -> String {
        format!("Deploy succeeded for {}", request.meta.project_dir.display())
    }

    fn failure_message(&self, request: &DeployRequest) -> String {
        format!("Deploy failed for {}", request.meta.project_dir.display())
    }

    async fn execute(
        &self,
        request: &DeployRequest,
        ctx: &DaemonContext<C>,
        operation_id: &OperationId,
    ) -> Result<bool, ProcessorError> {
        let meta = &request.meta;
        ctx.cancellations.check_and_raise_if_cancelled(
            &meta.request_id,
            meta.caller_pid,
            CancelPolicy::Cancellable,
        )?;

        // Build phase
        let errors = ErrorCollector::new();
        let outcome = run_build_phase(
            ctx,
            operation_id,
            meta,
            request.clean_build,
            request.verbose,
            request.jobs,
            &errors,
        )
        .await?;
        if !outcome.success {
            warn!(operation = %operation_id, "{}", errors.format_errors(Some(10)));
            return Ok(false);
        }

        ctx.cancellations.check_and_raise_if_cancelled(
            &meta.request_id,
            meta.caller_pid,
            CancelPolicy::Cancellable,
        )?;

        // Upload phase
        let uploaded = self
            .upload_phase(request, ctx, operation_id, &outcome)
            .await?;
        if !uploaded {
            return Ok(false);
        }

        // Monitor-after phase (port lock is still held by this operation)
        if request.monitor_after {
            ctx.cancellations.check_and_raise_if_cancelled(
                &meta.request_id,
                meta.caller_pid,
                CancelPolicy::Cancellable,
            )?;

            let Some(port) = request.port.as_deref() else {
                return Ok(true); // validated earlier; defensive
            };
            let params = MonitorParams {
                port,
                baud: monitor_baud(meta),
                halt_on_error: request.monitor_halt_on_error.as_deref(),
                halt_on_success: request.monitor_halt_on_success.as_deref(),
                expect: request.monitor_expect.as_deref(),
                timeout: request.monitor_timeout.map(Duration::from_secs),
                meta,
            };
            let summary = run_monitor_session(ctx, operation_id, &params).await?;
            return Ok(summary.is_success(request.monitor_expect.is_some()));
        }

        Ok(true)
    }
}

impl DeployProcessor {
    /// Flash the firmware unless the ledger says the device already runs it.
    ///
    /// Returns `Ok(true)` when the device ends up running the firmware
    /// (fresh upload or verified current).
    async fn upload_phase<C: Clock + 'static>(
        &self,
        request: &DeployRequest,
        ctx: &DaemonContext<C>,
        operation_id: &OperationId,
        outcome: &BuildOutcome,
    ) -> Result<bool, ProcessorError> {
        let meta = &request.meta;
        let (Some(firmware_path), Some(firmware_hash), Some(source_hash)) = (
            outcome.firmware_path.as_ref(),
            outcome.firmware_hash.as_deref(),
            outcome.source_hash.as_deref(),
        ) else {
            return Err(ProcessorError::Internal(
                "build outcome missing firmware artifacts".to_string(),
            ));
        };

        // Skip when the ledger proves the device is current
        if let Some(port) = request.port.as_deref() {
            let needs = ctx.ledger.needs_redeploy(
                port,
                source_hash,
                &outcome.build_flags_hash,
                Some(&meta.project_dir),
                Some(&meta.environment),
            );
            if !needs && ctx.ledger.is_current(port, firmware_hash) {
                info!(operation = %operation_id, port, "firmware already current, skipping upload");
                return Ok(true);
            }
        }

        let config = IniProjectConfig::load(&meta.project_dir).map_err(|e| {
            ProcessorError::Failure(FailureKind::ConfigInvalid {
                message: e.to_string(),
            })
        })?;
        let env = config.env_config(&meta.environment).map_err(|e| {
            ProcessorError::Failure(FailureKind::ConfigInvalid {
                message: e.to_string(),
            })
        })?;
        let platform = Platform::normalize(&env.platform).map_err(|e| {
            ProcessorError::Failure(FailureKind::ConfigInvalid {
                message: e.to_string(),
            })
        })?;

        let cmd = ctx
            .provider
            .flash_command(platform, &env, request.port.as_deref(), firmware_path)
            .map_err(|e| ProcessorError::Internal(e.to_string()))?;

        // Mark the port and preempt any shared session for the duration
        if let Some(port) = request.port.as_deref() {
            ctx.port_states.set_busy(
                port,
                PortActivity::Uploading,
                meta.caller_pid,
                &meta.project_dir,
                &meta.environment,
                operation_id,
            );
            let preempted = ctx.serial.preempt_for_upload(port);
            if !preempted.is_empty() {
                info!(port, clients = preempted.len(), "preempted serial clients for upload");
            }
        }

        info!(operation = %operation_id, firmware = %firmware_path.display(), "starting upload");
        // From here until the flasher returns the operation continues even
        // if cancelled: an interrupted flash can brick the device.
        let (execution_id, result) = ctx.runner.run(cmd).await;
        ctx.registry.add_subprocess_id(operation_id, &execution_id);

        if let Some(port) = request.port.as_deref() {
            ctx.port_states.set_idle(port);
        }

        match result {
            Ok(output) if output.success() => {
                if let Some(port) = request.port.as_deref() {
                    if let Err(e) = ctx.ledger.record_deployment(
                        port,
                        firmware_hash,
                        source_hash,
                        &meta.project_dir,
                        &meta.environment,
                        &outcome.build_flags_hash,
                    ) {
                        warn!(port, error = %e, "failed to record deployment in ledger");
                    }
                }
                info!(operation = %operation_id, elapsed = ?output.elapsed, "upload complete");
                Ok(true)
            }
            Ok(output) => Err(ProcessorError::Failure(FailureKind::SubprocessFailed {
                exit_code: output.exit_code,
                phase: "upload".to_string(),
                stderr: truncate(&output.stderr, 500),
            })),
            Err(SubprocessError::Timeout { bound, .. }) => {
                Err(ProcessorError::Failure(FailureKind::SubprocessTimedOut {
                    bound,
                    phase: "upload".to_string(),
                }))
            }
            Err(e) => Err(ProcessorError::Internal(e.to_string())),
        }
    }
}

/// Baud for deploy's monitor-after: the project's `monitor_speed`, or the
/// conventional default.
fn monitor_baud(meta: &RequestMeta) -> u32 {
    IniProjectConfig::load(&meta.project_dir)
        .ok()
        .and_then(|config| config.env_config(&meta.environment).ok())
        .and_then(|env| env.monitor_speed)
        .unwrap_or(115_200)
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut cut = max;
        while !s.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}...", &s[..cut])
    }
}
