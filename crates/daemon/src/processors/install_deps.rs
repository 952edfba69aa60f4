// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Install-dependencies processor.
//!
//! Drives the external toolchain/package pipeline through the provider
//! interface. Classified as a continue-kind operation: aborting a download
//! midway leaves a worse state than finishing it, so cancellation is
//! observed but not honored. Pipeline failures are collected as warnings
//! rather than failing the operation.

use crate::cancel::CancelPolicy;
use crate::context::DaemonContext;
use crate::locks::LockDomain;
use crate::processors::{ProcessorError, RequestProcessor};
use fb_core::{
    Clock, DaemonState, FailureKind, InstallDepsRequest, OperationId, OperationKind, RequestMeta,
};
use fb_engine::{IniProjectConfig, Platform, ProjectConfig};
use parking_lot::Mutex;
use tracing::{info, warn};

/// Processor for install-dependencies requests.
pub struct InstallDepsProcessor;

#[async_trait::async_trait]
impl<C: Clock + 'static> RequestProcessor<C> for InstallDepsProcessor {
    type Request = InstallDepsRequest;

    fn operation_kind(&self) -> OperationKind {
        OperationKind::InstallDeps
    }

    fn meta<'r>(&self, request: &'r InstallDepsRequest) -> &'r RequestMeta {
        &request.meta
    }

    fn required_locks(&self, request: &InstallDepsRequest) -> Vec<(LockDomain, String)> {
        vec![(
            LockDomain::Project,
            request.meta.project_dir.display().to_string(),
        )]
    }

    fn validate(&self, request: &InstallDepsRequest, _ctx: &DaemonContext<C>) -> Result<(), String> {
        if !request.meta.project_dir.exists() {
            return Err(format!(
                "project directory {} does not exist",
                request.meta.project_dir.display()
            ));
        }
        Ok(())
    }

    fn starting_state(&self) -> DaemonState {
        DaemonState::Installing
    }

    fn starting_message(&self, request: &InstallDepsRequest) -> String {
        format!(
            "Installing dependencies for {}",
            request.meta.project_dir.display()
        )
    }

    fn success_message(&self, request: &InstallDepsRequest) -> String {
        format!(
            "Dependencies ready for {}",
            request.meta.project_dir.display()
        )
    }

    fn failure_message(&self, request: &InstallDepsRequest) -> String {
        format!(
            "Dependency installation failed for {}",
            request.meta.project_dir.display()
        )
    }

    async fn execute(
        &self,
        request: &InstallDepsRequest,
        ctx: &DaemonContext<C>,
        operation_id: &OperationId,
    ) -> Result<bool, ProcessorError> {
        let meta = &request.meta;

        // Observed but not honored: install-deps is a continue-kind phase
        let _ = ctx.cancellations.check_and_raise_if_cancelled(
            &meta.request_id,
            meta.caller_pid,
            CancelPolicy::for_kind(OperationKind::InstallDeps),
        );

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

        // Progress lines are forwarded to clients through the status file
        let last_progress: Mutex<String> = Mutex::new(String::new());
        let progress = |line: &str| {
            info!(operation = %operation_id, "{line}");
            *last_progress.lock() = line.to_string();
        };

        let result = ctx
            .provider
            .ensure_installed(platform, &env, &ctx.runner, &progress)
            .await;

        match result {
            Ok(()) => {
                let final_line = last_progress.lock().clone();
                if !final_line.is_empty() {
                    ctx.status.update(
                        DaemonState::Installing,
                        final_line,
                        Some(format!("install_deps {}", meta.project_dir.display())),
                        true,
                    );
                }
                Ok(true)
            }
            Err(e) => {
                // Warning-class: report but don't fail the operation
                warn!(operation = %operation_id, error = %e, "dependency pipeline reported a problem");
                Ok(true)
            }
        }
    }
}
