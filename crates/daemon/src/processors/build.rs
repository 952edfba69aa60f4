// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Build processor: compile a project without touching any device.

use crate::cancel::CancelPolicy;
use crate::context::DaemonContext;
use crate::locks::LockDomain;
use crate::processors::{ProcessorError, RequestProcessor};
use fb_core::{
    BuildRequest, Clock, DaemonState, FailureKind, OperationId, OperationKind, RequestMeta,
};
use fb_engine::{
    BuildOrchestrator, BuildOutcome, ErrorCollector, IniProjectConfig, Platform, ProjectConfig,
};
use tracing::{error, info};

/// Processor for build requests.
pub struct BuildProcessor;

#[async_trait::async_trait]
impl<C: Clock + 'static> RequestProcessor<C> for BuildProcessor {
    type Request = BuildRequest;

    fn operation_kind(&self) -> OperationKind {
        OperationKind::Build
    }

    fn meta<'r>(&self, request: &'r BuildRequest) -> &'r RequestMeta {
        &request.meta
    }

    fn required_locks(&self, request: &BuildRequest) -> Vec<(LockDomain, String)> {
        vec![(
            LockDomain::Project,
            request.meta.project_dir.display().to_string(),
        )]
    }

    fn validate(&self, request: &BuildRequest, _ctx: &DaemonContext<C>) -> Result<(), String> {
        if !request.meta.project_dir.is_absolute() {
            return Err("project_dir must be absolute".to_string());
        }
        if !request.meta.project_dir.exists() {
            return Err(format!(
                "project directory {} does not exist",
                request.meta.project_dir.display()
            ));
        }
        Ok(())
    }

    fn starting_state(&self) -> DaemonState {
        DaemonState::Building
    }

    fn starting_message(&self, request: &BuildRequest) -> String {
        format!(
            "Building {} [{}]",
            request.meta.project_dir.display(),
            request.meta.environment
        )
    }

    fn success_message(&self, request: &BuildRequest) -> String {
        format!("Build succeeded for {}", request.meta.project_dir.display())
    }

    fn failure_message(&self, request: &BuildRequest) -> String {
        format!("Build failed for {}", request.meta.project_dir.display())
    }

    async fn execute(
        &self,
        request: &BuildRequest,
        ctx: &DaemonContext<C>,
        operation_id: &OperationId,
    ) -> Result<bool, ProcessorError> {
        ctx.cancellations.check_and_raise_if_cancelled(
            &request.meta.request_id,
            request.meta.caller_pid,
            CancelPolicy::for_kind(OperationKind::Build),
        )?;

        let errors = ErrorCollector::new();
        let outcome = run_build_phase(
            ctx,
            operation_id,
            &request.meta,
            request.clean_build,
            request.verbose,
            request.jobs,
            &errors,
        )
        .await?;

        if !outcome.success {
            error!(operation = %operation_id, "{}", errors.format_errors(Some(10)));
            return Ok(false);
        }

        info!(operation = %operation_id, "{}", outcome.message);
        Ok(true)
    }
}

/// Shared build phase, also run by the deploy processor.
///
/// Reads the project config, normalizes the platform, selects the
/// orchestrator, and runs it against the daemon's shared compilation queue.
pub(crate) async fn run_build_phase<C: Clock + 'static>(
    ctx: &DaemonContext<C>,
    operation_id: &OperationId,
    meta: &RequestMeta,
    clean: bool,
    verbose: bool,
    jobs: Option<usize>,
    errors: &ErrorCollector,
) -> Result<BuildOutcome, ProcessorError> {
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
    info!(operation = %operation_id, %platform, "platform selected");

    let orchestrator = BuildOrchestrator::new(
        platform,
        ctx.provider.as_ref(),
        &env,
        &meta.project_dir,
        verbose,
    )
    .map_err(|e| ProcessorError::Internal(e.to_string()))?;

    orchestrator
        .build(
            &meta.project_dir,
            &meta.environment,
            &env,
            clean,
            jobs,
            &ctx.build_deps(errors),
        )
        .await
        .map_err(|e| ProcessorError::Internal(e.to_string()))
}
