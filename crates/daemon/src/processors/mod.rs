// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request processor framework.
//!
//! Every request kind implements [`RequestProcessor`]; [`process_request`]
//! drives the common lifecycle around it: operation registration, lock
//! acquisition in a fixed domain order (project before port, so two
//! processors needing both cannot deadlock), status transitions, and
//! guaranteed lock release on every exit path.

pub mod build;
pub mod deploy;
pub mod install_deps;
pub mod monitor;

pub use build::BuildProcessor;
pub use deploy::DeployProcessor;
pub use install_deps::InstallDepsProcessor;
pub use monitor::{MonitorProcessor, MonitorSummary};

use crate::cancel::CancelledError;
use crate::context::DaemonContext;
use crate::locks::{LockDomain, ResourceGuard};
use fb_core::{
    Clock, DaemonState, FailureKind, Operation, OperationId, OperationKind, OperationState,
    RequestMeta,
};
use thiserror::Error;
use tracing::{info, warn};

/// Failures surfaced by `execute`.
#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error(transparent)]
    Cancelled(#[from] CancelledError),

    #[error("{0}")]
    Failure(FailureKind),

    #[error("{0}")]
    Internal(String),
}

impl ProcessorError {
    fn into_message(self) -> String {
        match self {
            ProcessorError::Failure(kind) => kind.to_string(),
            other => other.to_string(),
        }
    }
}

/// Capability set implemented by each concrete processor.
#[async_trait::async_trait]
pub trait RequestProcessor<C: Clock + 'static>: Send + Sync {
    type Request: Send + Sync;

    fn operation_kind(&self) -> OperationKind;

    fn meta<'r>(&self, request: &'r Self::Request) -> &'r RequestMeta;

    /// Locks this request needs, as (domain, key) pairs.
    fn required_locks(&self, request: &Self::Request) -> Vec<(LockDomain, String)>;

    /// Cheap pre-checks before any lock is taken.
    fn validate(&self, request: &Self::Request, ctx: &DaemonContext<C>) -> Result<(), String>;

    fn starting_state(&self) -> DaemonState;

    fn starting_message(&self, request: &Self::Request) -> String;
    fn success_message(&self, request: &Self::Request) -> String;
    fn failure_message(&self, request: &Self::Request) -> String;

    /// The processor-specific work. `Ok(true)` is success, `Ok(false)` a
    /// reported failure; errors are translated by the framework.
    async fn execute(
        &self,
        request: &Self::Request,
        ctx: &DaemonContext<C>,
        operation_id: &OperationId,
    ) -> Result<bool, ProcessorError>;
}

/// Outcome of the framework, for callers that report back to clients.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutcome {
    pub operation_id: OperationId,
    pub state: OperationState,
    pub message: String,
}

/// Drive one request through the full lifecycle.
pub async fn process_request<C, P>(
    processor: &P,
    request: &P::Request,
    ctx: &DaemonContext<C>,
) -> ProcessOutcome
where
    C: Clock + 'static,
    P: RequestProcessor<C>,
{
    let meta = processor.meta(request);
    let kind = processor.operation_kind();
    let operation_id = OperationId::generate();
    let description = format!(
        "{} {} [{}]",
        kind,
        meta.project_dir.display(),
        meta.request_id
    );

    let operation = Operation::new(
        operation_id.clone(),
        kind,
        meta.project_dir.clone(),
        meta.environment.clone(),
        meta.request_id.clone(),
        meta.caller_pid,
        &ctx.clock,
    );
    ctx.registry.register_operation(operation);
    info!(operation = %operation_id, %kind, project = %meta.project_dir.display(), "operation accepted");

    // The request ID names the cancel signal file; refuse anything that
    // can't safely appear in a filename before touching the filesystem
    if !meta.request_id.is_path_safe() {
        return finish(
            ctx,
            processor,
            request,
            &operation_id,
            OperationState::Failed,
            format!(
                "{}: request id is not filesystem-safe",
                processor.failure_message(request)
            ),
            description,
        );
    }

    if let Err(message) = processor.validate(request, ctx) {
        return finish(
            ctx,
            processor,
            request,
            &operation_id,
            OperationState::Failed,
            format!("{}: {}", processor.failure_message(request), message),
            description,
        );
    }

    // Deterministic order: Project sorts before Port, keys tie-break
    let mut required = processor.required_locks(request);
    required.sort();

    let mut guards: Vec<ResourceGuard> = Vec::with_capacity(required.len());
    for (domain, key) in &required {
        match ctx.locks.try_acquire(*domain, key, operation_id.as_str()) {
            Ok(guard) => guards.push(guard),
            Err(_) => {
                let failure = FailureKind::LockUnavailable {
                    resource: format!("{domain} {key}"),
                };
                warn!(operation = %operation_id, %domain, key, "lock unavailable");
                drop(guards); // release anything already acquired
                return finish(
                    ctx,
                    processor,
                    request,
                    &operation_id,
                    OperationState::Failed,
                    failure.to_string(),
                    description,
                );
            }
        }
    }

    ctx.registry
        .update_state(&operation_id, OperationState::Running);
    ctx.set_operation_in_progress(true);
    ctx.status.update(
        processor.starting_state(),
        processor.starting_message(request),
        Some(description.clone()),
        true,
    );

    let result = processor.execute(request, ctx, &operation_id).await;

    // Release in reverse acquisition order
    while let Some(guard) = guards.pop() {
        drop(guard);
    }

    let (state, message) = match result {
        Ok(true) => (OperationState::Completed, processor.success_message(request)),
        Ok(false) => (OperationState::Failed, processor.failure_message(request)),
        Err(ProcessorError::Cancelled(e)) => (
            OperationState::Cancelled,
            FailureKind::Cancelled { source: e.source }.to_string(),
        ),
        Err(e) => (
            OperationState::Failed,
            format!("{}: {}", processor.failure_message(request), e.into_message()),
        ),
    };

    finish(ctx, processor, request, &operation_id, state, message, description)
}

fn finish<C, P>(
    ctx: &DaemonContext<C>,
    processor: &P,
    request: &P::Request,
    operation_id: &OperationId,
    state: OperationState,
    message: String,
    description: String,
) -> ProcessOutcome
where
    C: Clock + 'static,
    P: RequestProcessor<C>,
{
    let meta = processor.meta(request);

    ctx.registry.update_state(operation_id, state);
    if state != OperationState::Completed {
        ctx.registry.set_error(operation_id, message.clone());
    }

    let daemon_state = match state {
        OperationState::Completed => DaemonState::Completed,
        _ => DaemonState::Failed,
    };
    ctx.set_operation_in_progress(false);
    ctx.status
        .update(daemon_state, message.clone(), Some(description), false);
    if meta.request_id.is_path_safe() {
        ctx.cancellations.clear(&meta.request_id);
    }

    info!(operation = %operation_id, %state, "operation finished");
    ProcessOutcome {
        operation_id: operation_id.clone(),
        state,
        message,
    }
}

#[cfg(test)]
#[path = "framework_tests.rs"]
mod tests;

