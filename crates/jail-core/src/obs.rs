//! Structured observability hooks for sandboxed executions.
//!
//! This module provides:
//! - Execution-scoped tracing spans via [`execution_span`] and the
//!   [`ExecutionSpan`] RAII guard
//! - Emission functions for lifecycle events (started, finished, failed),
//!   container teardown failures and breaker trips
//!
//! Credential values never reach these events; environments are logged by
//! key only.

use std::fmt::Display;

use tracing::{info, warn};

use crate::sandbox::backend::BackendKind;

/// Span covering one execution. Attach with
/// [`Instrument::instrument`](tracing::Instrument::instrument) in async code.
pub fn execution_span(execution_id: &uuid::Uuid, backend: BackendKind) -> tracing::Span {
    tracing::info_span!("awsjail.execution", execution_id = %execution_id, backend = %backend)
}

/// RAII guard that enters an execution span in synchronous code.
///
/// # Example
///
/// ```ignore
/// let _span = ExecutionSpan::enter(&id, BackendKind::Container);
/// ```
pub struct ExecutionSpan {
    _span: tracing::span::EnteredSpan,
}

impl ExecutionSpan {
    pub fn enter(execution_id: &uuid::Uuid, backend: BackendKind) -> Self {
        Self {
            _span: execution_span(execution_id, backend).entered(),
        }
    }
}

/// Emit event: execution about to start.
pub fn emit_execution_started(execution_id: &uuid::Uuid, image: &dyn Display, env_keys: usize, rules: usize) {
    info!(
        event = "execution.started",
        execution_id = %execution_id,
        image = %image,
        env_keys = env_keys,
        policy_rules = rules,
    );
}

/// Emit event: execution completed (whatever the script's exit code).
pub fn emit_execution_finished(
    execution_id: &uuid::Uuid,
    exit_code: i32,
    duration_ms: u64,
    stdout_bytes: usize,
    stderr_bytes: usize,
) {
    info!(
        event = "execution.finished",
        execution_id = %execution_id,
        exit_code = exit_code,
        duration_ms = duration_ms,
        stdout_bytes = stdout_bytes,
        stderr_bytes = stderr_bytes,
    );
}

/// Emit event: execution aborted by an infrastructure or request error.
pub fn emit_execution_failed(execution_id: &uuid::Uuid, error: &dyn Display) {
    warn!(event = "execution.failed", execution_id = %execution_id, error = %error);
}

/// Emit event: a container could not be removed.
pub fn emit_teardown_failed(container_id: &str, error: impl Display) {
    warn!(event = "container.teardown_failed", container_id = %container_id, error = %error);
}

/// Emit event: the circuit breaker opened.
pub fn emit_breaker_opened(failures: u32, threshold: u32) {
    warn!(event = "breaker.opened", failures = failures, threshold = threshold);
}
