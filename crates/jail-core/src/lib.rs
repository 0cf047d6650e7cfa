//! awsjail core library
//!
//! Runs untrusted Python scripts with injected AWS credentials under a
//! filesystem confinement policy. See [`sandbox::SandboxRunner`] for the
//! entry point.

pub mod config;
pub mod obs;
pub mod sandbox;
pub mod telemetry;

pub use config::JailConfig;

pub use sandbox::{
    evaluate_access, AccessMode, AccessVerdict, BackendKind, CircuitBreaker,
    ConfinementPolicy, ConfinementViolation, CredentialSet, ExecutionBackend, ExecutionControls,
    ExecutionRequest, ExecutionResult, FileAccess, PathAccess, PathRule, RuleScope,
    SandboxError, SandboxResult, SandboxRunner,
};

pub use obs::{
    emit_breaker_opened, emit_execution_failed, emit_execution_finished, emit_execution_started,
    emit_teardown_failed, execution_span, ExecutionSpan,
};

pub use telemetry::init_tracing;

pub use jail_image::{ImageError, ImageHandle, ImageProvisioner, RuntimeLayout};
