//! Sandbox: confined execution of untrusted Python scripts.
//!
//! Every execution gets a fresh environment built from the caller's
//! credentials, and a default-deny, first-match-wins path policy that the
//! interception shim enforces inside the interpreter. The container backend
//! adds process and filesystem isolation on top.
//!
//! # Modules
//!
//! - [`credentials`] : `CredentialSet` (redacted in `Debug`)
//! - [`request`]     : `ExecutionRequest`, `ExecutionResult`, `PreparedExecution`
//! - [`environment`] : `SandboxEnv`, `EnvironmentInjector`
//! - [`policy`]      : `PathRule`, `ConfinementPolicy::for_request()`
//! - [`engine`]      : `evaluate_access()` (first-match, default-deny)
//! - [`backend`]     : `ExecutionBackend`, container and interception backends
//! - [`execution`]   : `ExecutionControls`, `CircuitBreaker`
//! - [`runner`]      : `SandboxRunner`
//! - [`error`]       : `SandboxError` / `SandboxResult`

pub mod backend;
pub mod credentials;
pub mod engine;
pub mod environment;
pub mod error;
pub mod execution;
pub mod policy;
pub mod request;
pub mod runner;

pub use backend::{
    BackendKind, CapturedOutput, ContainerBackend, ExecutionBackend, InterceptionBackend,
};
pub use credentials::CredentialSet;
pub use engine::{evaluate_access, AccessVerdict, ConfinementViolation, FileAccess};
pub use environment::{EnvironmentInjector, SandboxEnv, ARTIFACT_DIR_VAR};
pub use error::{SandboxError, SandboxResult};
pub use execution::{CircuitBreaker, ExecutionControls};
pub use policy::{AccessMode, ConfinementPolicy, Mount, PathAccess, PathRule, RuleScope};
pub use request::{ExecutionRequest, ExecutionResult, PreparedExecution, SCRIPT_FILE_NAME};
pub use runner::SandboxRunner;
