//! Error types for the sandbox module.

use std::path::PathBuf;

use jail_image::ImageError;

/// Errors produced by the sandbox layer.
///
/// Only infrastructure problems are errors. A script that fails, including
/// one that trips the confinement policy, is reported through
/// [`ExecutionResult`](super::request::ExecutionResult) instead.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("image provisioning failed: {0}")]
    Provisioning(#[from] ImageError),

    #[error("invalid execution request: {0}")]
    InvalidRequest(String),

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("sandbox backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("container failed to start: {0}")]
    ContainerStart(String),

    #[error("{backend} backend cannot run a {image} image")]
    ImageMismatch {
        backend: &'static str,
        image: &'static str,
    },

    #[error("script execution timed out after {limit_ms}ms")]
    Timeout { limit_ms: u64 },

    #[error("script exited with status {exit_code}: {stderr}")]
    ScriptFailed { exit_code: i32, stderr: String },

    #[error("work directory {path} is unusable: {source}")]
    WorkDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SandboxError {
    /// Whether this error means the execution backend itself is unhealthy.
    ///
    /// These count against the circuit breaker; request and script errors
    /// do not.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SandboxError::Provisioning(_)
                | SandboxError::BackendUnavailable(_)
                | SandboxError::ContainerStart(_)
        )
    }
}

/// Result type for sandbox operations.
pub type SandboxResult<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_classification() {
        assert!(SandboxError::BackendUnavailable("docker".into()).is_infrastructure());
        assert!(SandboxError::ContainerStart("bad mount".into()).is_infrastructure());
        assert!(
            SandboxError::Provisioning(ImageError::DockerNotFound("docker".into()))
                .is_infrastructure()
        );
        assert!(!SandboxError::InvalidRequest("bad key".into()).is_infrastructure());
        assert!(!SandboxError::Timeout { limit_ms: 10 }.is_infrastructure());
        assert!(!SandboxError::ScriptFailed {
            exit_code: 1,
            stderr: String::new()
        }
        .is_infrastructure());
    }

    #[test]
    fn test_timeout_message_names_limit() {
        let err = SandboxError::Timeout { limit_ms: 1500 };
        assert_eq!(err.to_string(), "script execution timed out after 1500ms");
    }
}
