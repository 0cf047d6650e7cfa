//! Host-side configuration, read from the environment of the server process.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::sandbox::backend::BackendKind;
use crate::sandbox::error::{SandboxError, SandboxResult};
use crate::sandbox::execution::ExecutionControls;

/// Host variable naming the shared artifact directory.
pub const ARTIFACT_DIR_ENV: &str = "AWSJAIL_ARTIFACT_DIR";
/// Host variable selecting the backend (`container` or `interception`).
pub const BACKEND_ENV: &str = "AWSJAIL_BACKEND";
/// Host variable naming the docker binary.
pub const DOCKER_ENV: &str = "AWSJAIL_DOCKER";
/// Host variable with a default execution timeout in milliseconds.
pub const TIMEOUT_ENV: &str = "AWSJAIL_TIMEOUT_MS";

/// Configuration for the sandbox runner.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JailConfig {
    pub backend: BackendKind,
    /// `AWS_REGION` of the host process
    pub region: Option<String>,
    /// `AWS_DEFAULT_REGION` of the host process
    pub default_region: Option<String>,
    /// Directory shared read-write with scripts at the identical path
    pub artifact_dir: Option<PathBuf>,
    /// Docker CLI used by the container backend
    pub docker: String,
    pub controls: ExecutionControls,
}

impl Default for JailConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            region: None,
            default_region: None,
            artifact_dir: None,
            docker: "docker".to_string(),
            controls: ExecutionControls::default(),
        }
    }
}

impl JailConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> SandboxResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create a config through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> SandboxResult<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match get(BACKEND_ENV) {
            Some(value) => value.parse()?,
            None => BackendKind::default(),
        };

        let timeout_ms = match get(TIMEOUT_ENV) {
            Some(value) => Some(value.trim().parse::<u64>().map_err(|_| {
                SandboxError::InvalidConfig(format!("{TIMEOUT_ENV} must be milliseconds, got {value:?}"))
            })?),
            None => None,
        };

        Ok(Self {
            backend,
            region: get("AWS_REGION"),
            default_region: get("AWS_DEFAULT_REGION"),
            artifact_dir: get(ARTIFACT_DIR_ENV).map(PathBuf::from),
            docker: get(DOCKER_ENV).unwrap_or_else(|| "docker".to_string()),
            controls: ExecutionControls {
                timeout_ms,
                ..ExecutionControls::default()
            },
        })
    }

    pub fn with_backend(mut self, backend: BackendKind) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_artifact_dir(mut self, artifact_dir: impl Into<PathBuf>) -> Self {
        self.artifact_dir = Some(artifact_dir.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.controls.timeout_ms = Some(timeout_ms);
        self
    }
}
