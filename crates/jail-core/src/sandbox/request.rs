//! Execution request and result types.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::backend::BackendKind;
use super::credentials::CredentialSet;
use super::error::{SandboxError, SandboxResult};

/// File name the script is persisted under inside the work directory.
pub const SCRIPT_FILE_NAME: &str = "script.py";

/// One script execution, constructed per call and discarded afterwards.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    /// Python source to run.
    pub script: String,
    /// Host directory the script may read and write. Created if missing,
    /// never deleted.
    pub work_dir: PathBuf,
    pub credentials: CredentialSet,
    /// Extra variables for the script; these win over computed defaults.
    pub extra_env: BTreeMap<String, String>,
}

impl ExecutionRequest {
    pub fn new(work_dir: impl Into<PathBuf>, script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            work_dir: work_dir.into(),
            credentials: CredentialSet::empty(),
            extra_env: BTreeMap::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialSet) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn with_envs<K, V>(mut self, vars: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.extra_env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Where the script lands on the host.
    pub fn script_path(&self) -> PathBuf {
        self.work_dir.join(SCRIPT_FILE_NAME)
    }
}

/// Captured outcome of one sandboxed run.
///
/// `exit_code == 0` means the script ran to completion without an uncaught
/// error. Non-zero means a script error or a confinement violation the
/// script did not handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Wall-clock time from process start to exit.
    pub duration_ms: u64,
    pub backend: BackendKind,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// stdout followed by stderr, for callers that want one stream.
    pub fn combined_output(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) if self.stdout.ends_with('\n') => {
                format!("{}{}", self.stdout, self.stderr)
            }
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }

    /// Turn a non-zero exit into an error, for "success or exception" callers.
    pub fn ensure_success(self) -> SandboxResult<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SandboxError::ScriptFailed {
                exit_code: self.exit_code,
                stderr: self.stderr,
            })
        }
    }
}

/// Everything a backend needs to start one execution.
#[derive(Debug, Clone)]
pub struct PreparedExecution {
    pub id: uuid::Uuid,
    pub image: jail_image::ImageHandle,
    /// Canonical host work directory.
    pub host_work_dir: PathBuf,
    /// Work directory as the script sees it.
    pub sandbox_work_dir: PathBuf,
    /// Script path as the script sees it.
    pub sandbox_script_path: PathBuf,
    pub env: super::environment::SandboxEnv,
    pub policy: super::policy::ConfinementPolicy,
}
