//! Execution backends.
//!
//! A backend takes a fully prepared execution (script on disk, composed
//! environment, confinement policy) and runs it to completion. Both
//! backends start the interpreter through the same interception shim, so
//! policy denials look identical whichever one runs the script.

pub mod container;
pub mod interception;

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::environment::SandboxEnv;
use super::error::{SandboxError, SandboxResult};
use super::execution::ExecutionControls;
use super::policy::normalize_lexically;
use super::request::PreparedExecution;

pub use container::ContainerBackend;
pub use interception::InterceptionBackend;

/// Python source of the interception shim.
pub const SHIM_SOURCE: &str = include_str!("shim.py");

/// Variable carrying the JSON policy into the shim. The shim removes it
/// from the environment before the script runs.
pub const POLICY_ENV: &str = "AWSJAIL_POLICY";

/// Which backend runs scripts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Disposable Docker container per execution.
    #[default]
    Container,
    /// Host interpreter with audit-hook interception.
    Interception,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Container => "container",
            BackendKind::Interception => "interception",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "container" | "docker" => Ok(BackendKind::Container),
            "interception" | "host" => Ok(BackendKind::Interception),
            other => Err(SandboxError::InvalidConfig(format!(
                "unknown backend {other:?} (expected \"container\" or \"interception\")"
            ))),
        }
    }
}

/// Raw process output as returned by a backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapturedOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs prepared executions.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// The work directory as the script will see it.
    fn sandbox_work_dir(&self, host_work_dir: &Path) -> PathBuf;

    /// Variables every execution starts from; the injector layers
    /// credentials and caller overrides on top.
    fn base_env(&self, _sandbox_work_dir: &Path) -> SandboxEnv {
        SandboxEnv::new()
    }

    /// Resolve a path given in sandbox coordinates.
    fn resolve_path(&self, path: &Path, sandbox_work_dir: &Path) -> PathBuf {
        normalize_lexically(&sandbox_work_dir.join(path))
    }

    /// Run the execution to completion, honouring `controls.timeout_ms`.
    async fn execute(
        &self,
        job: &PreparedExecution,
        controls: &ExecutionControls,
    ) -> SandboxResult<CapturedOutput>;
}

/// Interpreter arguments that run `script` under the shim.
///
/// `-I` isolates the interpreter from user site-packages and `PYTHON*`
/// variables, `-B` keeps it from writing bytecode into the work directory.
pub fn shim_args(script: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-I", "-B", "-X", "utf8", "-c", SHIM_SOURCE]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(script.as_os_str().to_os_string());
    args
}

/// Drain an optional child pipe into a (lossy) string.
pub(crate) async fn read_pipe<R>(pipe: Option<R>) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
