//! Interception backend: the host interpreter, confined by the shim's
//! audit hook.
//!
//! The child gets a cleared environment (only the composed variables), the
//! canonical work directory as its cwd, no stdin, and is killed when the
//! execution future is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::warn;

use super::{read_pipe, shim_args, BackendKind, CapturedOutput, ExecutionBackend, POLICY_ENV};
use crate::sandbox::engine::resolve_path;
use crate::sandbox::environment::SandboxEnv;
use crate::sandbox::error::{SandboxError, SandboxResult};
use crate::sandbox::execution::ExecutionControls;
use crate::sandbox::request::PreparedExecution;

/// `PATH` given to scripts unless the caller overrides it.
pub const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Runs scripts with the probed host interpreter.
#[derive(Debug, Clone, Default)]
pub struct InterceptionBackend;

impl InterceptionBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ExecutionBackend for InterceptionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Interception
    }

    fn sandbox_work_dir(&self, host_work_dir: &Path) -> PathBuf {
        host_work_dir.to_path_buf()
    }

    fn base_env(&self, sandbox_work_dir: &Path) -> SandboxEnv {
        let mut env = SandboxEnv::new();
        env.insert("HOME", sandbox_work_dir.to_string_lossy());
        env.insert("PATH", DEFAULT_PATH);
        env.insert("LANG", "C.UTF-8");
        env
    }

    fn resolve_path(&self, path: &Path, sandbox_work_dir: &Path) -> PathBuf {
        resolve_path(path, sandbox_work_dir)
    }

    async fn execute(
        &self,
        job: &PreparedExecution,
        controls: &ExecutionControls,
    ) -> SandboxResult<CapturedOutput> {
        let program = job.image.program().ok_or(SandboxError::ImageMismatch {
            backend: "interception",
            image: job.image.kind(),
        })?;
        let policy = serde_json::to_string(&job.policy)?;

        let mut child = Command::new(program)
            .args(shim_args(&job.sandbox_script_path))
            .current_dir(&job.host_work_dir)
            .env_clear()
            .envs(job.env.iter())
            .env(POLICY_ENV, policy)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    SandboxError::BackendUnavailable(format!(
                        "interpreter {} not found",
                        program.display()
                    ))
                } else {
                    SandboxError::Io(e)
                }
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let collect = async {
            let (status, stdout, stderr) =
                tokio::try_join!(child.wait(), read_pipe(stdout), read_pipe(stderr))?;
            Ok::<_, std::io::Error>(CapturedOutput {
                stdout,
                stderr,
                // killed by a signal
                exit_code: status.code().unwrap_or(-1),
            })
        };

        let finished = match controls.timeout() {
            Some(limit) => tokio::time::timeout(limit, collect)
                .await
                .map_err(|_| limit),
            None => Ok(collect.await),
        };

        match finished {
            Ok(outcome) => Ok(outcome?),
            Err(limit) => {
                let limit_ms = limit.as_millis() as u64;
                warn!(limit_ms, "Execution timed out, killing interpreter");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out interpreter");
                }
                Err(SandboxError::Timeout { limit_ms })
            }
        }
    }
}
