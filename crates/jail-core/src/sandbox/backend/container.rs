//! Container backend: one disposable Docker container per execution.
//!
//! Lifecycle: `docker create` → `docker start` → `docker wait` →
//! `docker logs` → `docker rm -f`. The work directory is bind-mounted at
//! [`ContainerBackend::WORKSPACE`] and the artifact directory at its host
//! path. The script's environment travels in a private `--env-file`, so
//! credentials never appear on a command line and caller variables never
//! reach the docker CLI itself (`DOCKER_HOST` and friends stay the host's).
//!
//! Removal is owned by [`ContainerGuard`], armed on the container name
//! before `docker create` runs: it fires on every exit path, including
//! timeouts, errors and cancellation of the calling future.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::NamedTempFile;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{shim_args, BackendKind, CapturedOutput, ExecutionBackend, POLICY_ENV};
use crate::config::JailConfig;
use crate::obs;
use crate::sandbox::error::{SandboxError, SandboxResult};
use crate::sandbox::execution::ExecutionControls;
use crate::sandbox::request::PreparedExecution;

/// Label attached to every container this backend creates.
pub const EXECUTION_LABEL: &str = "awsjail.execution";

/// Name of the container for one execution.
pub fn container_name(id: &uuid::Uuid) -> String {
    format!("awsjail-{}", id.simple())
}

/// Runs scripts in containers from the provisioned image.
#[derive(Debug, Clone)]
pub struct ContainerBackend {
    docker: String,
}

impl ContainerBackend {
    /// Mount point of the work directory inside the container.
    pub const WORKSPACE: &'static str = "/workspace";

    pub fn new(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
        }
    }

    pub fn from_config(config: &JailConfig) -> Self {
        Self::new(config.docker.clone())
    }

    pub fn docker(&self) -> &str {
        &self.docker
    }

    /// Arguments for `docker create`. Variable values live in `env_file`.
    pub fn create_args(&self, job: &PreparedExecution, tag: &str, env_file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "create".into(),
            "--name".into(),
            container_name(&job.id).into(),
            "--label".into(),
            format!("{EXECUTION_LABEL}={}", job.id).into(),
            "--workdir".into(),
            job.sandbox_work_dir.as_os_str().to_os_string(),
            "--security-opt=no-new-privileges".into(),
            "--env-file".into(),
            env_file.as_os_str().to_os_string(),
        ];
        for mount in job.policy.mounts(&job.host_work_dir) {
            args.push("--mount".into());
            args.push(mount.to_docker_arg().into());
        }

        args.push(tag.into());
        args.push("python".into());
        args.extend(shim_args(&job.sandbox_script_path));
        args
    }

    async fn create(&self, job: &PreparedExecution, tag: &str) -> SandboxResult<String> {
        let env_file = write_env_file(job).await?;
        let output = Command::new(&self.docker)
            .args(self.create_args(job, tag, env_file.path()))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;
        drop(env_file);

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(classify_daemon_error(stderr));
        }

        let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if id.is_empty() {
            return Err(SandboxError::ContainerStart(
                "docker create printed no container id".to_string(),
            ));
        }
        Ok(id)
    }

    /// Start the container and collect its exit code and output.
    async fn run_to_completion(&self, id: &str) -> SandboxResult<CapturedOutput> {
        let start = self.docker_cmd(&["start", id]).await?;
        if !start.status.success() {
            return Err(SandboxError::ContainerStart(
                String::from_utf8_lossy(&start.stderr).trim().to_string(),
            ));
        }

        let wait = self.docker_cmd(&["wait", id]).await?;
        if !wait.status.success() {
            return Err(SandboxError::BackendUnavailable(format!(
                "docker wait failed: {}",
                String::from_utf8_lossy(&wait.stderr).trim()
            )));
        }
        let exit_code = parse_wait_output(&wait.stdout)?;

        let logs = self.docker_cmd(&["logs", id]).await?;
        if !logs.status.success() {
            return Err(SandboxError::BackendUnavailable(format!(
                "docker logs failed: {}",
                String::from_utf8_lossy(&logs.stderr).trim()
            )));
        }

        Ok(CapturedOutput {
            stdout: String::from_utf8_lossy(&logs.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&logs.stderr).into_owned(),
            exit_code,
        })
    }

    async fn docker_cmd(&self, args: &[&str]) -> SandboxResult<std::process::Output> {
        Command::new(&self.docker)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| self.spawn_error(e))
    }

    async fn create_and_run(
        &self,
        job: &PreparedExecution,
        tag: &str,
        controls: &ExecutionControls,
    ) -> SandboxResult<CapturedOutput> {
        let id = self.create(job, tag).await?;
        debug!(container = %id, "Container created");

        match controls.timeout() {
            Some(limit) => match tokio::time::timeout(limit, self.run_to_completion(&id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(container = %id, limit_ms = limit.as_millis() as u64, "Execution timed out");
                    Err(SandboxError::Timeout {
                        limit_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => self.run_to_completion(&id).await,
        }
    }

    fn spawn_error(&self, err: std::io::Error) -> SandboxError {
        if err.kind() == std::io::ErrorKind::NotFound {
            SandboxError::BackendUnavailable(format!("{} not found on PATH", self.docker))
        } else {
            SandboxError::Io(err)
        }
    }
}

impl Default for ContainerBackend {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait]
impl ExecutionBackend for ContainerBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Container
    }

    fn sandbox_work_dir(&self, _host_work_dir: &Path) -> PathBuf {
        PathBuf::from(Self::WORKSPACE)
    }

    async fn execute(
        &self,
        job: &PreparedExecution,
        controls: &ExecutionControls,
    ) -> SandboxResult<CapturedOutput> {
        let tag = job.image.tag().ok_or(SandboxError::ImageMismatch {
            backend: "container",
            image: job.image.kind(),
        })?;

        // armed before create: a cancelled create still gets cleaned up
        let guard = ContainerGuard::new(&self.docker, &container_name(&job.id));
        let outcome = self.create_and_run(job, tag, controls).await;
        guard.remove().await;
        outcome
    }
}

/// Removes a container when the execution is over.
///
/// [`remove`](Self::remove) tears down asynchronously; if the guard is
/// dropped without it (the future was cancelled or panicked), `Drop`
/// removes the container with a blocking CLI call.
pub struct ContainerGuard {
    docker: String,
    id: String,
    armed: bool,
}

impl ContainerGuard {
    pub fn new(docker: &str, id: &str) -> Self {
        Self {
            docker: docker.to_string(),
            id: id.to_string(),
            armed: true,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Remove the container. Failures are logged, never returned.
    pub async fn remove(mut self) -> bool {
        let result = Command::new(&self.docker)
            .args(["rm", "-f", self.id.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        self.armed = false;

        match result {
            Ok(output) if output.status.success() => {
                debug!(container = %self.id, "Container removed");
                true
            }
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_missing_container(&stderr) {
                    // create never got that far
                    debug!(container = %self.id, "No container to remove");
                    return true;
                }
                obs::emit_teardown_failed(&self.id, stderr.trim());
                false
            }
            Err(e) => {
                obs::emit_teardown_failed(&self.id, &e);
                false
            }
        }
    }
}

impl Drop for ContainerGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!(container = %self.id, "Removing container of interrupted execution");
        let removed = std::process::Command::new(&self.docker)
            .args(["rm", "-f", self.id.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        if let Err(e) = removed {
            obs::emit_teardown_failed(&self.id, &e);
        }
    }
}

/// `docker wait` prints the exit code on its own line.
fn parse_wait_output(stdout: &[u8]) -> SandboxResult<i32> {
    let text = String::from_utf8_lossy(stdout);
    text.lines()
        .rev()
        .find_map(|line| line.trim().parse::<i32>().ok())
        .ok_or_else(|| {
            SandboxError::BackendUnavailable(format!("unexpected docker wait output: {:?}", text.trim()))
        })
}

fn classify_daemon_error(stderr: String) -> SandboxError {
    if stderr.contains("Cannot connect to the Docker daemon") || stderr.contains("permission denied while trying to connect") {
        SandboxError::BackendUnavailable(stderr)
    } else {
        SandboxError::ContainerStart(stderr)
    }
}

fn is_missing_container(stderr: &str) -> bool {
    stderr.contains("No such container")
}

/// `KEY=VALUE` lines for `docker create --env-file`, the policy included.
///
/// The format has no quoting, so values containing line breaks or NUL are
/// refused rather than split into extra variables.
fn env_file_contents(job: &PreparedExecution) -> SandboxResult<String> {
    let policy = serde_json::to_string(&job.policy)?;
    let mut contents = String::new();
    let pairs = job
        .env
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .chain([(POLICY_ENV, policy.as_str())]);
    for (key, value) in pairs {
        if value.contains(['\n', '\r', '\0']) {
            return Err(SandboxError::InvalidRequest(format!(
                "value of {key} contains a line break or NUL"
            )));
        }
        contents.push_str(key);
        contents.push('=');
        contents.push_str(value);
        contents.push('\n');
    }
    Ok(contents)
}

/// Write the env file; it is created owner-only and deleted on drop.
async fn write_env_file(job: &PreparedExecution) -> SandboxResult<NamedTempFile> {
    let contents = env_file_contents(job)?;
    let file = tempfile::Builder::new().prefix("awsjail-env-").tempfile()?;
    tokio::fs::write(file.path(), contents).await?;
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::environment::SandboxEnv;
    use crate::sandbox::policy::{ConfinementPolicy, RuleScope};
    use jail_image::{ImageHandle, RuntimeLayout};

    fn job() -> PreparedExecution {
        let mut env = SandboxEnv::new();
        env.insert("AWS_SECRET_ACCESS_KEY", "s3cr3t");
        env.insert("AWS_REGION", "eu-west-1");
        PreparedExecution {
            id: uuid::Uuid::nil(),
            image: ImageHandle::Container {
                tag: "mcp_aws_abcd1234".into(),
                context_digest: "00".into(),
                runtime: RuntimeLayout {
                    version: "3.12.1".into(),
                    executable: PathBuf::from("/usr/local/bin/python3.12"),
                    read_only_prefixes: vec![PathBuf::from("/usr/local")],
                },
            },
            host_work_dir: PathBuf::from("/tmp/job-1"),
            sandbox_work_dir: PathBuf::from("/workspace"),
            sandbox_script_path: PathBuf::from("/workspace/script.py"),
            env,
            policy: ConfinementPolicy::empty()
                .allow_read_write("/workspace", RuleScope::Workspace)
                .allow_read_only("/usr/local", RuleScope::Runtime),
        }
    }

    fn arg_strings(job: &PreparedExecution) -> Vec<String> {
        ContainerBackend::default()
            .create_args(job, "mcp_aws_abcd1234", Path::new("/tmp/awsjail-env-x"))
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_create_args_keep_environment_off_argv() {
        let args = arg_strings(&job());

        assert!(!args.iter().any(|a| a.contains("s3cr3t")));
        assert!(!args.iter().any(|a| a == "--env"));
        assert!(args.windows(2).any(|w| w[0] == "--env-file" && w[1] == "/tmp/awsjail-env-x"));
    }

    #[test]
    fn test_create_args_mount_and_command() {
        let args = arg_strings(&job());

        assert_eq!(args[0], "create");
        assert!(args.windows(2).any(|w| w[0] == "--name"
            && w[1] == "awsjail-00000000000000000000000000000000"));
        assert!(args.windows(2).any(|w| w[0] == "--mount"
            && w[1] == "type=bind,source=/tmp/job-1,target=/workspace"));
        assert!(args.iter().any(|a| a == "awsjail.execution=00000000-0000-0000-0000-000000000000"));

        let tag_at = args.iter().position(|a| a == "mcp_aws_abcd1234").unwrap();
        assert_eq!(args[tag_at + 1], "python");
        assert_eq!(args.last().unwrap(), "/workspace/script.py");
    }

    #[test]
    fn test_env_file_carries_variables_and_policy() {
        let contents = env_file_contents(&job()).unwrap();
        let lines: Vec<&str> = contents.lines().collect();

        assert!(lines.contains(&"AWS_SECRET_ACCESS_KEY=s3cr3t"));
        assert!(lines.contains(&"AWS_REGION=eu-west-1"));
        let policy = lines
            .iter()
            .find_map(|l| l.strip_prefix("AWSJAIL_POLICY="))
            .unwrap();
        let parsed: ConfinementPolicy = serde_json::from_str(policy).unwrap();
        assert_eq!(parsed, job().policy);
    }

    #[test]
    fn test_env_file_refuses_multiline_values() {
        let mut job = job();
        job.env.insert("NOTE", "line one\nINJECTED=1");
        match env_file_contents(&job) {
            Err(SandboxError::InvalidRequest(msg)) => assert!(msg.contains("NOTE")),
            other => panic!("expected InvalidRequest, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_env_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let file = write_env_file(&job()).await.unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        let path = file.path().to_path_buf();
        drop(file);
        assert!(!path.exists());
    }

    /// A stand-in docker CLI that logs every call, its own environment and
    /// the env file it was handed.
    #[cfg(unix)]
    fn fake_docker(dir: &Path, create_delay_secs: u32) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let script = format!(
            r#"#!/bin/sh
echo "$*" >> "{dir}/calls.log"
env > "{dir}/cli-env-$1.txt"
case "$1" in
  create)
    while [ $# -gt 0 ]; do
      if [ "$1" = "--env-file" ]; then cp "$2" "{dir}/env-file.txt"; fi
      shift
    done
    sleep {create_delay_secs}
    echo cafebabe ;;
  wait) echo 0 ;;
  logs) echo out; echo err >&2 ;;
esac
"#,
            dir = dir.display()
        );
        let path = dir.join("docker");
        std::fs::write(&path, script).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_caller_env_never_reaches_docker_cli() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ContainerBackend::new(fake_docker(dir.path(), 0).to_string_lossy());
        let mut job = job();
        job.env.insert("DOCKER_HOST", "tcp://attacker:2375");

        let output = backend.execute(&job, &ExecutionControls::default()).await.unwrap();
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
        assert_eq!(output.exit_code, 0);

        let cli_env = std::fs::read_to_string(dir.path().join("cli-env-create.txt")).unwrap();
        assert!(!cli_env.contains("tcp://attacker:2375"));
        assert!(!cli_env.contains("s3cr3t"));

        // the container still gets it
        let env_file = std::fs::read_to_string(dir.path().join("env-file.txt")).unwrap();
        assert!(env_file.lines().any(|l| l == "DOCKER_HOST=tcp://attacker:2375"));
        assert!(env_file.lines().any(|l| l == "AWS_SECRET_ACCESS_KEY=s3cr3t"));

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        let handed = calls
            .lines()
            .next()
            .and_then(|create| create.split(' ').skip_while(|a| *a != "--env-file").nth(1))
            .unwrap();
        assert!(!Path::new(handed).exists());
        assert!(calls.lines().any(|l| l == "rm -f awsjail-00000000000000000000000000000000"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancelled_create_still_removes_container() {
        let dir = tempfile::tempdir().unwrap();
        let backend = ContainerBackend::new(fake_docker(dir.path(), 5).to_string_lossy());
        let job = job();
        let controls = ExecutionControls::default();

        let cancelled = tokio::time::timeout(
            std::time::Duration::from_millis(300),
            backend.execute(&job, &controls),
        )
        .await;
        assert!(cancelled.is_err());

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        assert!(calls.lines().next().unwrap().starts_with("create --name awsjail-"));
        assert!(calls.lines().any(|l| l == "rm -f awsjail-00000000000000000000000000000000"));
    }

    #[test]
    fn test_parse_wait_output() {
        assert_eq!(parse_wait_output(b"0\n").unwrap(), 0);
        assert_eq!(parse_wait_output(b"137\n").unwrap(), 137);
        assert!(matches!(
            parse_wait_output(b"Error: no such container"),
            Err(SandboxError::BackendUnavailable(_))
        ));
    }

    #[test]
    fn test_classify_daemon_error() {
        assert!(matches!(
            classify_daemon_error("Cannot connect to the Docker daemon at unix:///var/run/docker.sock".into()),
            SandboxError::BackendUnavailable(_)
        ));
        assert!(matches!(
            classify_daemon_error("invalid mount config".into()),
            SandboxError::ContainerStart(_)
        ));
    }

    #[tokio::test]
    async fn test_interpreter_image_is_rejected() {
        let mut job = job();
        job.image = ImageHandle::Interpreter {
            program: PathBuf::from("/usr/bin/python3"),
            runtime: RuntimeLayout {
                version: "3.11.2".into(),
                executable: PathBuf::from("/usr/bin/python3.11"),
                read_only_prefixes: vec![PathBuf::from("/usr")],
            },
        };
        let result = ContainerBackend::default()
            .execute(&job, &ExecutionControls::default())
            .await;
        match result {
            Err(SandboxError::ImageMismatch { backend, image }) => {
                assert_eq!(backend, "container");
                assert_eq!(image, "interpreter");
            }
            other => panic!("expected ImageMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_container_is_not_a_teardown_failure() {
        assert!(is_missing_container("Error response from daemon: No such container: awsjail-0"));
        assert!(!is_missing_container("Error response from daemon: removal already in progress"));
    }

    #[test]
    fn test_guard_drop_tolerates_missing_docker() {
        let guard = ContainerGuard::new("/nonexistent/docker-cli", "abc123");
        assert_eq!(guard.id(), "abc123");
        drop(guard);
    }
}
