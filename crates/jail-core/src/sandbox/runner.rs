//! The sandbox runner: one call per script execution.
//!
//! Steps of [`SandboxRunner::run`]:
//!
//! 1. refuse immediately while the circuit breaker is open
//! 2. create and canonicalize the work directory, write `script.py`
//! 3. provision the image (memoized per provisioner)
//! 4. compose the environment and build the confinement policy
//! 5. hand the prepared execution to the backend
//!
//! A script that exits non-zero is a successful run with a non-zero
//! `exit_code`; only infrastructure and request problems are errors.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use jail_image::ImageProvisioner;
use tracing::{debug, Instrument};
use uuid::Uuid;

use super::backend::{BackendKind, ContainerBackend, ExecutionBackend, InterceptionBackend};
use super::environment::EnvironmentInjector;
use super::error::{SandboxError, SandboxResult};
use super::execution::{CircuitBreaker, ExecutionControls};
use super::policy::ConfinementPolicy;
use super::request::{ExecutionRequest, ExecutionResult, PreparedExecution, SCRIPT_FILE_NAME};
use crate::config::JailConfig;
use crate::obs;

/// Runs scripts through one backend with one image provisioner.
///
/// Cheap to share behind an `Arc`; concurrent runs are independent apart
/// from the shared image and breaker.
pub struct SandboxRunner {
    backend: Arc<dyn ExecutionBackend>,
    provisioner: Arc<ImageProvisioner>,
    injector: EnvironmentInjector,
    controls: ExecutionControls,
    breaker: CircuitBreaker,
}

impl SandboxRunner {
    /// Runner for the configured backend, using the process-wide image
    /// provisioner of that backend.
    pub fn from_config(config: &JailConfig) -> SandboxResult<Self> {
        let (backend, provisioner): (Arc<dyn ExecutionBackend>, _) = match config.backend {
            BackendKind::Container => (
                Arc::new(ContainerBackend::from_config(config)),
                ImageProvisioner::global_docker(),
            ),
            BackendKind::Interception => (
                Arc::new(InterceptionBackend::new()),
                ImageProvisioner::global_interpreter(),
            ),
        };
        Self::new(config, backend, provisioner)
    }

    /// Runner with an explicit backend and provisioner.
    ///
    /// Creates the configured artifact directory if needed.
    pub fn new(
        config: &JailConfig,
        backend: Arc<dyn ExecutionBackend>,
        provisioner: Arc<ImageProvisioner>,
    ) -> SandboxResult<Self> {
        let artifact_dir = config
            .artifact_dir
            .as_deref()
            .map(prepare_dir)
            .transpose()?;

        Ok(Self {
            backend,
            provisioner,
            injector: EnvironmentInjector::new(
                config.region.clone(),
                config.default_region.clone(),
                artifact_dir,
            ),
            controls: config.controls.clone(),
            breaker: CircuitBreaker::new(config.controls.breaker_threshold),
        })
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn provisioner(&self) -> &Arc<ImageProvisioner> {
        &self.provisioner
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn controls(&self) -> &ExecutionControls {
        &self.controls
    }

    /// Where `host_work_dir` appears to scripts run by this runner.
    pub fn sandbox_work_dir(&self, host_work_dir: &Path) -> SandboxResult<PathBuf> {
        Ok(self.backend.sandbox_work_dir(&absolute_lexical(host_work_dir)?))
    }

    /// Execute one script.
    pub async fn run(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        let id = Uuid::new_v4();
        let span = obs::execution_span(&id, self.backend.kind());
        self.run_inner(id, request).instrument(span).await
    }

    /// Blocking variant of [`run`](Self::run) for callers without a runtime.
    ///
    /// Must not be called from inside a tokio runtime.
    pub fn run_blocking(&self, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.run(request))
    }

    /// Build the policy `run` would use for `request`, without executing.
    ///
    /// Provisions the image (for its runtime prefixes) but does not touch
    /// the work directory beyond resolving it.
    pub async fn preview_policy(&self, request: &ExecutionRequest) -> SandboxResult<ConfinementPolicy> {
        let host_work_dir = absolute_lexical(&request.work_dir)?;
        let image = self.provisioner.ensure_image().await?;
        let sandbox_work_dir = self.backend.sandbox_work_dir(&host_work_dir);
        let base = self.backend.base_env(&sandbox_work_dir);
        let env = self.injector.compose(
            &request.credentials,
            &base,
            &request.extra_env,
            &sandbox_work_dir,
        )?;
        Ok(self.policy_for(&sandbox_work_dir, image.read_only_prefixes(), env.get("HOME")))
    }

    async fn run_inner(&self, id: Uuid, request: ExecutionRequest) -> SandboxResult<ExecutionResult> {
        if self.breaker.is_open() {
            let err = SandboxError::BackendUnavailable(format!(
                "circuit breaker open after {} consecutive failures",
                self.breaker.failure_count()
            ));
            obs::emit_execution_failed(&id, &err);
            return Err(err);
        }

        let job = match self.prepare(id, &request).await {
            Ok(job) => job,
            Err(e) => return Err(self.fail(&id, e)),
        };
        obs::emit_execution_started(&id, &job.image, job.env.len(), job.policy.len());

        let started = Instant::now();
        let outcome = self.backend.execute(&job, &self.controls).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(captured) => {
                self.breaker.record_success();
                obs::emit_execution_finished(
                    &id,
                    captured.exit_code,
                    duration_ms,
                    captured.stdout.len(),
                    captured.stderr.len(),
                );
                Ok(ExecutionResult {
                    stdout: captured.stdout,
                    stderr: captured.stderr,
                    exit_code: captured.exit_code,
                    duration_ms,
                    backend: self.backend.kind(),
                })
            }
            Err(e) => Err(self.fail(&id, e)),
        }
    }

    async fn prepare(&self, id: Uuid, request: &ExecutionRequest) -> SandboxResult<PreparedExecution> {
        let host_work_dir = prepare_dir(&request.work_dir)?;
        let script_path = host_work_dir.join(SCRIPT_FILE_NAME);
        tokio::fs::write(&script_path, &request.script)
            .await
            .map_err(|source| SandboxError::WorkDir {
                path: host_work_dir.clone(),
                source,
            })?;
        debug!(path = %script_path.display(), bytes = request.script.len(), "Script written");

        let image = self.provisioner.ensure_image().await?;

        let sandbox_work_dir = self.backend.sandbox_work_dir(&host_work_dir);
        let base = self.backend.base_env(&sandbox_work_dir);
        let env = self.injector.compose(
            &request.credentials,
            &base,
            &request.extra_env,
            &sandbox_work_dir,
        )?;
        let policy = self.policy_for(&sandbox_work_dir, image.read_only_prefixes(), env.get("HOME"));

        Ok(PreparedExecution {
            id,
            image,
            host_work_dir,
            sandbox_script_path: sandbox_work_dir.join(SCRIPT_FILE_NAME),
            sandbox_work_dir,
            env,
            policy,
        })
    }

    fn policy_for(
        &self,
        sandbox_work_dir: &Path,
        runtime_prefixes: &[PathBuf],
        home: Option<&str>,
    ) -> ConfinementPolicy {
        let home = home.map(|h| self.backend.resolve_path(Path::new(h), sandbox_work_dir));
        ConfinementPolicy::for_request(
            sandbox_work_dir,
            self.injector.artifact_dir(),
            runtime_prefixes,
            home.as_deref(),
        )
    }

    fn fail(&self, id: &Uuid, err: SandboxError) -> SandboxError {
        if err.is_infrastructure() {
            let failures = self.breaker.record_failure();
            if failures == self.breaker.threshold() {
                obs::emit_breaker_opened(failures, self.breaker.threshold());
            }
        }
        obs::emit_execution_failed(id, &err);
        err
    }
}

impl std::fmt::Debug for SandboxRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRunner")
            .field("backend", &self.backend.kind())
            .field("provisioner", &self.provisioner)
            .field("controls", &self.controls)
            .field("breaker_failures", &self.breaker.failure_count())
            .finish()
    }
}

/// Create `dir` if needed and return its canonical path.
fn prepare_dir(dir: &Path) -> SandboxResult<PathBuf> {
    std::fs::create_dir_all(dir)
        .and_then(|_| dir.canonicalize())
        .map_err(|source| SandboxError::WorkDir {
            path: dir.to_path_buf(),
            source,
        })
}

/// Canonical path if `dir` exists, else the lexical absolute path.
fn absolute_lexical(dir: &Path) -> SandboxResult<PathBuf> {
    if let Ok(canonical) = dir.canonicalize() {
        return Ok(canonical);
    }
    let absolute = if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        std::env::current_dir()?.join(dir)
    };
    Ok(super::policy::normalize_lexically(&absolute))
}
