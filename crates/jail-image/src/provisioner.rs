//! Memoized image provisioning
//!
//! [`ImageProvisioner`] wraps an [`ImageBuilder`] and guarantees that the
//! builder runs at most once per provisioner, even under concurrent first
//! use: the first caller builds while holding the memo lock, later callers
//! wait on the lock and receive the same handle. A failed build leaves the
//! memo empty so the next caller tries again.

use crate::docker::DockerImageBuilder;
use crate::handle::ImageHandle;
use crate::interpreter::InterpreterProbe;
use crate::Result;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Something that can produce an execution environment.
#[async_trait]
pub trait ImageBuilder: Send + Sync {
    /// Build (or locate) the environment.
    async fn build(&self) -> Result<ImageHandle>;

    /// Human-readable description for logs.
    fn describe(&self) -> String;
}

/// Builds an execution image once and hands out the memoized handle.
pub struct ImageProvisioner {
    builder: Box<dyn ImageBuilder>,
    memo: Mutex<Option<ImageHandle>>,
    builds: AtomicU32,
}

static GLOBAL_DOCKER: OnceLock<Arc<ImageProvisioner>> = OnceLock::new();
static GLOBAL_INTERPRETER: OnceLock<Arc<ImageProvisioner>> = OnceLock::new();

impl ImageProvisioner {
    /// Create a provisioner around a builder.
    pub fn new(builder: impl ImageBuilder + 'static) -> Self {
        Self {
            builder: Box::new(builder),
            memo: Mutex::new(None),
            builds: AtomicU32::new(0),
        }
    }

    /// Process-wide provisioner for the Docker image.
    pub fn global_docker() -> Arc<ImageProvisioner> {
        GLOBAL_DOCKER
            .get_or_init(|| Arc::new(ImageProvisioner::new(DockerImageBuilder::from_env())))
            .clone()
    }

    /// Process-wide provisioner for the host interpreter.
    pub fn global_interpreter() -> Arc<ImageProvisioner> {
        GLOBAL_INTERPRETER
            .get_or_init(|| Arc::new(ImageProvisioner::new(InterpreterProbe::from_env())))
            .clone()
    }

    /// Return the memoized handle, building it on first use.
    pub async fn ensure_image(&self) -> Result<ImageHandle> {
        let mut memo = self.memo.lock().await;
        if let Some(handle) = memo.as_ref() {
            debug!(image = %handle, "Reusing provisioned image");
            return Ok(handle.clone());
        }

        let attempt = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            builder = %self.builder.describe(),
            attempt = attempt,
            "Provisioning execution image"
        );

        match self.builder.build().await {
            Ok(handle) => {
                info!(image = %handle, "Execution image ready");
                *memo = Some(handle.clone());
                Ok(handle)
            }
            Err(e) => {
                warn!(error = %e, "Execution image provisioning failed");
                Err(e)
            }
        }
    }

    /// Currently memoized handle, without building.
    pub async fn cached(&self) -> Option<ImageHandle> {
        self.memo.lock().await.clone()
    }

    /// Forget the memoized handle. The image itself is left on the host.
    pub async fn invalidate(&self) -> Option<ImageHandle> {
        let previous = self.memo.lock().await.take();
        if let Some(handle) = &previous {
            info!(image = %handle, "Invalidated provisioned image");
        }
        previous
    }

    /// Number of builds started by this provisioner.
    pub fn build_count(&self) -> u32 {
        self.builds.load(Ordering::SeqCst)
    }

    /// Description of the wrapped builder.
    pub fn describe(&self) -> String {
        self.builder.describe()
    }
}

impl std::fmt::Debug for ImageProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageProvisioner")
            .field("builder", &self.builder.describe())
            .field("builds", &self.build_count())
            .finish()
    }
}
