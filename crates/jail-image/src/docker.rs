//! Docker image builder
//!
//! Builds the execution image from the Dockerfile bundled with this crate.
//! Every build gets a freshly generated tag so that several processes on the
//! same host never race on one image name.

use crate::error::ImageError;
use crate::handle::ImageHandle;
use crate::probe::{parse_probe_output, PROBE_SCRIPT};
use crate::provisioner::ImageBuilder;
use crate::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Fixed build specification shipped alongside this module.
pub const DOCKERFILE: &str = include_str!("../docker/Dockerfile");

/// Prefix of every image tag built by awsjail.
pub const IMAGE_TAG_PREFIX: &str = "mcp_aws_";

/// Label carrying the build-context digest.
pub const CONTEXT_LABEL: &str = "awsjail.context";

/// Builds the execution image with the `docker` CLI.
#[derive(Debug, Clone)]
pub struct DockerImageBuilder {
    docker: String,
    dockerfile: String,
}

impl DockerImageBuilder {
    /// Create a builder using the given docker binary and the bundled Dockerfile.
    pub fn new(docker: impl Into<String>) -> Self {
        Self {
            docker: docker.into(),
            dockerfile: DOCKERFILE.to_string(),
        }
    }

    /// Create a builder from `AWSJAIL_DOCKER` (default `docker`).
    pub fn from_env() -> Self {
        Self::new(std::env::var("AWSJAIL_DOCKER").unwrap_or_else(|_| "docker".to_string()))
    }

    /// Replace the Dockerfile contents.
    pub fn with_dockerfile(mut self, dockerfile: impl Into<String>) -> Self {
        self.dockerfile = dockerfile.into();
        self
    }

    /// Docker binary this builder invokes.
    pub fn docker(&self) -> &str {
        &self.docker
    }

    /// SHA256 of the build context (currently just the Dockerfile).
    pub fn context_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(b"Dockerfile:");
        hasher.update(self.dockerfile.as_bytes());
        hex::encode(hasher.finalize())
    }

    async fn docker_build(&self, tag: &str, digest: &str) -> Result<()> {
        let context = tempfile::tempdir()?;
        let dockerfile_path = context.path().join("Dockerfile");
        tokio::fs::write(&dockerfile_path, &self.dockerfile).await?;

        let short = &digest[..12.min(digest.len())];
        info!(tag = %tag, digest = %short, "Building execution image");

        let output = Command::new(&self.docker)
            .arg("build")
            .arg("--quiet")
            .args(["--tag", tag])
            .args(["--label", &format!("{CONTEXT_LABEL}={digest}")])
            .arg("--file")
            .arg(&dockerfile_path)
            .arg(context.path())
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ImageError::BuildFailed {
                tag: tag.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        debug!(tag = %tag, "docker build finished");
        Ok(())
    }

    async fn probe_runtime(&self, tag: &str) -> Result<crate::handle::RuntimeLayout> {
        let output = Command::new(&self.docker)
            .args(["run", "--rm", "--network", "none", "--entrypoint", "python"])
            .arg(tag)
            .args(["-I", "-c", PROBE_SCRIPT])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| self.spawn_error(e))?;

        if !output.status.success() {
            return Err(ImageError::ProbeFailed(format!(
                "probe in {} exited with {}: {}",
                tag,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        parse_probe_output(&output.stdout)
    }

    /// Delete a built image that will not be used. Failures are logged.
    async fn remove_image(&self, tag: &str) {
        let removed = Command::new(&self.docker)
            .args(["rmi", "--force", tag])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await;
        match removed {
            Ok(output) if output.status.success() => debug!(tag = %tag, "Removed unusable image"),
            Ok(output) => warn!(
                tag = %tag,
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "Failed to remove unusable image"
            ),
            Err(e) => warn!(tag = %tag, error = %e, "Failed to remove unusable image"),
        }
    }

    fn spawn_error(&self, err: std::io::Error) -> ImageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            ImageError::DockerNotFound(self.docker.clone())
        } else {
            ImageError::Io(err)
        }
    }
}

/// Generate a fresh image tag: the fixed prefix plus 8 lowercase alphanumerics.
pub fn generate_image_tag() -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}{}", IMAGE_TAG_PREFIX, &suffix[..8])
}

#[async_trait]
impl ImageBuilder for DockerImageBuilder {
    async fn build(&self) -> Result<ImageHandle> {
        let tag = generate_image_tag();
        let digest = self.context_digest();

        self.docker_build(&tag, &digest).await?;
        let runtime = match self.probe_runtime(&tag).await {
            Ok(runtime) => runtime,
            Err(e) => {
                // the next attempt builds under a new tag
                self.remove_image(&tag).await;
                return Err(e);
            }
        };

        Ok(ImageHandle::Container {
            tag,
            context_digest: digest,
            runtime,
        })
    }

    fn describe(&self) -> String {
        format!("docker image via {}", self.docker)
    }
}

/// Check if the Docker daemon is reachable
pub async fn is_docker_available(docker: &str) -> bool {
    match Command::new(docker)
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(_) => false,
    }
}
