//! Jail-Image: execution environment provisioning for awsjail
//!
//! This crate makes sure a runnable Python environment exists before a
//! sandboxed script is started. Two kinds of environment are supported:
//!
//! - a Docker image built from the bundled `docker/Dockerfile`
//! - the host Python interpreter, probed for its installation prefixes
//!
//! Either way the result is an [`ImageHandle`] that is built once and
//! memoized by an [`ImageProvisioner`] for the rest of the process.

pub mod docker;
pub mod error;
pub mod handle;
pub mod interpreter;
pub mod probe;
pub mod provisioner;

pub use docker::{is_docker_available, DockerImageBuilder, IMAGE_TAG_PREFIX};
pub use error::ImageError;
pub use handle::{ImageHandle, RuntimeLayout};
pub use interpreter::{is_python_available, InterpreterProbe};
pub use provisioner::{ImageBuilder, ImageProvisioner};

/// Result type for image provisioning
pub type Result<T> = std::result::Result<T, ImageError>;
