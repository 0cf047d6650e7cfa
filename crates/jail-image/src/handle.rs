//! Handles to provisioned execution environments.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Layout of a Python runtime as reported by the probe.
///
/// Paths belong to the environment they were probed in, which for a
/// container is the container filesystem, not the host. Prefixes are
/// canonical; `executable` is kept as launched so virtualenvs stay intact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeLayout {
    /// `sys.version` short form, e.g. "3.12.4"
    pub version: String,
    /// Absolute `sys.executable`
    pub executable: PathBuf,
    /// Installation prefixes (stdlib, site-packages, ...) readable by scripts
    pub read_only_prefixes: Vec<PathBuf>,
}

/// A provisioned execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageHandle {
    /// A Docker image built from the bundled Dockerfile
    Container {
        /// Image tag, e.g. `mcp_aws_k3x9a0qz`
        tag: String,
        /// SHA256 of the build context
        context_digest: String,
        runtime: RuntimeLayout,
    },
    /// The host Python interpreter
    Interpreter {
        program: PathBuf,
        runtime: RuntimeLayout,
    },
}

impl ImageHandle {
    /// Runtime layout regardless of handle kind.
    pub fn runtime(&self) -> &RuntimeLayout {
        match self {
            ImageHandle::Container { runtime, .. } | ImageHandle::Interpreter { runtime, .. } => {
                runtime
            }
        }
    }

    /// Read-only prefixes of the runtime.
    pub fn read_only_prefixes(&self) -> &[PathBuf] {
        &self.runtime().read_only_prefixes
    }

    /// Docker tag, for container handles.
    pub fn tag(&self) -> Option<&str> {
        match self {
            ImageHandle::Container { tag, .. } => Some(tag),
            ImageHandle::Interpreter { .. } => None,
        }
    }

    /// Interpreter program, for interpreter handles.
    pub fn program(&self) -> Option<&Path> {
        match self {
            ImageHandle::Interpreter { program, .. } => Some(program),
            ImageHandle::Container { .. } => None,
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            ImageHandle::Container { .. } => "container",
            ImageHandle::Interpreter { .. } => "interpreter",
        }
    }
}

impl std::fmt::Display for ImageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageHandle::Container {
                tag,
                context_digest,
                runtime,
            } => write!(
                f,
                "{} (python {}, context {})",
                tag,
                runtime.version,
                &context_digest[..12.min(context_digest.len())]
            ),
            ImageHandle::Interpreter { program, runtime } => {
                write!(f, "{} (python {})", program.display(), runtime.version)
            }
        }
    }
}
