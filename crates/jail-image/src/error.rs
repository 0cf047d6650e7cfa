//! Error types for jail-image

use thiserror::Error;

/// Errors that can occur while provisioning an execution image
#[derive(Error, Debug)]
pub enum ImageError {
    /// Docker CLI not found
    #[error("Docker is not installed or not in PATH ({0})")]
    DockerNotFound(String),

    /// Python interpreter not found
    #[error("Python interpreter not found: {0}")]
    PythonNotFound(String),

    /// `docker build` exited unsuccessfully
    #[error("Image build failed for {tag}: {stderr}")]
    BuildFailed { tag: String, stderr: String },

    /// The runtime probe could not be run or parsed
    #[error("Runtime probe failed: {0}")]
    ProbeFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),
}
