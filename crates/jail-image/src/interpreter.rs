//! Host interpreter probe
//!
//! The interception backend runs scripts on the host Python. "Provisioning"
//! then means locating the interpreter and recording its installation
//! prefixes, which the confinement policy opens read-only.

use crate::error::ImageError;
use crate::handle::ImageHandle;
use crate::probe::{parse_probe_output, PROBE_SCRIPT};
use crate::provisioner::ImageBuilder;
use crate::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Probes a host Python interpreter.
#[derive(Debug, Clone)]
pub struct InterpreterProbe {
    program: PathBuf,
}

impl InterpreterProbe {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Create a probe from `AWSJAIL_PYTHON` (default `python3`).
    pub fn from_env() -> Self {
        Self::new(std::env::var("AWSJAIL_PYTHON").unwrap_or_else(|_| "python3".to_string()))
    }

    pub fn program(&self) -> &PathBuf {
        &self.program
    }
}

#[async_trait]
impl ImageBuilder for InterpreterProbe {
    async fn build(&self) -> Result<ImageHandle> {
        let output = Command::new(&self.program)
            .args(["-I", "-c", PROBE_SCRIPT])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    ImageError::PythonNotFound(self.program.display().to_string())
                }
                _ => ImageError::Io(e),
            })?;

        if !output.status.success() {
            return Err(ImageError::ProbeFailed(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let runtime = parse_probe_output(&output.stdout)?;
        debug!(
            program = %self.program.display(),
            version = %runtime.version,
            prefixes = runtime.read_only_prefixes.len(),
            "Probed host interpreter"
        );

        // Run scripts with the interpreter that was probed, not whatever
        // `program` resolves to under the script's own PATH.
        let program = if runtime.executable.is_absolute() {
            runtime.executable.clone()
        } else {
            self.program.clone()
        };
        Ok(ImageHandle::Interpreter { program, runtime })
    }

    fn describe(&self) -> String {
        format!("host interpreter {}", self.program.display())
    }
}

/// Check if a Python interpreter can be started
pub async fn is_python_available(program: &str) -> bool {
    match Command::new(program)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
    {
        Ok(status) => status.success(),
        Err(_) => false,
    }
}
