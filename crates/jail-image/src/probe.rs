//! Python runtime probe
//!
//! A short script run by the target interpreter (on the host or inside a
//! freshly built image) that reports where the interpreter is installed.
//! The reported prefixes become the read-only part of the confinement
//! policy, so they are resolved with `realpath` on the probed side.

use crate::error::ImageError;
use crate::handle::RuntimeLayout;
use crate::Result;
use serde::Deserialize;
use std::path::PathBuf;

/// Probe source passed to `python -c`.
pub const PROBE_SCRIPT: &str = r#"
import json, os, site, sys, sysconfig
paths = sysconfig.get_paths()
found = [sys.prefix, sys.base_prefix, sys.exec_prefix, sys.base_exec_prefix]
found += [paths.get(k) for k in ("stdlib", "platstdlib", "purelib", "platlib")]
try:
    found += site.getsitepackages()
except AttributeError:
    pass
print(json.dumps({
    "version": sys.version.split()[0],
    "executable": os.path.abspath(sys.executable) if sys.executable else "",
    "prefixes": [os.path.realpath(p) for p in found if p],
}))
"#;

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    version: String,
    executable: PathBuf,
    prefixes: Vec<PathBuf>,
}

/// Parse the probe's stdout into a [`RuntimeLayout`].
///
/// Prefixes are deduplicated and any prefix nested inside another one is
/// dropped, so the policy ends up with the smallest equivalent rule set.
pub fn parse_probe_output(stdout: &[u8]) -> Result<RuntimeLayout> {
    let line = String::from_utf8_lossy(stdout);
    let line = line
        .lines()
        .rev()
        .find(|l| l.trim_start().starts_with('{'))
        .ok_or_else(|| ImageError::ProbeFailed(format!("no JSON in probe output: {line:?}")))?;

    let output: ProbeOutput = serde_json::from_str(line)?;

    let mut prefixes: Vec<PathBuf> = Vec::new();
    for prefix in output.prefixes {
        if !prefix.is_absolute() {
            continue;
        }
        if prefixes.iter().any(|p| prefix.starts_with(p)) {
            continue;
        }
        prefixes.retain(|p| !p.starts_with(&prefix));
        prefixes.push(prefix);
    }
    prefixes.sort();

    if prefixes.is_empty() {
        return Err(ImageError::ProbeFailed(
            "interpreter reported no installation prefixes".to_string(),
        ));
    }

    Ok(RuntimeLayout {
        version: output.version,
        executable: output.executable,
        read_only_prefixes: prefixes,
    })
}
