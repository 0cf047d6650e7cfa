//! Access evaluation engine: canonical resolution, first match wins, default deny.
//!
//! The same decision procedure runs inside the sandbox (the interception
//! shim mirrors it in Python); this module is the reference used on the host
//! for validation, the CLI, and tests.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::policy::{AccessMode, ConfinementPolicy, PathAccess};

/// A single file-access attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAccess {
    pub path: PathBuf,
    pub mode: AccessMode,
}

impl FileAccess {
    pub fn read(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: AccessMode::Read,
        }
    }

    pub fn write(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: AccessMode::Write,
        }
    }
}

/// Why an access was refused. The messages match the `PermissionError`
/// text raised inside the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfinementViolation {
    #[error("Access to '{}' is not allowed", .path.display())]
    NotAllowed { path: PathBuf },

    #[error("Write access denied to '{}'", .path.display())]
    WriteDenied { path: PathBuf },
}

impl ConfinementViolation {
    pub fn path(&self) -> &Path {
        match self {
            ConfinementViolation::NotAllowed { path }
            | ConfinementViolation::WriteDenied { path } => path,
        }
    }
}

/// Outcome of evaluating a [`FileAccess`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessVerdict {
    /// Allowed; carries the resolved path that was checked.
    Allowed { resolved: PathBuf },
    Denied(ConfinementViolation),
}

impl AccessVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AccessVerdict::Allowed { .. })
    }

    /// Convert into a `Result`, for `?` at call sites.
    pub fn into_result(self) -> Result<PathBuf, ConfinementViolation> {
        match self {
            AccessVerdict::Allowed { resolved } => Ok(resolved),
            AccessVerdict::Denied(violation) => Err(violation),
        }
    }
}

/// Evaluate `access` against `policy`, resolving relative paths against `cwd`.
///
/// The path is canonicalized first (symlinks, `.` and `..`), so a link
/// inside the work directory that points at `/etc/passwd` is judged as
/// `/etc/passwd`. Rules are then checked in order; the first whose prefix
/// covers the path decides. No match means denied.
pub fn evaluate_access(policy: &ConfinementPolicy, access: &FileAccess, cwd: &Path) -> AccessVerdict {
    let resolved = resolve_path(&access.path, cwd);

    let Some(rule) = policy.first_match(&resolved) else {
        return AccessVerdict::Denied(ConfinementViolation::NotAllowed { path: resolved });
    };

    match (rule.access, access.mode) {
        (PathAccess::ReadWrite, _) | (PathAccess::ReadOnly, AccessMode::Read) => {
            AccessVerdict::Allowed { resolved }
        }
        (PathAccess::ReadOnly, AccessMode::Write) => {
            AccessVerdict::Denied(ConfinementViolation::WriteDenied { path: resolved })
        }
        (PathAccess::Denied, _) => {
            AccessVerdict::Denied(ConfinementViolation::NotAllowed { path: resolved })
        }
    }
}

/// Symlinks followed while resolving one path before giving up, as the
/// kernel's `ELOOP` limit.
const MAX_SYMLINKS: usize = 40;

/// Resolve `path` to canonical absolute form.
///
/// Components are walked left to right and every symlink is replaced by its
/// target as it is met, so `..` applies to the real parent: with
/// `link -> /etc/ssl`, `link/../passwd` is `/etc/passwd`. Components that
/// do not exist yet (a file about to be created) are appended as written.
pub fn resolve_path(path: &Path, cwd: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    };
    let mut hops = 0;
    walk(&absolute, &mut hops)
}

fn walk(path: &Path, hops: &mut usize) -> PathBuf {
    let mut resolved = PathBuf::from("/");
    let mut on_disk = true;

    for component in path.components() {
        match component {
            Component::RootDir => resolved = PathBuf::from("/"),
            Component::Prefix(_) | Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            Component::Normal(name) => {
                let next = resolved.join(name);
                if !on_disk {
                    resolved = next;
                    continue;
                }
                match std::fs::symlink_metadata(&next) {
                    Ok(meta) if meta.file_type().is_symlink() && *hops < MAX_SYMLINKS => {
                        *hops += 1;
                        match std::fs::read_link(&next) {
                            Ok(target) => {
                                resolved = walk(&resolved.join(target), hops);
                                on_disk = std::fs::symlink_metadata(&resolved).is_ok();
                            }
                            Err(_) => {
                                resolved = next;
                                on_disk = false;
                            }
                        }
                    }
                    Ok(_) => resolved = next,
                    Err(_) => {
                        resolved = next;
                        on_disk = false;
                    }
                }
            }
        }
    }
    resolved
}
