//! Filesystem confinement rules.
//!
//! A [`ConfinementPolicy`] is an ordered list of path-prefix rules,
//! evaluated first-match-wins with a default-deny fallback (see
//! [`engine`](super::engine)). Prefixes are stored in the coordinate system
//! of the sandbox: host paths for the interception backend, container paths
//! for the container backend.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Kind of access a script attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    Read,
    /// Anything that can modify the filesystem: write, append, create,
    /// truncate, remove, rename, chmod.
    Write,
}

/// What a matching rule grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathAccess {
    ReadOnly,
    ReadWrite,
    Denied,
}

/// Why a rule exists. The container backend derives bind mounts from
/// `Workspace` and `Artifact` rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleScope {
    /// Interpreter, stdlib, site-packages and a few system config files
    Runtime,
    /// The request's work directory
    Workspace,
    /// The externally configured artifact directory
    Artifact,
    /// Anything added explicitly by the caller
    Extra,
}

/// A single prefix rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathRule {
    pub prefix: PathBuf,
    pub access: PathAccess,
    pub scope: RuleScope,
}

impl PathRule {
    pub fn new(prefix: impl AsRef<Path>, access: PathAccess, scope: RuleScope) -> Self {
        Self {
            prefix: normalize_lexically(prefix.as_ref()),
            access,
            scope,
        }
    }

    /// Returns `true` if `path` equals the prefix or lies below it.
    ///
    /// Matching is per path component, so `/work` does not cover `/workshop`.
    pub fn matches(&self, path: &Path) -> bool {
        path.starts_with(&self.prefix)
    }
}

/// Read-only system locations scripts commonly need besides the runtime
/// itself (TLS roots, time zones, name resolution, MIME table).
pub const SYSTEM_READ_ONLY_PREFIXES: &[&str] = &[
    "/etc/ssl",
    "/etc/pki",
    "/etc/ca-certificates",
    "/usr/share/ca-certificates",
    "/usr/share/zoneinfo",
    "/etc/localtime",
    "/etc/mime.types",
    "/etc/hosts",
    "/etc/resolv.conf",
    "/dev/null",
    "/dev/urandom",
];

/// Ordered rule list, first match wins, default deny.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfinementPolicy {
    rules: Vec<PathRule>,
}

/// A bind mount derived from a policy rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub source: PathBuf,
    pub target: PathBuf,
    pub read_only: bool,
}

impl Mount {
    /// `--mount` argument for the docker CLI.
    pub fn to_docker_arg(&self) -> String {
        let ro = if self.read_only { ",readonly" } else { "" };
        format!(
            "type=bind,source={},target={}{}",
            self.source.display(),
            self.target.display(),
            ro
        )
    }
}

impl ConfinementPolicy {
    /// A policy with no rules: everything is denied.
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Append a rule (builder pattern).
    pub fn with_rule(mut self, rule: PathRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn allow_read_only(self, prefix: impl AsRef<Path>, scope: RuleScope) -> Self {
        self.with_rule(PathRule::new(prefix, PathAccess::ReadOnly, scope))
    }

    pub fn allow_read_write(self, prefix: impl AsRef<Path>, scope: RuleScope) -> Self {
        self.with_rule(PathRule::new(prefix, PathAccess::ReadWrite, scope))
    }

    pub fn deny(self, prefix: impl AsRef<Path>) -> Self {
        self.with_rule(PathRule::new(prefix, PathAccess::Denied, RuleScope::Extra))
    }

    /// The standard policy for one execution.
    ///
    /// Rule order:
    ///
    /// | # | Prefix                  | Access     | Present when            |
    /// |---|-------------------------|------------|-------------------------|
    /// | 1 | `$HOME/.aws`            | read-only  | `home` is given         |
    /// | 2 | work directory          | read-write | always                  |
    /// | 3 | artifact directory      | read-write | an artifact dir is set  |
    /// | 4 | runtime prefixes        | read-only  | always                  |
    /// | 5 | system config files     | read-only  | always                  |
    ///
    /// `$HOME/.aws` stays read-only even when HOME points into the work
    /// directory. The work directory precedes runtime prefixes so a work
    /// directory below e.g. `/usr/local` is still writable.
    pub fn for_request(
        work_dir: &Path,
        artifact_dir: Option<&Path>,
        runtime_prefixes: &[PathBuf],
        home: Option<&Path>,
    ) -> Self {
        let mut policy = Self::empty();

        if let Some(home) = home {
            policy = policy.allow_read_only(home.join(".aws"), RuleScope::Extra);
        }
        policy = policy.allow_read_write(work_dir, RuleScope::Workspace);
        if let Some(artifact_dir) = artifact_dir {
            if !artifact_dir.starts_with(work_dir) {
                policy = policy.allow_read_write(artifact_dir, RuleScope::Artifact);
            }
        }
        for prefix in runtime_prefixes {
            policy = policy.allow_read_only(prefix, RuleScope::Runtime);
        }
        for prefix in SYSTEM_READ_ONLY_PREFIXES {
            policy = policy.allow_read_only(prefix, RuleScope::Runtime);
        }
        policy
    }

    pub fn rules(&self) -> &[PathRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule covering `path`, if any. `path` must already be resolved.
    pub fn first_match(&self, path: &Path) -> Option<&PathRule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    /// Bind mounts needed to realise this policy in a container.
    ///
    /// The workspace rule is backed by `host_work_dir`; artifact rules are
    /// mounted at the identical path. Runtime and extra rules refer to
    /// paths inside the image and need no mount.
    pub fn mounts(&self, host_work_dir: &Path) -> Vec<Mount> {
        self.rules
            .iter()
            .filter_map(|rule| match rule.scope {
                RuleScope::Workspace => Some(Mount {
                    source: host_work_dir.to_path_buf(),
                    target: rule.prefix.clone(),
                    read_only: rule.access != PathAccess::ReadWrite,
                }),
                RuleScope::Artifact => Some(Mount {
                    source: rule.prefix.clone(),
                    target: rule.prefix.clone(),
                    read_only: rule.access != PathAccess::ReadWrite,
                }),
                RuleScope::Runtime | RuleScope::Extra => None,
            })
            .collect()
    }
}

/// Normalize `.` and `..` without touching the filesystem.
///
/// `..` at the root stays at the root, matching how the kernel resolves it.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_parent = matches!(out.components().next_back(), Some(Component::ParentDir));
                if at_parent || (!out.pop() && !path.is_absolute()) {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(if path.is_absolute() { "/" } else { "." });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_matches_on_component_boundary() {
        let rule = PathRule::new("/srv/work", PathAccess::ReadWrite, RuleScope::Workspace);
        assert!(rule.matches(Path::new("/srv/work")));
        assert!(rule.matches(Path::new("/srv/work/out/data.json")));
        assert!(!rule.matches(Path::new("/srv/workshop/file")));
        assert!(!rule.matches(Path::new("/srv")));
    }

    #[test]
    fn test_rule_prefix_is_normalized() {
        let rule = PathRule::new("/srv/./work/../work/", PathAccess::ReadOnly, RuleScope::Extra);
        assert_eq!(rule.prefix, PathBuf::from("/srv/work"));
    }

    #[test]
    fn test_normalize_lexically() {
        assert_eq!(normalize_lexically(Path::new("/a/b/../c/./d")), PathBuf::from("/a/c/d"));
        assert_eq!(normalize_lexically(Path::new("/../../etc")), PathBuf::from("/etc"));
        assert_eq!(normalize_lexically(Path::new("/")), PathBuf::from("/"));
        assert_eq!(normalize_lexically(Path::new("a/../..")), PathBuf::from(".."));
    }

    #[test]
    fn test_for_request_rule_order() {
        let policy = ConfinementPolicy::for_request(
            Path::new("/jobs/1"),
            Some(Path::new("/artifacts")),
            &[PathBuf::from("/usr/local")],
            Some(Path::new("/jobs/1")),
        );

        let rules = policy.rules();
        assert_eq!(rules[0].prefix, PathBuf::from("/jobs/1/.aws"));
        assert_eq!(rules[0].access, PathAccess::ReadOnly);
        assert_eq!(rules[1].prefix, PathBuf::from("/jobs/1"));
        assert_eq!(rules[1].scope, RuleScope::Workspace);
        assert_eq!(rules[2].prefix, PathBuf::from("/artifacts"));
        assert_eq!(rules[2].scope, RuleScope::Artifact);
        assert_eq!(rules[3].prefix, PathBuf::from("/usr/local"));
        assert_eq!(rules[3].scope, RuleScope::Runtime);
        assert!(rules[4..].iter().all(|r| r.access == PathAccess::ReadOnly));
        assert_eq!(
            policy.len(),
            1 + 1 + SYSTEM_READ_ONLY_PREFIXES.len() + 1 + 1
        );
    }

    #[test]
    fn test_for_request_skips_nested_artifact_dir() {
        let policy = ConfinementPolicy::for_request(
            Path::new("/jobs/1"),
            Some(Path::new("/jobs/1/out")),
            &[],
            None,
        );
        assert!(policy.rules().iter().all(|r| r.scope != RuleScope::Artifact));
    }

    #[test]
    fn test_mounts_from_workspace_and_artifact() {
        let policy = ConfinementPolicy::empty()
            .allow_read_only("/usr/local", RuleScope::Runtime)
            .allow_read_write("/workspace", RuleScope::Workspace)
            .allow_read_write("/data/artifacts", RuleScope::Artifact)
            .allow_read_only("/root/.aws", RuleScope::Extra);

        let mounts = policy.mounts(Path::new("/tmp/job-7"));
        assert_eq!(
            mounts,
            vec![
                Mount {
                    source: PathBuf::from("/tmp/job-7"),
                    target: PathBuf::from("/workspace"),
                    read_only: false,
                },
                Mount {
                    source: PathBuf::from("/data/artifacts"),
                    target: PathBuf::from("/data/artifacts"),
                    read_only: false,
                },
            ]
        );
        assert_eq!(
            mounts[0].to_docker_arg(),
            "type=bind,source=/tmp/job-7,target=/workspace"
        );
    }

    #[test]
    fn test_policy_serializes_for_shim() {
        let policy = ConfinementPolicy::empty().allow_read_write("/workspace", RuleScope::Workspace);
        let json = serde_json::to_value(&policy).unwrap();
        assert_eq!(json["rules"][0]["prefix"], "/workspace");
        assert_eq!(json["rules"][0]["access"], "read_write");
        assert_eq!(json["rules"][0]["scope"], "workspace");
    }
}
