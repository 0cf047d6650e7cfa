//! Credential & environment injection.
//!
//! Builds the complete environment of the sandboxed process. Precedence,
//! lowest first:
//!
//! 1. backend base variables (`HOME`, `PATH` for the interception backend)
//! 2. computed variables: region pair, credentials, `ARTIFACT_DIR`
//! 3. caller-supplied overrides

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::credentials::CredentialSet;
use super::error::{SandboxError, SandboxResult};

/// Variable advertising the artifact directory to scripts.
pub const ARTIFACT_DIR_VAR: &str = "ARTIFACT_DIR";

/// Values that may appear in logs as-is.
const PLAIN_KEYS: &[&str] = &[
    "AWS_REGION",
    "AWS_DEFAULT_REGION",
    ARTIFACT_DIR_VAR,
    "HOME",
    "PATH",
];

/// The environment of one sandboxed process.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SandboxEnv(BTreeMap<String, String>);

impl SandboxEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Key/value pairs with every sensitive value masked.
    pub fn redacted(&self) -> BTreeMap<&str, &str> {
        self.0
            .iter()
            .map(|(k, v)| {
                let shown = if PLAIN_KEYS.contains(&k.as_str()) {
                    v.as_str()
                } else {
                    "<redacted>"
                };
                (k.as_str(), shown)
            })
            .collect()
    }
}

impl std::fmt::Debug for SandboxEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map().entries(self.redacted()).finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for SandboxEnv {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Composes sandbox environments from host configuration and request data.
#[derive(Debug, Clone, Default)]
pub struct EnvironmentInjector {
    region: Option<String>,
    default_region: Option<String>,
    artifact_dir: Option<PathBuf>,
}

impl EnvironmentInjector {
    pub fn new(
        region: Option<String>,
        default_region: Option<String>,
        artifact_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            region,
            default_region,
            artifact_dir,
        }
    }

    /// Configured artifact directory, if any.
    pub fn artifact_dir(&self) -> Option<&Path> {
        self.artifact_dir.as_deref()
    }

    /// Region pair after fallback: each key mirrors the other when only one
    /// is set; both are `None` when the host has neither.
    pub fn regions(&self) -> (Option<&str>, Option<&str>) {
        let region = self.region.as_deref().filter(|r| !r.is_empty());
        let default_region = self.default_region.as_deref().filter(|r| !r.is_empty());
        (region.or(default_region), default_region.or(region))
    }

    /// Build the full environment for one execution.
    ///
    /// `sandbox_work_dir` is the work directory as the script sees it; it
    /// becomes `ARTIFACT_DIR` when no artifact directory is configured.
    pub fn compose(
        &self,
        credentials: &CredentialSet,
        base: &SandboxEnv,
        overrides: &BTreeMap<String, String>,
        sandbox_work_dir: &Path,
    ) -> SandboxResult<SandboxEnv> {
        if let Some(bad) = overrides.keys().find(|k| !is_valid_env_name(k)) {
            return Err(SandboxError::InvalidRequest(format!(
                "invalid environment variable name: {bad:?}"
            )));
        }

        let mut env = base.clone();

        let (region, default_region) = self.regions();
        if let Some(region) = region {
            env.insert("AWS_REGION", region);
        }
        if let Some(default_region) = default_region {
            env.insert("AWS_DEFAULT_REGION", default_region);
        }

        let pairs = [
            ("AWS_ACCESS_KEY_ID", &credentials.access_key),
            ("AWS_SECRET_ACCESS_KEY", &credentials.secret_key),
            ("AWS_SESSION_TOKEN", &credentials.session_token),
        ];
        for (key, value) in pairs {
            if !value.is_empty() {
                env.insert(key, value.as_str());
            }
        }
        if let Some(account_id) = &credentials.account_id {
            env.insert("AWS_ACCOUNT_ID", account_id.as_str());
        }

        let artifact_dir = self.artifact_dir.as_deref().unwrap_or(sandbox_work_dir);
        env.insert(ARTIFACT_DIR_VAR, artifact_dir.to_string_lossy());

        for (key, value) in overrides {
            env.insert(key.as_str(), value.as_str());
        }

        Ok(env)
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`
pub fn is_valid_env_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> CredentialSet {
        CredentialSet::new("AKIA1234567890", "secret", "token")
    }

    #[test]
    fn test_compose_sets_credentials_and_regions() {
        let injector = EnvironmentInjector::new(
            Some("eu-west-1".into()),
            Some("us-east-1".into()),
            None,
        );
        let env = injector
            .compose(
                &creds().with_account_id("123456789012"),
                &SandboxEnv::new(),
                &BTreeMap::new(),
                Path::new("/workspace"),
            )
            .unwrap();

        assert_eq!(env.get("AWS_REGION"), Some("eu-west-1"));
        assert_eq!(env.get("AWS_DEFAULT_REGION"), Some("us-east-1"));
        assert_eq!(env.get("AWS_ACCESS_KEY_ID"), Some("AKIA1234567890"));
        assert_eq!(env.get("AWS_SECRET_ACCESS_KEY"), Some("secret"));
        assert_eq!(env.get("AWS_SESSION_TOKEN"), Some("token"));
        assert_eq!(env.get("AWS_ACCOUNT_ID"), Some("123456789012"));
        assert_eq!(env.get(ARTIFACT_DIR_VAR), Some("/workspace"));
    }

    #[test]
    fn test_region_mirrors_single_value() {
        let injector = EnvironmentInjector::new(None, Some("ap-south-1".into()), None);
        assert_eq!(injector.regions(), (Some("ap-south-1"), Some("ap-south-1")));

        let injector = EnvironmentInjector::new(Some("sa-east-1".into()), Some(String::new()), None);
        assert_eq!(injector.regions(), (Some("sa-east-1"), Some("sa-east-1")));
    }

    #[test]
    fn test_region_absent_is_omitted() {
        let env = EnvironmentInjector::default()
            .compose(&creds(), &SandboxEnv::new(), &BTreeMap::new(), Path::new("/w"))
            .unwrap();
        assert!(!env.contains_key("AWS_REGION"));
        assert!(!env.contains_key("AWS_DEFAULT_REGION"));
    }

    #[test]
    fn test_account_id_only_when_present() {
        let env = EnvironmentInjector::default()
            .compose(&creds(), &SandboxEnv::new(), &BTreeMap::new(), Path::new("/w"))
            .unwrap();
        assert!(!env.contains_key("AWS_ACCOUNT_ID"));
    }

    #[test]
    fn test_empty_credentials_set_nothing() {
        let env = EnvironmentInjector::default()
            .compose(
                &CredentialSet::empty(),
                &SandboxEnv::new(),
                &BTreeMap::new(),
                Path::new("/w"),
            )
            .unwrap();
        assert_eq!(env.keys().collect::<Vec<_>>(), vec![ARTIFACT_DIR_VAR]);
    }

    #[test]
    fn test_configured_artifact_dir_wins_over_work_dir() {
        let injector = EnvironmentInjector::new(None, None, Some(PathBuf::from("/srv/artifacts")));
        let env = injector
            .compose(&creds(), &SandboxEnv::new(), &BTreeMap::new(), Path::new("/workspace"))
            .unwrap();
        assert_eq!(env.get(ARTIFACT_DIR_VAR), Some("/srv/artifacts"));
    }

    #[test]
    fn test_overrides_win_and_base_loses() {
        let injector = EnvironmentInjector::new(Some("eu-west-1".into()), None, None);
        let base: SandboxEnv = [("HOME", "/w"), ("AWS_REGION", "base-region")]
            .into_iter()
            .collect();
        let overrides: BTreeMap<String, String> = [
            ("AWS_REGION".to_string(), "us-west-2".to_string()),
            ("TEST_VAR".to_string(), "Test Value".to_string()),
            ("HOME".to_string(), "/elsewhere".to_string()),
        ]
        .into_iter()
        .collect();

        let env = injector
            .compose(&creds(), &base, &overrides, Path::new("/w"))
            .unwrap();
        assert_eq!(env.get("AWS_REGION"), Some("us-west-2"));
        assert_eq!(env.get("AWS_DEFAULT_REGION"), Some("eu-west-1"));
        assert_eq!(env.get("TEST_VAR"), Some("Test Value"));
        assert_eq!(env.get("HOME"), Some("/elsewhere"));
    }

    #[test]
    fn test_invalid_override_key_rejected() {
        let overrides: BTreeMap<String, String> =
            [("BAD-KEY".to_string(), "x".to_string())].into_iter().collect();
        let err = EnvironmentInjector::default()
            .compose(&creds(), &SandboxEnv::new(), &overrides, Path::new("/w"))
            .unwrap_err();
        assert!(matches!(err, SandboxError::InvalidRequest(_)));
    }

    #[test]
    fn test_env_name_validation() {
        assert!(is_valid_env_name("TEST_VAR1"));
        assert!(is_valid_env_name("_private"));
        assert!(!is_valid_env_name(""));
        assert!(!is_valid_env_name("1ABC"));
        assert!(!is_valid_env_name("A=B"));
    }

    #[test]
    fn test_debug_masks_secrets() {
        let env = EnvironmentInjector::new(Some("eu-west-1".into()), None, None)
            .compose(&creds(), &SandboxEnv::new(), &BTreeMap::new(), Path::new("/w"))
            .unwrap();
        let rendered = format!("{:?}", env);
        assert!(rendered.contains("eu-west-1"));
        assert!(rendered.contains("AWS_SECRET_ACCESS_KEY"));
        assert!(!rendered.contains("secret\""));
        assert!(!rendered.contains("AKIA1234567890"));
    }
}
