//! Temporary AWS credentials handed to one execution.

/// Credentials visible to one sandboxed script.
///
/// Values are opaque and must never reach a log line: `Debug` is
/// hand-written and masks every field, and the type is deliberately not
/// `Serialize`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct CredentialSet {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub account_id: Option<String>,
}

impl CredentialSet {
    pub fn new(
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: impl Into<String>,
    ) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: session_token.into(),
            account_id: None,
        }
    }

    /// No credentials, for scripts that make no AWS calls.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Read credentials from the standard AWS variables of this process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read credentials through an arbitrary lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            access_key: lookup("AWS_ACCESS_KEY_ID").unwrap_or_default(),
            secret_key: lookup("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
            session_token: lookup("AWS_SESSION_TOKEN").unwrap_or_default(),
            account_id: lookup("AWS_ACCOUNT_ID").filter(|v| !v.is_empty()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_key.is_empty()
            && self.secret_key.is_empty()
            && self.session_token.is_empty()
            && self.account_id.is_none()
    }
}

impl std::fmt::Debug for CredentialSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mask = |v: &str| if v.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("CredentialSet")
            .field("access_key", &mask(&self.access_key))
            .field("secret_key", &mask(&self.secret_key))
            .field("session_token", &mask(&self.session_token))
            .field("account_id", &self.account_id.as_deref().map(mask))
            .finish()
    }
}
