use core::fmt;

/// Secrets a caller presented with a request.
///
/// Any of them may be absent; the access gate decides which are required.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub session: Option<String>,
    pub token: Option<String>,
    pub tenant_key: Option<String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = non_empty(session.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = non_empty(token.into());
        self
    }

    pub fn with_tenant_key(mut self, key: impl Into<String>) -> Self {
        self.tenant_key = non_empty(key.into());
        self
    }

    /// Short, log-safe prefix of the session qualifier.
    pub fn session_hint(&self) -> Option<String> {
        self.session.as_deref().map(redact)
    }
}

/// Keep at most the first 6 characters followed by an ellipsis.
pub fn redact(secret: &str) -> String {
    let prefix: String = secret.chars().take(6).collect();
    format!("{prefix}…")
}

// Empty header values count as absent.
fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("session", &self.session_hint())
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("tenant_key", &self.tenant_key.as_ref().map(|_| "***"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_values_are_absent() {
        let creds = Credentials::new().with_token("  ").with_session("");
        assert!(creds.token.is_none());
        assert!(creds.session.is_none());
    }

    #[test]
    fn debug_never_prints_secrets() {
        let creds = Credentials::new()
            .with_session("session-abcdefgh")
            .with_token("tok-123456")
            .with_tenant_key("key-987");
        let out = format!("{creds:?}");

        assert!(!out.contains("tok-123456"));
        assert!(!out.contains("key-987"));
        assert!(!out.contains("session-abcdefgh"));
        assert!(out.contains("sessio"));
    }
}
