use jobstream_auth::Credentials;

pub const TENANT_KEY_HEADER: &str = "x-store-key";
pub const SESSION_HEADER: &str = "x-client-session";
pub const JOB_TOKEN_HEADER: &str = "x-job-token";
pub const LAST_EVENT_ID_HEADER: &str = "last-event-id";
pub const ERROR_CODE_HEADER: &str = "x-error-code";

/// What the caller presented with a request.
///
/// Built once by `credentials_middleware`; headers take precedence over the
/// query-string fallbacks (`client_session`, `token`, `last_event_id`) that
/// browsers' `EventSource` needs.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    credentials: Credentials,
    last_event_id: Option<String>,
}

impl RequestContext {
    pub fn new(credentials: Credentials, last_event_id: Option<String>) -> Self {
        Self {
            credentials,
            last_event_id,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Raw resume position, unparsed.
    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }
}
