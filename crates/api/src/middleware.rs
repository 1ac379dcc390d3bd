use std::collections::HashMap;

use axum::{
    extract::Query,
    http::{HeaderMap, Request},
    middleware::Next,
    response::Response,
};

use jobstream_auth::Credentials;

use crate::context::{
    RequestContext, JOB_TOKEN_HEADER, LAST_EVENT_ID_HEADER, SESSION_HEADER, TENANT_KEY_HEADER,
};

/// Collect credentials from headers and query into a [`RequestContext`].
///
/// Nothing is rejected here; the access gate decides what each route needs.
pub async fn credentials_middleware(mut req: Request<axum::body::Body>, next: Next) -> Response {
    let query: HashMap<String, String> = Query::try_from_uri(req.uri())
        .map(|Query(q)| q)
        .unwrap_or_default();

    let ctx = request_context(req.headers(), &query);
    req.extensions_mut().insert(ctx);

    next.run(req).await
}

fn request_context(headers: &HeaderMap, query: &HashMap<String, String>) -> RequestContext {
    let pick = |header: &str, param: &str| {
        header_value(headers, header)
            .or_else(|| query.get(param).cloned())
            .unwrap_or_default()
    };

    let credentials = Credentials::new()
        .with_session(pick(SESSION_HEADER, "client_session"))
        .with_token(pick(JOB_TOKEN_HEADER, "token"))
        .with_tenant_key(header_value(headers, TENANT_KEY_HEADER).unwrap_or_default());

    let last_event_id = Some(pick(LAST_EVENT_ID_HEADER, "last_event_id"))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    RequestContext::new(credentials, last_event_id)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn headers_win_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert(JOB_TOKEN_HEADER, HeaderValue::from_static("from-header"));
        let query = HashMap::from([
            ("token".to_string(), "from-query".to_string()),
            ("client_session".to_string(), "sess-1".to_string()),
            ("last_event_id".to_string(), "17-0".to_string()),
        ]);

        let ctx = request_context(&headers, &query);
        assert_eq!(ctx.credentials().token.as_deref(), Some("from-header"));
        assert_eq!(ctx.credentials().session.as_deref(), Some("sess-1"));
        assert_eq!(ctx.last_event_id(), Some("17-0"));
    }

    #[test]
    fn tenant_key_is_header_only() {
        let query = HashMap::from([("x-store-key".to_string(), "k".to_string())]);
        let ctx = request_context(&HeaderMap::new(), &query);
        assert!(ctx.credentials().tenant_key.is_none());
        assert!(ctx.last_event_id().is_none());
    }
}
