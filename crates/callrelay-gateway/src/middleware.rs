use axum::{
    extract::{Query, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::warn;

/// Keys that may call `/calls` and `/calls/{id}/status`.
///
/// The websocket routes are never gated: the telephony provider and
/// observers authenticate by knowing the call id.
#[derive(Debug, Clone, Default)]
pub struct AuthConfig {
    /// Accepted keys. With none configured the control routes are open.
    pub api_keys: Vec<String>,
}

impl AuthConfig {
    /// Gate the control routes behind `api_keys`.
    pub fn new(api_keys: Vec<String>) -> Self {
        Self { api_keys }
    }

    /// Whether any key is configured.
    pub fn is_enabled(&self) -> bool {
        !self.api_keys.is_empty()
    }

    /// Whether `candidate` matches one of the configured keys.
    pub fn accepts(&self, candidate: &str) -> bool {
        self.api_keys.iter().any(|key| keys_match(key, candidate))
    }
}

/// Byte compare that does not stop at the first mismatch.
fn keys_match(expected: &str, candidate: &str) -> bool {
    let (a, b) = (expected.as_bytes(), candidate.as_bytes());
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}

/// `?api_key=` on a control request. Status callbacks can only carry the key
/// in their URL.
#[derive(serde::Deserialize, Default)]
pub struct AuthQuery {
    /// Key given in the query string.
    pub api_key: Option<String>,
}

fn presented_key(headers: &HeaderMap, query: &AuthQuery) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
        .or_else(|| query.api_key.clone())
}

/// Reject control requests that do not present an accepted key.
pub async fn auth_middleware(
    State(auth): State<Arc<AuthConfig>>,
    headers: HeaderMap,
    Query(query): Query<AuthQuery>,
    request: Request,
    next: Next,
) -> Response {
    if !auth.is_enabled() {
        return next.run(request).await;
    }

    match presented_key(&headers, &query) {
        Some(key) if auth.accepts(&key) => next.run(request).await,
        Some(_) => {
            warn!(path = %request.uri().path(), "Control request with unknown API key");
            (StatusCode::UNAUTHORIZED, "Invalid API key").into_response()
        }
        None => {
            warn!(path = %request.uri().path(), "Control request without API key");
            (StatusCode::UNAUTHORIZED, "API key required").into_response()
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_config_disabled() {
        let config = AuthConfig::new(vec![]);
        assert!(!config.is_enabled());
    }

    #[test]
    fn test_auth_config_accepts_configured_key() {
        let config = AuthConfig::new(vec!["key123".to_string(), "other".to_string()]);
        assert!(config.is_enabled());
        assert!(config.accepts("other"));
        assert!(!config.accepts("key12"));
        assert!(!config.accepts(""));
    }

    #[test]
    fn test_bearer_header_wins_over_query() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer from-header".parse().unwrap());
        let query = AuthQuery {
            api_key: Some("from-query".into()),
        };
        assert_eq!(presented_key(&headers, &query).as_deref(), Some("from-header"));
        assert_eq!(
            presented_key(&HeaderMap::new(), &query).as_deref(),
            Some("from-query")
        );
        assert!(presented_key(&HeaderMap::new(), &AuthQuery::default()).is_none());
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("my-secret-key", "my-secret-key"));
        assert!(!keys_match("my-secret-key", "my-secret-kez"));
        assert!(!keys_match("short", "longer-key"));
    }
}
