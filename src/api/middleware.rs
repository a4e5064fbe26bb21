// Gateway API middleware
// Shared-secret header check in front of every route except the health probe

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

use super::handlers::ApiState;
use super::types::ApiError;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Paths reachable without a key
const PUBLIC_PATHS: &[&str] = &["/health"];

/// True when the configured key is non-empty and the header matches it exactly
pub fn is_authorized(configured_key: &str, provided: Option<&str>) -> bool {
    match provided {
        Some(provided) => !configured_key.is_empty() && provided == configured_key,
        None => false,
    }
}

pub async fn require_api_key<B>(State(state): State<ApiState>, request: Request<B>, next: Next<B>) -> Response {
    if PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok());

    if !is_authorized(&state.api_key, provided) {
        warn!(
            path = %request.uri().path(),
            has_header = request.headers().contains_key(API_KEY_HEADER),
            "Unauthorized request"
        );
        return ApiError::unauthorized().into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_key_is_authorized() {
        assert!(is_authorized("secret", Some("secret")));
    }

    #[test]
    fn test_missing_or_wrong_key_is_rejected() {
        assert!(!is_authorized("secret", None));
        assert!(!is_authorized("secret", Some("Secret")));
        assert!(!is_authorized("secret", Some("")));
    }

    #[test]
    fn test_empty_configured_key_fails_closed() {
        assert!(!is_authorized("", Some("")));
        assert!(!is_authorized("", Some("anything")));
        assert!(!is_authorized("", None));
    }
}
