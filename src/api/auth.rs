//! `X-API-Key` authentication middleware.
//!
//! Every endpoint except `GET /health` requires the header to match the
//! process-wide secret. Comparison happens over SHA-256 digests. With no
//! secret configured the API is open (development mode).

use axum::{
    Json,
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use sha2::{Digest, Sha256};

#[derive(Clone, Default)]
pub struct ApiKeyGuard {
    key_hash: Option<[u8; 32]>,
}

impl ApiKeyGuard {
    pub fn new(api_key: Option<&str>) -> Self {
        Self {
            key_hash: api_key.map(|key| Sha256::digest(key.as_bytes()).into()),
        }
    }

    fn allows(&self, presented: Option<&str>) -> bool {
        let Some(expected) = &self.key_hash else {
            return true;
        };
        let Some(presented) = presented else {
            return false;
        };
        let digest: [u8; 32] = Sha256::digest(presented.as_bytes()).into();
        &digest == expected
    }
}

pub async fn auth_middleware(
    State(guard): State<ApiKeyGuard>,
    request: Request,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());

    if !guard.allows(presented) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({
                "status": "error",
                "message": "missing or invalid API key"
            })),
        )
            .into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_mode_allows_everything() {
        let guard = ApiKeyGuard::new(None);
        assert!(guard.allows(None));
        assert!(guard.allows(Some("anything")));
    }

    #[test]
    fn configured_key_is_enforced() {
        let guard = ApiKeyGuard::new(Some("secret"));
        assert!(guard.allows(Some("secret")));
        assert!(!guard.allows(Some("wrong")));
        assert!(!guard.allows(None));
    }
}
