use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::audit;
use crate::auth::{AuthContext, TokenSigner, bearer_token};
use crate::metrics::Metrics;

#[derive(Clone)]
pub struct AuthState {
    signer: Arc<TokenSigner>,
    metrics: Arc<Metrics>,
}

impl AuthState {
    pub fn new(signer: Arc<TokenSigner>, metrics: Arc<Metrics>) -> Self {
        Self { signer, metrics }
    }
}

/// Paths that never carry a token: minting one, and unauthenticated probes.
fn skip_auth(path: &str) -> bool {
    matches!(path, "/auth/token" | "/health" | "/metrics")
}

pub async fn bearer_auth_middleware(
    axum::extract::State(auth_state): axum::extract::State<AuthState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    if skip_auth(&path) {
        return next.run(request).await;
    }

    let header_value = match request
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
    {
        Some(h) => h.to_string(),
        None => {
            return reject(&auth_state, "missing authorization header");
        }
    };

    let token = match bearer_token(&header_value) {
        Ok(t) => t,
        Err(_) => {
            return reject(&auth_state, "invalid authorization format");
        }
    };

    match auth_state.signer.verify(token) {
        Ok(claims) => {
            request.extensions_mut().insert(AuthContext::from_claims(&claims));
            next.run(request).await
        }
        Err(err) => reject(&auth_state, &err.to_string()),
    }
}

fn reject(auth_state: &AuthState, reason: &str) -> Response {
    auth_state.metrics.record_auth_failure();
    audit::auth_failure(reason);
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_paths_skip_auth() {
        assert!(skip_auth("/auth/token"));
        assert!(skip_auth("/health"));
        assert!(skip_auth("/metrics"));
    }

    #[test]
    fn governed_paths_require_auth() {
        assert!(!skip_auth("/search"));
        assert!(!skip_auth("/export"));
        assert!(!skip_auth("/auth/step-up"));
        assert!(!skip_auth("/audit/alice"));
    }
}
