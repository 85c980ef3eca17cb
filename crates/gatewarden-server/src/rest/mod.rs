mod handlers;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use gatewarden_core::retrieve::PolicyPoint;
use gatewarden_storage::GatewayStore;

use crate::middleware::{AuthState, bearer_auth_middleware};
use crate::service::GatewayService;

pub struct AppState<S, P>
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    pub service: Arc<GatewayService<S, P>>,
}

impl<S, P> Clone for AppState<S, P>
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    fn clone(&self) -> Self {
        Self {
            service: Arc::clone(&self.service),
        }
    }
}

pub fn create_router<S, P>(state: AppState<S, P>) -> Router
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let auth_state = AuthState::new(
        Arc::new(state.service.signer().clone()),
        Arc::clone(state.service.metrics()),
    );

    Router::new()
        .route("/auth/token", post(handlers::issue_token))
        .route("/auth/step-up", post(handlers::step_up))
        .route("/search", post(handlers::search))
        .route("/export", post(handlers::export))
        .route("/audit/{subject_id}", get(handlers::audit_trail))
        .route("/redaction/patterns", get(handlers::patterns))
        .route("/redaction/detect", post(handlers::detect))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(axum::middleware::from_fn_with_state(
            auth_state,
            bearer_auth_middleware,
        ))
        .with_state(state)
}
