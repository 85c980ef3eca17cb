use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use chrono::SecondsFormat;
use uuid::Uuid;

use gatewarden_core::retrieve::PolicyPoint;
use gatewarden_core::types::SubjectId;
use gatewarden_storage::GatewayStore;

use crate::auth::AuthContext;
use crate::error::ApiError;
use crate::service::{ExportFormat, SearchInput};

use super::AppState;
use super::types::*;

fn api_error_to_response(err: ApiError) -> (StatusCode, Json<ErrorResponse>) {
    let status = err.status();
    let correlation_id = if status == StatusCode::INTERNAL_SERVER_ERROR {
        let id = Uuid::new_v4().to_string();
        tracing::error!(correlation_id = %id, error = %err, "internal error");
        Some(id)
    } else {
        None
    };

    let error = if status == StatusCode::INTERNAL_SERVER_ERROR {
        // Never leak internal state to the caller.
        "internal error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ErrorResponse {
            error,
            correlation_id,
        }),
    )
}

pub async fn issue_token<S, P>(
    State(state): State<AppState<S, P>>,
    Json(req): Json<TokenRequest>,
) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    if req.user_id.trim().is_empty() {
        return api_error_to_response(ApiError::InvalidInput("user_id must be set".to_string()))
            .into_response();
    }
    match state.service.issue_token(&req.user_id).await {
        Ok(out) => (
            StatusCode::OK,
            Json(TokenResponse {
                token: out.token,
                expires_in: out.expires_in,
            }),
        )
            .into_response(),
        Err(e) => api_error_to_response(e).into_response(),
    }
}

pub async fn search<S, P>(
    State(state): State<AppState<S, P>>,
    axum::Extension(ctx): axum::Extension<AuthContext>,
    Json(req): Json<SearchRequest>,
) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let input = SearchInput {
        query: req.query,
        top_k: req.top_k,
        min_evidence: req.min_evidence,
    };

    match state.service.search(&ctx, input).await {
        Ok(out) => {
            let fragments = out
                .fragments
                .into_iter()
                .map(|f| FragmentResponse {
                    id: f.id.to_string(),
                    text: f.text,
                    label: f.label,
                    similarity: f.similarity,
                })
                .collect();
            let decisions = out
                .decisions
                .into_iter()
                .map(|d| DecisionResponse {
                    fragment_id: d.fragment_id.to_string(),
                    decision: d.decision.kind_str().to_string(),
                    reason: d.decision.reason().map(str::to_string),
                })
                .collect();
            (
                StatusCode::OK,
                Json(SearchResponse {
                    response: out.response,
                    fragments,
                    decisions,
                    redaction_applied: out.redaction_applied,
                    insufficient_evidence: out.insufficient_evidence,
                    step_up_required: out.step_up_required,
                    counts: CountsResponse {
                        allowed: out.counts.allowed,
                        denied: out.counts.denied,
                        step_up: out.counts.step_up,
                    },
                }),
            )
                .into_response()
        }
        Err(e) => api_error_to_response(e).into_response(),
    }
}

pub async fn export<S, P>(
    State(state): State<AppState<S, P>>,
    axum::Extension(ctx): axum::Extension<AuthContext>,
    Json(req): Json<ExportRequest>,
) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let Some(format) = ExportFormat::parse(&req.format) else {
        return api_error_to_response(ApiError::InvalidInput(format!(
            "unknown export format '{}'",
            req.format
        )))
        .into_response();
    };

    match state.service.export(&ctx, req.query, format).await {
        Ok(out) => (
            StatusCode::OK,
            Json(ExportResponse {
                decision: "ALLOW".to_string(),
                artifact: Some(out.artifact),
                format: out.format.as_str().to_string(),
            }),
        )
            .into_response(),
        Err(ApiError::Forbidden(_)) => (
            StatusCode::FORBIDDEN,
            Json(ExportResponse {
                decision: "DENY".to_string(),
                artifact: None,
                format: format.as_str().to_string(),
            }),
        )
            .into_response(),
        Err(e) => api_error_to_response(e).into_response(),
    }
}

pub async fn step_up<S, P>(
    State(state): State<AppState<S, P>>,
    axum::Extension(ctx): axum::Extension<AuthContext>,
    Json(req): Json<StepUpRequest>,
) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    match state
        .service
        .step_up(&ctx, &req.user_id, &req.second_factor)
        .await
    {
        Ok(expires_in) => (
            StatusCode::OK,
            Json(StepUpResponse {
                ok: true,
                expires_in,
            }),
        )
            .into_response(),
        Err(e) => api_error_to_response(e).into_response(),
    }
}

pub async fn audit_trail<S, P>(
    State(state): State<AppState<S, P>>,
    axum::Extension(ctx): axum::Extension<AuthContext>,
    Path(subject_id): Path<String>,
    Query(query): Query<AuditQuery>,
) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let subject_id = SubjectId::new(subject_id);
    match state
        .service
        .audit_trail(&ctx, &subject_id, query.limit)
        .await
    {
        Ok(out) => {
            let events = out
                .events
                .into_iter()
                .map(|e| AuditEventResponse {
                    event_id: e.event_id,
                    ts: e.ts.to_rfc3339_opts(SecondsFormat::Micros, true),
                    action: e.action.as_str().to_string(),
                    object_id: e.object_id,
                    object_type: e.object_kind.as_str().to_string(),
                    decision: e.decision,
                    reason: e.reason,
                    metadata: e.metadata,
                    hash: e.hash,
                    prev_hash: e.prev_hash,
                })
                .collect();
            (
                StatusCode::OK,
                Json(AuditResponse {
                    events,
                    chain_valid: out.chain_valid,
                }),
            )
                .into_response()
        }
        Err(e) => api_error_to_response(e).into_response(),
    }
}

pub async fn patterns<S, P>(State(state): State<AppState<S, P>>) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    use gatewarden_core::redact::MaskStrategy;

    let patterns: Vec<PatternResponse> = state
        .service
        .redactor()
        .catalog()
        .iter()
        .map(|p| PatternResponse {
            id: p.id.clone(),
            category: p.category.as_str().to_string(),
            mask: match &p.mask {
                MaskStrategy::Fixed(replacement) => replacement.clone(),
                MaskStrategy::KeepLast { keep, .. } => format!("keep-last-{keep}"),
            },
        })
        .collect();

    let total = patterns.len();
    (StatusCode::OK, Json(PatternsResponse { patterns, total }))
}

pub async fn detect<S, P>(
    State(state): State<AppState<S, P>>,
    Json(req): Json<DetectRequest>,
) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let detections: Vec<DetectionResponse> = state
        .service
        .detect(&req.text)
        .into_iter()
        .map(|d| DetectionResponse {
            pattern_id: d.pattern_id,
            category: d.category.to_string(),
            count: d.count,
        })
        .collect();
    let total = detections.iter().map(|d| d.count).sum();
    (StatusCode::OK, Json(DetectResponse { detections, total }))
}

pub async fn health<S, P>(State(state): State<AppState<S, P>>) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    let out = state.service.health().await;
    let status = if out.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(HealthResponse {
            status: if out.healthy { "healthy" } else { "unhealthy" }.to_string(),
            store_reachable: out.store_reachable,
            patterns_loaded: out.patterns_loaded,
        }),
    )
}

pub async fn metrics<S, P>(State(state): State<AppState<S, P>>) -> impl IntoResponse
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.service.metrics().render_prometheus(),
    )
}
