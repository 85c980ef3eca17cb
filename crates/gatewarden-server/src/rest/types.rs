use serde::{Deserialize, Serialize};

use gatewarden_core::label::Label;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub user_id: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub min_evidence: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub response: String,
    pub fragments: Vec<FragmentResponse>,
    pub decisions: Vec<DecisionResponse>,
    pub redaction_applied: bool,
    pub insufficient_evidence: bool,
    pub step_up_required: bool,
    pub counts: CountsResponse,
}

#[derive(Debug, Serialize)]
pub struct FragmentResponse {
    pub id: String,
    pub text: String,
    pub label: Label,
    pub similarity: f32,
}

#[derive(Debug, Serialize)]
pub struct DecisionResponse {
    pub fragment_id: String,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CountsResponse {
    pub allowed: usize,
    pub denied: usize,
    pub step_up: usize,
}

#[derive(Debug, Deserialize)]
pub struct StepUpRequest {
    pub user_id: String,
    pub second_factor: String,
}

#[derive(Debug, Serialize)]
pub struct StepUpResponse {
    pub ok: bool,
    pub expires_in: u64,
}

#[derive(Debug, Deserialize)]
pub struct ExportRequest {
    pub query: String,
    #[serde(default = "default_export_format")]
    pub format: String,
}

fn default_export_format() -> String {
    "json".to_string()
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<String>,
    pub format: String,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    #[serde(default = "default_audit_limit")]
    pub limit: usize,
}

fn default_audit_limit() -> usize {
    100
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
    pub events: Vec<AuditEventResponse>,
    pub chain_valid: bool,
}

#[derive(Debug, Serialize)]
pub struct AuditEventResponse {
    pub event_id: String,
    pub ts: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,
    pub object_type: String,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub metadata: serde_json::Value,
    pub hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_hash: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub store_reachable: bool,
    pub patterns_loaded: usize,
}

#[derive(Debug, Serialize)]
pub struct PatternsResponse {
    pub patterns: Vec<PatternResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct PatternResponse {
    pub id: String,
    pub category: String,
    pub mask: String,
}

#[derive(Debug, Deserialize)]
pub struct DetectRequest {
    pub text: String,
}

#[derive(Debug, Serialize)]
pub struct DetectResponse {
    pub detections: Vec<DetectionResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct DetectionResponse {
    pub pattern_id: String,
    pub category: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}
