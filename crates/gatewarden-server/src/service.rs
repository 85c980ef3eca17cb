//! Request orchestration: binds the retriever, redactor, ledger, session
//! store, and token signer into the per-request pipelines of the gateway.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};

use gatewarden_core::audit::{AuditAction, AuditRecord, ObjectKind};
use gatewarden_core::decision::{Decision, POLICY_UNAVAILABLE};
use gatewarden_core::embed::Embedder;
use gatewarden_core::label::Label;
use gatewarden_core::redact::{Detection, Redactor};
use gatewarden_core::retrieve::{
    Action, PolicyPoint, RetrievalOutcome, RetrievalRequest, RetrieveError, Retriever,
    RetrieverConfig,
};
use gatewarden_core::session::StepUpStore;
use gatewarden_core::types::{FragmentId, Subject, SubjectId, TenantId};
use gatewarden_storage::{AuditStore as _, GatewayStore, SubjectStore as _};

use crate::adapter::StoreFragmentSource;
use crate::audit;
use crate::auth::{AuthContext, TokenAttrs, TokenClaims, TokenSigner};
use crate::error::ApiError;
use crate::ledger::{EmitInput, Ledger};
use crate::metrics::Metrics;

/// Watermark line returned when the allowed evidence is below the caller's
/// threshold.
pub const INSUFFICIENT_EVIDENCE_WATERMARK: &str =
    "Insufficient governed evidence to answer this query.";

const STEP_UP_MESSAGE: &str =
    "Step-up verification is required before governed evidence can be returned.";

const MAX_QUERY_CHARS: usize = 4096;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub tenant: TenantId,
    pub default_top_k: usize,
    pub default_min_evidence: usize,
    pub request_deadline: Duration,
    pub step_up_ttl: Duration,
    pub token_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct SearchInput {
    pub query: String,
    pub top_k: Option<usize>,
    pub min_evidence: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct FragmentView {
    pub id: FragmentId,
    pub text: String,
    pub label: Label,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct DecisionRow {
    pub fragment_id: FragmentId,
    pub decision: Decision,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub allowed: usize,
    pub denied: usize,
    pub step_up: usize,
}

#[derive(Debug, Clone)]
pub struct SearchOutput {
    pub response: String,
    pub fragments: Vec<FragmentView>,
    pub decisions: Vec<DecisionRow>,
    pub redaction_applied: bool,
    pub insufficient_evidence: bool,
    pub step_up_required: bool,
    pub counts: Counts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(ExportFormat::Json),
            "csv" => Some(ExportFormat::Csv),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExportOutput {
    pub artifact: String,
    pub format: ExportFormat,
    pub counts: Counts,
}

#[derive(Debug, Clone)]
pub struct TokenOutput {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
pub struct AuditTrailOutput {
    pub events: Vec<AuditRecord>,
    pub chain_valid: bool,
}

#[derive(Debug, Clone)]
pub struct HealthOutput {
    pub healthy: bool,
    pub store_reachable: bool,
    pub patterns_loaded: usize,
}

pub struct GatewayService<S, P>
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    store: Arc<S>,
    retriever: Retriever<StoreFragmentSource<S>, P, dyn Embedder>,
    ledger: Ledger<S>,
    sessions: StepUpStore,
    signer: TokenSigner,
    redactor: Redactor,
    metrics: Arc<Metrics>,
    config: GatewayConfig,
}

impl<S, P> GatewayService<S, P>
where
    S: GatewayStore + 'static,
    P: PolicyPoint + 'static,
{
    pub fn new(
        store: Arc<S>,
        policy: Arc<P>,
        embedder: Arc<dyn Embedder>,
        signer: TokenSigner,
        redactor: Redactor,
        metrics: Arc<Metrics>,
        config: GatewayConfig,
    ) -> Self {
        let retriever = Retriever::new(
            Arc::new(StoreFragmentSource::new(Arc::clone(&store))),
            policy,
            embedder,
            RetrieverConfig::default(),
        );
        let ledger = Ledger::new(Arc::clone(&store));
        Self {
            store,
            retriever,
            ledger,
            sessions: StepUpStore::new(),
            signer,
            redactor,
            metrics,
            config,
        }
    }

    pub fn signer(&self) -> &TokenSigner {
        &self.signer
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Issue a signed bearer token for an existing subject. Stands in for
    /// the identity provider in single-binary deployments.
    pub async fn issue_token(&self, user_id: &str) -> Result<TokenOutput, ApiError> {
        let subject = self
            .store
            .load_subject(&SubjectId::from(user_id))
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::NotFound(format!("no subject '{user_id}'")))?;

        let expires_in = self.config.token_ttl.as_secs();
        let claims = TokenClaims {
            sub: subject.id.to_string(),
            groups: subject.groups.clone(),
            attrs: TokenAttrs {
                clearance: subject.attrs.clearance,
                allow_export: subject.attrs.allow_export,
            },
            tenant: subject.tenant.to_string(),
            exp: Utc::now().timestamp() + expires_in as i64,
        };
        let token = self
            .signer
            .mint(&claims)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        Ok(TokenOutput { token, expires_in })
    }

    pub async fn search(
        &self,
        ctx: &AuthContext,
        input: SearchInput,
    ) -> Result<SearchOutput, ApiError> {
        self.metrics.record_request();
        let subject = self.authenticate_subject(ctx).await?;

        let top_k = input.top_k.unwrap_or(self.config.default_top_k);
        let min_evidence = input.min_evidence.unwrap_or(self.config.default_min_evidence);

        if let Err(message) = validate_query(&input.query, top_k) {
            // The payload is audited in redacted form: a digest, never the text.
            self.emit(
                &subject.id,
                AuditAction::QueryIssued,
                None,
                ObjectKind::Query,
                "error",
                Some(message.clone()),
                json!({ "query_sha256": digest(&input.query) }),
            )
            .await?;
            self.metrics.record_error();
            return Err(ApiError::InvalidInput(message));
        }

        self.emit(
            &subject.id,
            AuditAction::QueryIssued,
            None,
            ObjectKind::Query,
            "ok",
            None,
            json!({
                "query_sha256": digest(&input.query),
                "top_k": top_k,
                "min_evidence": min_evidence,
            }),
        )
        .await?;

        let request = RetrievalRequest {
            query: input.query,
            top_k,
            min_evidence,
            action: Action::Read,
            deadline: Some(Instant::now() + self.config.request_deadline),
        };
        let outcome = self.retrieve_with_retry(&subject, &request).await?;

        self.record_pdp_decisions(&subject.id, &outcome).await?;
        let counts = count_decisions(&outcome);

        if all_collapsed_unavailable(&outcome) {
            self.metrics.record_error();
            return Err(ApiError::PolicyUnavailable);
        }

        if outcome.step_up_required {
            let reason = outcome
                .decisions
                .iter()
                .find(|d| d.decision.is_step_up())
                .and_then(|d| d.decision.reason())
                .unwrap_or("step-up required")
                .to_string();
            self.emit(
                &subject.id,
                AuditAction::StepUpRequired,
                None,
                ObjectKind::Query,
                "STEP_UP_REQUIRED",
                Some(reason),
                json!({ "step_up_candidates": counts.step_up }),
            )
            .await?;
        }

        if outcome.allowed.is_empty() && !outcome.step_up_required && !outcome.decisions.is_empty()
        {
            self.metrics.record_error();
            audit::search_rejected(&subject.id, counts.denied);
            return Err(ApiError::Forbidden(
                "no authorized fragments for this query".to_string(),
            ));
        }

        let (fragments, redaction_applied) = self.redact_fragments(&subject.id, &outcome).await?;

        let response = if outcome.step_up_required && fragments.is_empty() {
            STEP_UP_MESSAGE.to_string()
        } else if outcome.insufficient_evidence {
            INSUFFICIENT_EVIDENCE_WATERMARK.to_string()
        } else {
            synthesize(&fragments)
        };

        self.emit(
            &subject.id,
            AuditAction::ResultReturned,
            None,
            ObjectKind::Query,
            "ok",
            None,
            json!({
                "allowed": counts.allowed,
                "denied": counts.denied,
                "step_up": counts.step_up,
                "insufficient_evidence": outcome.insufficient_evidence,
            }),
        )
        .await?;
        self.metrics.record_success();
        audit::search_completed(&subject.id, counts.allowed, counts.denied, counts.step_up);

        Ok(SearchOutput {
            response,
            fragments,
            decisions: decision_rows(&outcome),
            redaction_applied,
            insufficient_evidence: outcome.insufficient_evidence,
            step_up_required: outcome.step_up_required,
            counts,
        })
    }

    pub async fn export(
        &self,
        ctx: &AuthContext,
        query: String,
        format: ExportFormat,
    ) -> Result<ExportOutput, ApiError> {
        self.metrics.record_request();
        // Unlike the search path, an unknown subject here is a 404, not a
        // 401; the export contract has no unauthenticated arm.
        let mut subject = self
            .store
            .load_subject(&ctx.subject_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| ApiError::NotFound(format!("no subject '{}'", ctx.subject_id)))?;
        if subject.tenant != ctx.tenant || subject.tenant != self.config.tenant {
            self.metrics.record_auth_failure();
            return Err(ApiError::Forbidden("tenant mismatch".to_string()));
        }
        subject.attrs.mfa_satisfied = self.sessions.satisfied(&subject.id);

        self.emit(
            &subject.id,
            AuditAction::ExportAttempted,
            None,
            ObjectKind::Query,
            "ok",
            None,
            json!({ "format": format.as_str(), "query_sha256": digest(&query) }),
        )
        .await?;

        if !subject.attrs.allow_export {
            self.emit(
                &subject.id,
                AuditAction::ExportDenied,
                None,
                ObjectKind::Query,
                "DENY",
                Some("subject may not export".to_string()),
                json!({}),
            )
            .await?;
            self.metrics.record_error();
            audit::export_decision(&subject.id, false);
            return Err(ApiError::Forbidden("export not permitted for subject".to_string()));
        }

        if let Err(message) = validate_query(&query, self.config.default_top_k) {
            self.metrics.record_error();
            return Err(ApiError::InvalidInput(message));
        }

        let request = RetrievalRequest {
            query,
            top_k: self.config.default_top_k,
            min_evidence: self.config.default_min_evidence,
            action: Action::Export,
            deadline: Some(Instant::now() + self.config.request_deadline),
        };
        let outcome = self.retrieve_with_retry(&subject, &request).await?;

        self.record_pdp_decisions(&subject.id, &outcome).await?;
        let counts = count_decisions(&outcome);

        if all_collapsed_unavailable(&outcome) {
            self.metrics.record_error();
            return Err(ApiError::PolicyUnavailable);
        }

        if outcome.allowed.is_empty() {
            self.emit(
                &subject.id,
                AuditAction::ExportDenied,
                None,
                ObjectKind::Query,
                "DENY",
                Some("no exportable fragments".to_string()),
                json!({ "denied": counts.denied, "step_up": counts.step_up }),
            )
            .await?;
            self.metrics.record_error();
            audit::export_decision(&subject.id, false);
            return Err(ApiError::Forbidden("no exportable fragments".to_string()));
        }

        // Fragments denied for the export sub-action never reach this point,
        // so suppressed regulated content is never redacted, only withheld.
        let (fragments, _) = self.redact_fragments(&subject.id, &outcome).await?;
        let artifact = render_artifact(&fragments, format);

        self.emit(
            &subject.id,
            AuditAction::ExportGranted,
            None,
            ObjectKind::Query,
            "ALLOW",
            None,
            json!({
                "format": format.as_str(),
                "allowed": counts.allowed,
                "denied": counts.denied,
            }),
        )
        .await?;
        self.metrics.record_success();
        audit::export_decision(&subject.id, true);

        Ok(ExportOutput {
            artifact,
            format,
            counts,
        })
    }

    pub async fn step_up(
        &self,
        ctx: &AuthContext,
        user_id: &str,
        second_factor: &str,
    ) -> Result<u64, ApiError> {
        self.metrics.record_request();
        if ctx.subject_id.as_str() != user_id {
            return Err(ApiError::Forbidden(
                "step-up must be asserted by the authenticated subject".to_string(),
            ));
        }
        let subject = self.authenticate_subject(ctx).await?;

        // The second factor itself is verified by the identity provider;
        // this gateway only enforces its shape.
        if second_factor.trim().len() < 6 {
            self.metrics.record_error();
            return Err(ApiError::InvalidInput("second factor rejected".to_string()));
        }

        self.sessions.assert_for(&subject.id, self.config.step_up_ttl);
        self.sessions.purge_expired();

        self.emit(
            &subject.id,
            AuditAction::StepUpOk,
            None,
            ObjectKind::Session,
            "ok",
            None,
            json!({ "ttl_s": self.config.step_up_ttl.as_secs() }),
        )
        .await?;
        self.metrics.record_success();
        audit::step_up_asserted(&subject.id);

        Ok(self.config.step_up_ttl.as_secs())
    }

    pub async fn audit_trail(
        &self,
        ctx: &AuthContext,
        subject_id: &SubjectId,
        limit: usize,
    ) -> Result<AuditTrailOutput, ApiError> {
        self.metrics.record_request();
        if ctx.subject_id != *subject_id && !ctx.is_auditor() {
            self.metrics.record_error();
            return Err(ApiError::Forbidden(
                "audit trail is restricted to the subject or auditors".to_string(),
            ));
        }

        let limit = limit.clamp(1, 1000);
        let (events, report) = self.ledger.verify(subject_id, limit).await?;
        self.metrics.record_success();
        Ok(AuditTrailOutput {
            events,
            chain_valid: report.valid,
        })
    }

    pub fn detect(&self, text: &str) -> Vec<Detection> {
        self.redactor.detect(text)
    }

    pub async fn health(&self) -> HealthOutput {
        let store_reachable = self
            .store
            .head_hash(&SubjectId::from("health-probe"))
            .await
            .is_ok();
        HealthOutput {
            healthy: store_reachable,
            store_reachable,
            patterns_loaded: self.redactor.catalog().len(),
        }
    }

    async fn authenticate_subject(&self, ctx: &AuthContext) -> Result<Subject, ApiError> {
        let mut subject = self
            .store
            .load_subject(&ctx.subject_id)
            .await
            .map_err(ApiError::from)?
            .ok_or_else(|| {
                self.metrics.record_auth_failure();
                ApiError::Unauthenticated("unknown subject".to_string())
            })?;
        if subject.tenant != ctx.tenant || subject.tenant != self.config.tenant {
            self.metrics.record_auth_failure();
            return Err(ApiError::Unauthenticated("tenant mismatch".to_string()));
        }
        subject.attrs.mfa_satisfied = self.sessions.satisfied(&subject.id);
        Ok(subject)
    }

    async fn retrieve_with_retry(
        &self,
        subject: &Subject,
        request: &RetrievalRequest,
    ) -> Result<RetrievalOutcome, ApiError> {
        match self.retriever.retrieve(subject, request).await {
            Ok(outcome) => Ok(outcome),
            Err(RetrieveError::Store(first)) => {
                tracing::warn!(error = %first, "pre-filter failed, retrying once");
                self.retriever
                    .retrieve(subject, request)
                    .await
                    .map_err(|e| {
                        self.metrics.record_error();
                        e.into()
                    })
            }
            Err(other) => {
                self.metrics.record_error();
                Err(other.into())
            }
        }
    }

    /// Exactly one `PDP_DECISION` per de-duplicated candidate per request.
    async fn record_pdp_decisions(
        &self,
        actor: &SubjectId,
        outcome: &RetrievalOutcome,
    ) -> Result<(), ApiError> {
        for cd in &outcome.decisions {
            self.metrics.record_decision(&cd.decision);
            let mut metadata = json!({
                "label": cd.candidate.label.as_str(),
                "similarity": cd.candidate.similarity,
            });
            if let Some(rule_id) = cd.decision.rule_id() {
                metadata["rule_id"] = json!(rule_id);
            }
            self.emit(
                actor,
                AuditAction::PdpDecision,
                Some(cd.candidate.fragment_id.to_string()),
                ObjectKind::Fragment,
                cd.decision.kind_str(),
                cd.decision.reason().map(str::to_string),
                metadata,
            )
            .await?;
        }
        Ok(())
    }

    async fn redact_fragments(
        &self,
        actor: &SubjectId,
        outcome: &RetrievalOutcome,
    ) -> Result<(Vec<FragmentView>, bool), ApiError> {
        let mut fragments = Vec::with_capacity(outcome.allowed.len());
        let mut redaction_applied = false;
        for candidate in &outcome.allowed {
            let redaction = self.redactor.redact(&candidate.text, candidate.label);
            if redaction.changed {
                redaction_applied = true;
                self.emit(
                    actor,
                    AuditAction::RedactionApplied,
                    Some(candidate.fragment_id.to_string()),
                    ObjectKind::Fragment,
                    "ok",
                    None,
                    json!({
                        "patterns_matched": redaction.patterns_matched.iter().collect::<Vec<_>>(),
                    }),
                )
                .await?;
            }
            fragments.push(FragmentView {
                id: candidate.fragment_id.clone(),
                text: redaction.text,
                label: candidate.label,
                similarity: candidate.similarity,
            });
        }
        Ok((fragments, redaction_applied))
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit(
        &self,
        actor: &SubjectId,
        action: AuditAction,
        object_id: Option<String>,
        object_kind: ObjectKind,
        decision: &str,
        reason: Option<String>,
        metadata: serde_json::Value,
    ) -> Result<AuditRecord, ApiError> {
        self.ledger
            .emit(EmitInput {
                actor: actor.clone(),
                action,
                object_id,
                object_kind,
                decision: decision.to_string(),
                reason,
                metadata,
            })
            .await
            .map_err(ApiError::from)
    }
}

fn validate_query(query: &str, top_k: usize) -> Result<(), String> {
    if query.trim().is_empty() {
        return Err("query must not be empty".to_string());
    }
    if query.chars().count() > MAX_QUERY_CHARS {
        return Err(format!("query exceeds {MAX_QUERY_CHARS} characters"));
    }
    if !(1..=50).contains(&top_k) {
        return Err("top_k must be between 1 and 50".to_string());
    }
    Ok(())
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn count_decisions(outcome: &RetrievalOutcome) -> Counts {
    let mut counts = Counts::default();
    for cd in &outcome.decisions {
        match &cd.decision {
            Decision::Allow { .. } => counts.allowed += 1,
            Decision::Deny { .. } => counts.denied += 1,
            Decision::StepUp { .. } => counts.step_up += 1,
        }
    }
    counts
}

fn all_collapsed_unavailable(outcome: &RetrievalOutcome) -> bool {
    !outcome.decisions.is_empty()
        && outcome
            .decisions
            .iter()
            .all(|d| d.decision.reason() == Some(POLICY_UNAVAILABLE))
}

fn decision_rows(outcome: &RetrievalOutcome) -> Vec<DecisionRow> {
    outcome
        .decisions
        .iter()
        .map(|cd| DecisionRow {
            fragment_id: cd.candidate.fragment_id.clone(),
            decision: cd.decision.clone(),
        })
        .collect()
}

/// Deterministic extract-and-concatenate synthesis with provenance markers.
fn synthesize(fragments: &[FragmentView]) -> String {
    fragments
        .iter()
        .map(|f| format!("[{}] {}", f.id, f.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn render_artifact(fragments: &[FragmentView], format: ExportFormat) -> String {
    match format {
        ExportFormat::Json => {
            let rows: Vec<serde_json::Value> = fragments
                .iter()
                .map(|f| {
                    json!({
                        "id": f.id.as_str(),
                        "label": f.label.as_str(),
                        "similarity": f.similarity,
                        "text": f.text,
                    })
                })
                .collect();
            serde_json::Value::Array(rows).to_string()
        }
        ExportFormat::Csv => {
            let mut out = String::from("id,label,similarity,text\n");
            for f in fragments {
                out.push_str(&format!(
                    "{},{},{},\"{}\"\n",
                    f.id,
                    f.label,
                    f.similarity,
                    f.text.replace('"', "\"\"")
                ));
            }
            out
        }
    }
}
