mod engine;

pub use engine::Retriever;

use std::future::Future;
use std::time::Instant;

use serde::Serialize;

use crate::decision::Decision;
use crate::label::Label;
use crate::types::{FragmentCandidate, Subject, SubjectId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Retriable transport failure from the fragment store.
    #[error("store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Export,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Export => "export",
        }
    }
}

/// The resource triple the policy engine sees for one fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResourceRef {
    pub label: Label,
    pub source: String,
    pub owner: SubjectId,
    pub tenant: TenantId,
}

impl ResourceRef {
    pub fn from_candidate(candidate: &FragmentCandidate) -> Self {
        Self {
            label: candidate.label,
            source: candidate.source.clone(),
            owner: candidate.owner_id.clone(),
            tenant: candidate.tenant.clone(),
        }
    }
}

/// Label-aware nearest-neighbour pre-filter over the fragment corpus.
pub trait FragmentSource: Send + Sync {
    fn pre_filter(
        &self,
        tenant: &TenantId,
        allowed_labels: &[Label],
        query_vec: &[f32],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<FragmentCandidate>, RetrieveError>> + Send;
}

/// One policy evaluation. Infallible by contract: implementations collapse
/// every failure to a deny before returning.
pub trait PolicyPoint: Send + Sync {
    fn evaluate(
        &self,
        subject: &Subject,
        resource: &ResourceRef,
        action: Action,
    ) -> impl Future<Output = Decision> + Send;
}

#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Upper bound on concurrent policy evaluations per request.
    pub max_fan_out: usize,
    /// Pre-filter fetches `candidate_multiplier * top_k` candidates.
    pub candidate_multiplier: usize,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            max_fan_out: 16,
            candidate_multiplier: 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub top_k: usize,
    pub min_evidence: usize,
    pub action: Action,
    /// Absolute deadline; evaluations still in flight past it are abandoned
    /// and recorded as denied.
    pub deadline: Option<Instant>,
}

#[derive(Debug, Clone)]
pub struct CandidateDecision {
    pub candidate: FragmentCandidate,
    pub decision: Decision,
}

#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    /// Allowed fragments in final order (similarity desc, id asc), truncated
    /// to `top_k`.
    pub allowed: Vec<FragmentCandidate>,
    /// Every de-duplicated candidate with its decision, same order as
    /// evaluated. Exactly one entry per candidate.
    pub decisions: Vec<CandidateDecision>,
    pub insufficient_evidence: bool,
    pub step_up_required: bool,
}
