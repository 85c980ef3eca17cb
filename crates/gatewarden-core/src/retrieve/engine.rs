use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;

use crate::decision::{CANCELLED, Decision};
use crate::embed::Embedder;
use crate::label::Label;
use crate::types::{FragmentCandidate, Subject};

use super::{
    Action, CandidateDecision, FragmentSource, PolicyPoint, ResourceRef, RetrievalOutcome,
    RetrievalRequest, RetrieveError, RetrieverConfig,
};

/// Two-stage filter-then-authorize pipeline: label-aware vector pre-filter,
/// then one policy evaluation per candidate with bounded fan-out.
///
/// Never fails per fragment; every candidate ends up with exactly one
/// decision. Output order is deterministic for fixed store state regardless
/// of evaluation completion order.
pub struct Retriever<S, P, E: ?Sized> {
    source: Arc<S>,
    policy: Arc<P>,
    embedder: Arc<E>,
    config: RetrieverConfig,
}

impl<S, P, E> Retriever<S, P, E>
where
    S: FragmentSource + 'static,
    P: PolicyPoint + 'static,
    E: Embedder + ?Sized,
{
    pub fn new(source: Arc<S>, policy: Arc<P>, embedder: Arc<E>, config: RetrieverConfig) -> Self {
        Self {
            source,
            policy,
            embedder,
            config,
        }
    }

    pub async fn retrieve(
        &self,
        subject: &Subject,
        request: &RetrievalRequest,
    ) -> Result<RetrievalOutcome, RetrieveError> {
        if request.query.trim().is_empty() {
            return Err(RetrieveError::InvalidInput("query is empty".to_string()));
        }
        if request.top_k == 0 {
            return Err(RetrieveError::InvalidInput("top_k must be at least 1".to_string()));
        }

        let allowed_labels = Label::allowed_for(subject.attrs.clearance);

        let query_vec = self
            .embedder
            .embed(&request.query)
            .map_err(|e| RetrieveError::InvalidInput(e.to_string()))?;
        if query_vec.len() != self.embedder.dim() {
            return Err(RetrieveError::InvalidInput(format!(
                "embedding has dimension {}, expected {}",
                query_vec.len(),
                self.embedder.dim()
            )));
        }

        let limit = request.top_k.saturating_mul(self.config.candidate_multiplier.max(1));
        let mut candidates = self
            .source
            .pre_filter(&subject.tenant, allowed_labels, &query_vec, limit)
            .await?;

        // The source contract already orders by distance; enforce the final
        // order here so ranking cannot depend on a backend quirk.
        candidates.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.fragment_id.cmp(&b.fragment_id))
        });

        let mut seen = HashSet::new();
        candidates.retain(|c| seen.insert(c.fragment_id.clone()));

        if candidates.is_empty() {
            return Ok(RetrievalOutcome {
                allowed: Vec::new(),
                decisions: Vec::new(),
                insufficient_evidence: true,
                step_up_required: false,
            });
        }

        let decisions = self
            .evaluate_candidates(subject, candidates, request.action, request.deadline)
            .await;

        let step_up_required = decisions.iter().any(|d| d.decision.is_step_up());
        let allowed_total = decisions.iter().filter(|d| d.decision.is_allow()).count();

        let allowed: Vec<FragmentCandidate> = decisions
            .iter()
            .filter(|d| d.decision.is_allow())
            .map(|d| d.candidate.clone())
            .take(request.top_k)
            .collect();

        Ok(RetrievalOutcome {
            allowed,
            decisions,
            insufficient_evidence: allowed_total < request.min_evidence,
            step_up_required,
        })
    }

    async fn evaluate_candidates(
        &self,
        subject: &Subject,
        candidates: Vec<FragmentCandidate>,
        action: Action,
        deadline: Option<Instant>,
    ) -> Vec<CandidateDecision> {
        let fan_out = self.config.max_fan_out.min(candidates.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(fan_out));
        let subject = Arc::new(subject.clone());

        let mut handles = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            let candidate = candidate.clone();
            let policy = Arc::clone(&self.policy);
            let semaphore = Arc::clone(&semaphore);
            let subject = Arc::clone(&subject);
            handles.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return Decision::deny(CANCELLED),
                };
                evaluate_one(policy.as_ref(), &subject, &candidate, action, deadline).await
            }));
        }

        // Joining in spawn order keeps the output deterministic no matter
        // which evaluations finish first.
        let mut decisions = Vec::with_capacity(candidates.len());
        for (candidate, handle) in candidates.into_iter().zip(handles) {
            let decision = match handle.await {
                Ok(decision) => decision,
                Err(_) => Decision::deny(CANCELLED),
            };
            decisions.push(CandidateDecision {
                candidate,
                decision,
            });
        }
        decisions
    }
}

async fn evaluate_one<P: PolicyPoint>(
    policy: &P,
    subject: &Subject,
    candidate: &FragmentCandidate,
    action: Action,
    deadline: Option<Instant>,
) -> Decision {
    // Tenant isolation is checked again here even though the pre-filter is
    // tenant-scoped; a cross-tenant candidate never reaches the policy
    // engine.
    if candidate.tenant != subject.tenant {
        return Decision::deny("tenant-mismatch");
    }

    let resource = ResourceRef::from_candidate(candidate);
    match deadline {
        None => policy.evaluate(subject, &resource, action).await,
        Some(deadline) => {
            let now = Instant::now();
            if now >= deadline {
                return Decision::deny(CANCELLED);
            }
            match tokio::time::timeout(
                deadline - now,
                policy.evaluate(subject, &resource, action),
            )
            .await
            {
                Ok(decision) => decision,
                Err(_) => Decision::deny(CANCELLED),
            }
        }
    }
}
