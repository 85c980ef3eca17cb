use std::future::Future;

use gatewarden_core::audit::AuditRecord;
use gatewarden_core::label::Label;
use gatewarden_core::types::{FragmentCandidate, Subject, SubjectId, TenantId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("audit append conflict: {0}")]
    Conflict(String),

    /// Transport-level failure; the caller may retry.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("internal storage error: {0}")]
    Internal(String),
}

pub trait SubjectStore: Send + Sync {
    fn load_subject(
        &self,
        id: &SubjectId,
    ) -> impl Future<Output = Result<Option<Subject>, StorageError>> + Send;
}

pub trait FragmentStore: Send + Sync {
    /// Fragments in `tenant` whose label is in `allowed_labels` and whose
    /// embedding is present, ordered by ascending cosine distance to
    /// `query_vec`, ties broken by fragment id, truncated to `limit`.
    fn pre_filter(
        &self,
        tenant: &TenantId,
        allowed_labels: &[Label],
        query_vec: &[f32],
        limit: usize,
    ) -> impl Future<Output = Result<Vec<FragmentCandidate>, StorageError>> + Send;
}

pub trait AuditStore: Send + Sync {
    /// Append one record. The store enforces write-once semantics: the
    /// record's `prev_hash` must equal the current head for its actor and
    /// its `event_id` must be unused, both checked atomically with the
    /// insert. There is no update or delete surface.
    fn append(&self, record: &AuditRecord)
    -> impl Future<Output = Result<(), StorageError>> + Send;

    fn head_hash(
        &self,
        actor: &SubjectId,
    ) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;

    /// Records for one actor, newest first.
    fn read_by_actor(
        &self,
        actor: &SubjectId,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<AuditRecord>, StorageError>> + Send;
}

/// Everything the gateway needs from one backend.
pub trait GatewayStore: SubjectStore + FragmentStore + AuditStore {}

impl<S: SubjectStore + FragmentStore + AuditStore> GatewayStore for S {}
