use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use gatewarden_core::audit::AuditRecord;
use gatewarden_core::embed::cosine_distance;
use gatewarden_core::label::Label;
use gatewarden_core::types::{
    Classification, Document, DocumentId, Fragment, FragmentCandidate, FragmentId, Permission,
    RetentionRule, Subject, SubjectId, TenantId,
};

use crate::traits::{AuditStore, FragmentStore, StorageError, SubjectStore};

#[derive(Debug, Default)]
struct InnerState {
    subjects: HashMap<SubjectId, Subject>,
    documents: HashMap<DocumentId, Document>,
    classifications: Vec<Classification>,
    fragments: Vec<Fragment>,
    permissions: Vec<Permission>,
    retention: Vec<RetentionRule>,
    /// Per-actor partitions, oldest record first.
    audit: HashMap<SubjectId, Vec<AuditRecord>>,
    audit_event_ids: HashSet<String>,
    /// Remaining pre-filter calls to fail with `Unavailable`; test lever for
    /// the gateway's retry path.
    pre_filter_failures: u32,
}

/// Reference backend. Every trait call locks one mutex, so reads are
/// consistent within a call and audit appends are atomic with their
/// head-hash check.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_subject(&self, subject: Subject) {
        let mut state = self.state.lock().unwrap();
        state.subjects.insert(subject.id.clone(), subject);
    }

    pub fn put_document(&self, document: Document) {
        let mut state = self.state.lock().unwrap();
        state.documents.insert(document.id.clone(), document);
    }

    /// Record a classification event; the document's current label is the
    /// most recent one. Existing fragments keep the label they were
    /// produced under.
    pub fn put_classification(&self, classification: Classification) {
        let mut state = self.state.lock().unwrap();
        state.classifications.push(classification);
    }

    /// Insert a fragment, denormalizing the parent document's current label.
    /// Returns false when the parent document is unknown.
    pub fn put_fragment(
        &self,
        id: FragmentId,
        document: DocumentId,
        ordinal: u32,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        if !state.documents.contains_key(&document) {
            return false;
        }
        let label = current_label(&state, &document);
        state.fragments.push(Fragment {
            id,
            document,
            ordinal,
            text: text.into(),
            embedding,
            label,
        });
        true
    }

    pub fn put_permission(&self, permission: Permission) {
        let mut state = self.state.lock().unwrap();
        state.permissions.push(permission);
    }

    pub fn permissions_for(&self, subject: &SubjectId) -> Vec<Permission> {
        let state = self.state.lock().unwrap();
        state
            .permissions
            .iter()
            .filter(|p| p.subject == *subject)
            .cloned()
            .collect()
    }

    pub fn put_retention_rule(&self, rule: RetentionRule) {
        let mut state = self.state.lock().unwrap();
        state.retention.push(rule);
    }

    pub fn retention_rule_for(&self, label: Label, source: &str) -> Option<RetentionRule> {
        let state = self.state.lock().unwrap();
        state
            .retention
            .iter()
            .find(|r| r.label == label && r.source == source)
            .cloned()
    }

    pub fn set_legal_hold(&self, document: &DocumentId, held: bool) {
        let mut state = self.state.lock().unwrap();
        if let Some(doc) = state.documents.get_mut(document) {
            doc.legal_hold = held;
        }
    }

    /// Fail the next `n` pre-filter calls with a retriable error.
    pub fn fail_pre_filters(&self, n: u32) {
        let mut state = self.state.lock().unwrap();
        state.pre_filter_failures = n;
    }

    /// Test-harness hook for chain-integrity scenarios: rewrite a stored
    /// record's metadata in place, bypassing the append-only guard. The
    /// stored hash is left untouched so verification must flag the record.
    #[doc(hidden)]
    pub fn corrupt_metadata_unchecked(
        &self,
        actor: &SubjectId,
        event_id: &str,
        metadata: serde_json::Value,
    ) -> bool {
        let mut state = self.state.lock().unwrap();
        let Some(partition) = state.audit.get_mut(actor) else {
            return false;
        };
        match partition.iter_mut().find(|r| r.event_id == event_id) {
            Some(record) => {
                record.metadata = metadata;
                true
            }
            None => false,
        }
    }
}

fn current_label(state: &InnerState, document: &DocumentId) -> Label {
    state
        .classifications
        .iter()
        .filter(|c| c.document == *document)
        .max_by_key(|c| c.ts)
        .map(|c| c.label)
        .unwrap_or(Label::Public)
}

impl SubjectStore for InMemoryStore {
    async fn load_subject(&self, id: &SubjectId) -> Result<Option<Subject>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state.subjects.get(id).cloned())
    }
}

impl FragmentStore for InMemoryStore {
    async fn pre_filter(
        &self,
        tenant: &TenantId,
        allowed_labels: &[Label],
        query_vec: &[f32],
        limit: usize,
    ) -> Result<Vec<FragmentCandidate>, StorageError> {
        let mut state = self.state.lock().unwrap();
        if state.pre_filter_failures > 0 {
            state.pre_filter_failures -= 1;
            return Err(StorageError::Unavailable("injected failure".to_string()));
        }

        let mut scored: Vec<(f32, FragmentCandidate)> = state
            .fragments
            .iter()
            .filter(|f| !f.embedding.is_empty() && allowed_labels.contains(&f.label))
            .filter_map(|f| {
                let doc = state.documents.get(&f.document)?;
                if doc.tenant != *tenant {
                    return None;
                }
                let distance = cosine_distance(query_vec, &f.embedding);
                let candidate = FragmentCandidate {
                    fragment_id: f.id.clone(),
                    document_id: f.document.clone(),
                    text: f.text.clone(),
                    label: f.label,
                    source: doc.source.clone(),
                    owner_id: doc.owner.clone(),
                    tenant: doc.tenant.clone(),
                    legal_hold: doc.legal_hold,
                    similarity: (1.0 - distance).clamp(0.0, 1.0),
                };
                Some((distance, candidate))
            })
            .collect();

        scored.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| a.1.fragment_id.cmp(&b.1.fragment_id))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, candidate)| candidate)
            .collect())
    }
}

impl AuditStore for InMemoryStore {
    async fn append(&self, record: &AuditRecord) -> Result<(), StorageError> {
        let mut state = self.state.lock().unwrap();

        if state.audit_event_ids.contains(&record.event_id) {
            return Err(StorageError::Conflict(format!(
                "duplicate event id {}",
                record.event_id
            )));
        }
        let head = state
            .audit
            .get(&record.actor)
            .and_then(|partition| partition.last())
            .map(|r| r.hash.clone());
        if record.prev_hash != head {
            return Err(StorageError::Conflict(format!(
                "prev_hash does not match the chain head for actor {}",
                record.actor
            )));
        }

        state.audit_event_ids.insert(record.event_id.clone());
        state
            .audit
            .entry(record.actor.clone())
            .or_default()
            .push(record.clone());
        Ok(())
    }

    async fn head_hash(&self, actor: &SubjectId) -> Result<Option<String>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .audit
            .get(actor)
            .and_then(|partition| partition.last())
            .map(|r| r.hash.clone()))
    }

    async fn read_by_actor(
        &self,
        actor: &SubjectId,
        limit: usize,
    ) -> Result<Vec<AuditRecord>, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .audit
            .get(actor)
            .map(|partition| partition.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use gatewarden_core::audit::{AuditAction, ObjectKind, compute_hash};
    use gatewarden_core::types::SubjectAttrs;
    use std::collections::BTreeMap;

    fn store_with_doc(tenant: &str) -> InMemoryStore {
        let store = InMemoryStore::new();
        store.put_document(Document {
            id: DocumentId::from("d1"),
            source: "wiki".to_string(),
            path: "/wiki/policy.md".to_string(),
            title: "Policy".to_string(),
            mime: "text/markdown".to_string(),
            owner: SubjectId::from("owner"),
            tenant: TenantId::from(tenant),
            legal_hold: false,
        });
        store
    }

    fn classify(store: &InMemoryStore, label: Label) {
        store.put_classification(Classification {
            document: DocumentId::from("d1"),
            label,
            confidence: 0.9,
            reason: "test".to_string(),
            ts: Utc::now(),
        });
    }

    fn record(actor: &str, event_id: &str, prev_hash: Option<String>) -> AuditRecord {
        let mut r = AuditRecord {
            event_id: event_id.to_string(),
            ts: Utc::now(),
            actor: SubjectId::from(actor),
            action: AuditAction::QueryIssued,
            object_id: None,
            object_kind: ObjectKind::Query,
            decision: "ok".to_string(),
            reason: None,
            metadata: serde_json::json!({}),
            hash: String::new(),
            prev_hash,
        };
        r.hash = compute_hash(&r);
        r
    }

    // 1. Subjects round-trip through the store
    #[tokio::test]
    async fn subject_round_trip() {
        let store = InMemoryStore::new();
        let subject = Subject {
            id: SubjectId::from("alice"),
            email: "alice@example.com".to_string(),
            groups: vec!["eng".to_string()],
            assurance_level: 2,
            attrs: SubjectAttrs {
                clearance: Label::Internal,
                allow_export: true,
                mfa_satisfied: false,
                extra: BTreeMap::new(),
            },
            tenant: TenantId::from("dash"),
        };
        store.put_subject(subject.clone());

        let loaded = store.load_subject(&SubjectId::from("alice")).await.unwrap();
        assert_eq!(loaded, Some(subject));
    }

    // 2. Unknown subject loads as None
    #[tokio::test]
    async fn unknown_subject_is_none() {
        let store = InMemoryStore::new();
        assert_eq!(store.load_subject(&SubjectId::from("ghost")).await.unwrap(), None);
    }

    // 3. Fragment inherits the document's current label
    #[tokio::test]
    async fn fragment_inherits_current_label() {
        let store = store_with_doc("dash");
        classify(&store, Label::Confidential);
        assert!(store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("d1"),
            0,
            "secret text",
            vec![1.0, 0.0],
        ));

        let out = store
            .pre_filter(
                &TenantId::from("dash"),
                &[Label::Public, Label::Internal, Label::Confidential],
                &[1.0, 0.0],
                10,
            )
            .await
            .unwrap();
        assert_eq!(out[0].label, Label::Confidential);
    }

    // 4. Reclassification does not relabel existing fragments
    #[tokio::test]
    async fn reclassification_keeps_existing_fragment_labels() {
        let store = store_with_doc("dash");
        classify(&store, Label::Public);
        store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("d1"),
            0,
            "text",
            vec![1.0, 0.0],
        );
        classify(&store, Label::Regulated);

        let out = store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].label, Label::Public);
    }

    // 5. Fragment without a parent document is rejected
    #[tokio::test]
    async fn orphan_fragment_is_rejected() {
        let store = InMemoryStore::new();
        assert!(!store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("missing"),
            0,
            "text",
            vec![1.0],
        ));
    }

    // 6. Pre-filter scopes by tenant
    #[tokio::test]
    async fn pre_filter_scopes_by_tenant() {
        let store = store_with_doc("dash");
        store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("d1"),
            0,
            "text",
            vec![1.0, 0.0],
        );

        let out = store
            .pre_filter(&TenantId::from("other"), &[Label::Public], &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    // 7. Pre-filter excludes labels outside the allowed set
    #[tokio::test]
    async fn pre_filter_excludes_disallowed_labels() {
        let store = store_with_doc("dash");
        classify(&store, Label::Regulated);
        store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("d1"),
            0,
            "text",
            vec![1.0, 0.0],
        );

        let out = store
            .pre_filter(
                &TenantId::from("dash"),
                &[Label::Public, Label::Internal],
                &[1.0, 0.0],
                10,
            )
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    // 8. Pre-filter skips fragments without embeddings
    #[tokio::test]
    async fn pre_filter_skips_missing_embeddings() {
        let store = store_with_doc("dash");
        store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("d1"),
            0,
            "text",
            Vec::new(),
        );

        let out = store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    // 9. Candidates order by distance, ties by fragment id
    #[tokio::test]
    async fn pre_filter_orders_by_distance_then_id() {
        let store = store_with_doc("dash");
        store.put_fragment(
            FragmentId::from("far"),
            DocumentId::from("d1"),
            0,
            "far",
            vec![0.0, 1.0],
        );
        store.put_fragment(
            FragmentId::from("b-near"),
            DocumentId::from("d1"),
            1,
            "near",
            vec![1.0, 0.0],
        );
        store.put_fragment(
            FragmentId::from("a-near"),
            DocumentId::from("d1"),
            2,
            "near too",
            vec![1.0, 0.0],
        );

        let out = store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0, 0.0], 10)
            .await
            .unwrap();
        let ids: Vec<&str> = out.iter().map(|c| c.fragment_id.as_str()).collect();
        assert_eq!(ids, ["a-near", "b-near", "far"]);
        assert!(out[0].similarity > out[2].similarity);
    }

    // 10. Limit truncates the candidate list
    #[tokio::test]
    async fn pre_filter_respects_limit() {
        let store = store_with_doc("dash");
        for i in 0..5 {
            store.put_fragment(
                FragmentId::from(format!("f{i}").as_str()),
                DocumentId::from("d1"),
                i,
                "text",
                vec![1.0, 0.0],
            );
        }

        let out = store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0, 0.0], 3)
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    // 11. Injected failures surface as retriable errors, then clear
    #[tokio::test]
    async fn injected_pre_filter_failures_are_retriable() {
        let store = store_with_doc("dash");
        store.fail_pre_filters(1);

        let err = store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0], 10)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)));

        assert!(store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0], 10)
            .await
            .is_ok());
    }

    // 12. Audit append then read, newest first
    #[tokio::test]
    async fn audit_append_and_read_newest_first() {
        let store = InMemoryStore::new();
        let first = record("alice", "e1", None);
        store.append(&first).await.unwrap();
        let second = record("alice", "e2", Some(first.hash.clone()));
        store.append(&second).await.unwrap();

        let rows = store.read_by_actor(&SubjectId::from("alice"), 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].event_id, "e2");
        assert_eq!(rows[1].event_id, "e1");
    }

    // 13. head_hash tracks the latest record per actor
    #[tokio::test]
    async fn head_hash_tracks_latest() {
        let store = InMemoryStore::new();
        assert_eq!(store.head_hash(&SubjectId::from("alice")).await.unwrap(), None);

        let first = record("alice", "e1", None);
        store.append(&first).await.unwrap();
        assert_eq!(
            store.head_hash(&SubjectId::from("alice")).await.unwrap(),
            Some(first.hash.clone())
        );
    }

    // 14. Append rejects a stale prev_hash
    #[tokio::test]
    async fn append_rejects_stale_prev_hash() {
        let store = InMemoryStore::new();
        store.append(&record("alice", "e1", None)).await.unwrap();

        let stale = record("alice", "e2", None);
        let err = store.append(&stale).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    // 15. Append rejects duplicate event ids across actors
    #[tokio::test]
    async fn append_rejects_duplicate_event_id() {
        let store = InMemoryStore::new();
        store.append(&record("alice", "e1", None)).await.unwrap();

        let err = store.append(&record("sam", "e1", None)).await.unwrap_err();
        assert!(matches!(err, StorageError::Conflict(_)));
    }

    // 16. Actor partitions are independent
    #[tokio::test]
    async fn audit_partitions_are_per_actor() {
        let store = InMemoryStore::new();
        store.append(&record("alice", "e1", None)).await.unwrap();
        store.append(&record("sam", "e2", None)).await.unwrap();

        assert_eq!(
            store.read_by_actor(&SubjectId::from("alice"), 10).await.unwrap().len(),
            1
        );
        assert_eq!(
            store.read_by_actor(&SubjectId::from("sam"), 10).await.unwrap().len(),
            1
        );
    }

    // 17. The tamper hook rewrites metadata without touching the hash
    #[tokio::test]
    async fn tamper_hook_changes_metadata_only() {
        let store = InMemoryStore::new();
        let r = record("alice", "e1", None);
        store.append(&r).await.unwrap();

        assert!(store.corrupt_metadata_unchecked(
            &SubjectId::from("alice"),
            "e1",
            serde_json::json!({"forged": true}),
        ));

        let rows = store.read_by_actor(&SubjectId::from("alice"), 10).await.unwrap();
        assert_eq!(rows[0].metadata, serde_json::json!({"forged": true}));
        assert_eq!(rows[0].hash, r.hash);
    }

    // 18. Retention rules are stored and looked up by (label, source)
    #[tokio::test]
    async fn retention_rules_round_trip() {
        let store = InMemoryStore::new();
        store.put_retention_rule(RetentionRule {
            label: Label::Regulated,
            source: "hr".to_string(),
            days_to_live: 3650,
            legal_hold: true,
        });

        let rule = store.retention_rule_for(Label::Regulated, "hr").unwrap();
        assert_eq!(rule.days_to_live, 3650);
        assert!(store.retention_rule_for(Label::Public, "hr").is_none());
    }

    // 19. Legal hold is surfaced on candidates
    #[tokio::test]
    async fn legal_hold_surfaces_on_candidates() {
        let store = store_with_doc("dash");
        store.put_fragment(
            FragmentId::from("f1"),
            DocumentId::from("d1"),
            0,
            "text",
            vec![1.0, 0.0],
        );
        store.set_legal_hold(&DocumentId::from("d1"), true);

        let out = store
            .pre_filter(&TenantId::from("dash"), &[Label::Public], &[1.0, 0.0], 10)
            .await
            .unwrap();
        assert!(out[0].legal_hold);
    }

    // 20. Permissions are surfaced per subject
    #[tokio::test]
    async fn permissions_surface_per_subject() {
        let store = InMemoryStore::new();
        store.put_permission(Permission {
            subject: SubjectId::from("alice"),
            object: "document:d1".to_string(),
            relation: "viewer".to_string(),
            attributes: BTreeMap::new(),
        });

        assert_eq!(store.permissions_for(&SubjectId::from("alice")).len(), 1);
        assert!(store.permissions_for(&SubjectId::from("sam")).is_empty());
    }
}
