//! The hash-chained audit ledger writer.
//!
//! Concurrent requests from one subject must serialize their appends so
//! `prev_hash` always commits to the most recent record. A per-actor async
//! mutex provides that single-writer guarantee; actors never contend with
//! each other. The hash is computed inside the critical section and the
//! store validates it against the chain head atomically with the insert.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use gatewarden_core::audit::{
    AuditAction, AuditRecord, ChainReport, ObjectKind, compute_hash, verify_chain,
};
use gatewarden_core::types::SubjectId;
use gatewarden_storage::{AuditStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Clone)]
pub struct EmitInput {
    pub actor: SubjectId,
    pub action: AuditAction,
    pub object_id: Option<String>,
    pub object_kind: ObjectKind,
    pub decision: String,
    pub reason: Option<String>,
    pub metadata: Value,
}

pub struct Ledger<S> {
    store: Arc<S>,
    locks: Mutex<HashMap<SubjectId, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: AuditStore> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, actor: &SubjectId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        Arc::clone(locks.entry(actor.clone()).or_default())
    }

    pub async fn emit(&self, input: EmitInput) -> Result<AuditRecord, LedgerError> {
        let lock = self.lock_for(&input.actor);
        let _writer = lock.lock().await;

        let prev_hash = self.store.head_hash(&input.actor).await?;
        let mut record = AuditRecord {
            event_id: Uuid::new_v4().to_string(),
            ts: Utc::now(),
            actor: input.actor,
            action: input.action,
            object_id: input.object_id,
            object_kind: input.object_kind,
            decision: input.decision,
            reason: input.reason,
            metadata: input.metadata,
            hash: String::new(),
            prev_hash,
        };
        record.hash = compute_hash(&record);

        self.store.append(&record).await?;
        Ok(record)
    }

    /// Read an actor's records (newest first) and verify the chain over
    /// them in chronological order.
    pub async fn verify(
        &self,
        actor: &SubjectId,
        limit: usize,
    ) -> Result<(Vec<AuditRecord>, ChainReport), LedgerError> {
        let newest_first = self.store.read_by_actor(actor, limit).await?;
        let mut chronological = newest_first.clone();
        chronological.reverse();

        // A limited read can cut the chain mid-way; the oldest fetched
        // record's back-link is then unverifiable, not broken.
        let mut report = verify_chain(&chronological);
        if let (Some(oldest), true) = (chronological.first(), limit <= newest_first.len()) {
            let oldest_id = oldest.event_id.clone();
            if oldest.prev_hash.is_some() {
                report.broken_links.retain(|id| *id != oldest_id);
                report.valid = report.broken_links.is_empty() && report.failed_hashes.is_empty();
            }
        }
        Ok((newest_first, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatewarden_storage::InMemoryStore;

    fn input(actor: &str, action: AuditAction) -> EmitInput {
        EmitInput {
            actor: SubjectId::from(actor),
            action,
            object_id: None,
            object_kind: ObjectKind::Query,
            decision: "ok".to_string(),
            reason: None,
            metadata: serde_json::json!({"top_k": 10}),
        }
    }

    fn ledger() -> Ledger<InMemoryStore> {
        Ledger::new(Arc::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn first_record_has_null_prev_hash() {
        let ledger = ledger();
        let record = ledger.emit(input("alice", AuditAction::QueryIssued)).await.unwrap();

        assert_eq!(record.prev_hash, None);
        assert_eq!(record.hash.len(), 64);
    }

    #[tokio::test]
    async fn sequential_emits_chain() {
        let ledger = ledger();
        let first = ledger.emit(input("alice", AuditAction::QueryIssued)).await.unwrap();
        let second = ledger.emit(input("alice", AuditAction::ResultReturned)).await.unwrap();

        assert_eq!(second.prev_hash, Some(first.hash));
    }

    #[tokio::test]
    async fn chains_are_per_actor() {
        let ledger = ledger();
        ledger.emit(input("alice", AuditAction::QueryIssued)).await.unwrap();
        let sams_first = ledger.emit(input("sam", AuditAction::QueryIssued)).await.unwrap();

        assert_eq!(sams_first.prev_hash, None);
    }

    #[tokio::test]
    async fn verify_accepts_emitted_chain() {
        let ledger = ledger();
        for _ in 0..5 {
            ledger.emit(input("alice", AuditAction::QueryIssued)).await.unwrap();
        }

        let (records, report) = ledger.verify(&SubjectId::from("alice"), 100).await.unwrap();
        assert_eq!(records.len(), 5);
        assert!(report.valid);
    }

    #[tokio::test]
    async fn concurrent_emits_from_one_actor_serialize() {
        let ledger = Arc::new(ledger());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let ledger = Arc::clone(&ledger);
            handles.push(tokio::spawn(async move {
                ledger.emit(input("alice", AuditAction::PdpDecision)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let (records, report) = ledger.verify(&SubjectId::from("alice"), 100).await.unwrap();
        assert_eq!(records.len(), 16);
        assert!(report.valid, "chain must stay intact under concurrency");
    }

    #[tokio::test]
    async fn concurrent_emits_across_actors_do_not_interfere() {
        let ledger = Arc::new(ledger());

        let mut handles = Vec::new();
        for actor in ["alice", "sam", "eve"] {
            for _ in 0..8 {
                let ledger = Arc::clone(&ledger);
                handles.push(tokio::spawn(async move {
                    ledger.emit(input(actor, AuditAction::PdpDecision)).await
                }));
            }
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        for actor in ["alice", "sam", "eve"] {
            let (records, report) = ledger.verify(&SubjectId::from(actor), 100).await.unwrap();
            assert_eq!(records.len(), 8);
            assert!(report.valid);
        }
    }

    #[tokio::test]
    async fn verify_flags_direct_tampering() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = Ledger::new(Arc::clone(&store));
        let record = ledger.emit(input("alice", AuditAction::QueryIssued)).await.unwrap();
        ledger.emit(input("alice", AuditAction::ResultReturned)).await.unwrap();

        store.corrupt_metadata_unchecked(
            &SubjectId::from("alice"),
            &record.event_id,
            serde_json::json!({"forged": true}),
        );

        let (_, report) = ledger.verify(&SubjectId::from("alice"), 100).await.unwrap();
        assert!(!report.valid);
        assert_eq!(report.failed_hashes, vec![record.event_id]);
    }

    #[tokio::test]
    async fn truncated_read_does_not_false_flag_the_cut() {
        let ledger = ledger();
        for _ in 0..6 {
            ledger.emit(input("alice", AuditAction::QueryIssued)).await.unwrap();
        }

        let (records, report) = ledger.verify(&SubjectId::from("alice"), 3).await.unwrap();
        assert_eq!(records.len(), 3);
        assert!(report.valid, "cut point must not read as tampering");
    }
}
