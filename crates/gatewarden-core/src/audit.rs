//! Audit record primitives: canonical hashing and chain verification.
//!
//! Records are hash-chained per actor. Each record commits to the previous
//! record's digest, so any rewrite of a stored row breaks every later link
//! in that actor's partition.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::types::SubjectId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    QueryIssued,
    PdpDecision,
    StepUpRequired,
    StepUpOk,
    RedactionApplied,
    ResultReturned,
    ExportAttempted,
    ExportGranted,
    ExportDenied,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::QueryIssued => "QUERY_ISSUED",
            AuditAction::PdpDecision => "PDP_DECISION",
            AuditAction::StepUpRequired => "STEP_UP_REQUIRED",
            AuditAction::StepUpOk => "STEP_UP_OK",
            AuditAction::RedactionApplied => "REDACTION_APPLIED",
            AuditAction::ResultReturned => "RESULT_RETURNED",
            AuditAction::ExportAttempted => "EXPORT_ATTEMPTED",
            AuditAction::ExportGranted => "EXPORT_GRANTED",
            AuditAction::ExportDenied => "EXPORT_DENIED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Query,
    Fragment,
    Session,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ObjectKind::Query => "query",
            ObjectKind::Fragment => "fragment",
            ObjectKind::Session => "session",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_id: String,
    pub ts: DateTime<Utc>,
    pub actor: SubjectId,
    pub action: AuditAction,
    pub object_id: Option<String>,
    pub object_kind: ObjectKind,
    pub decision: String,
    pub reason: Option<String>,
    pub metadata: Value,
    /// 64 lowercase hex characters.
    pub hash: String,
    pub prev_hash: Option<String>,
}

/// Canonical JSON: object keys sorted bytewise, arrays in order, compact
/// separators, string escaping as emitted by serde_json. Independent of the
/// key order the `Value` was built with.
pub fn canonical_metadata(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => {
            // serde_json's escaping of a bare string is already canonical.
            out.push_str(&serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string()));
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).unwrap_or_else(|_| "\"\"".to_string()));
                out.push(':');
                write_canonical(&map[key.as_str()], out);
            }
            out.push('}');
        }
    }
}

fn canonical_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Recompute the record digest from its stored fields. The `hash` field
/// itself is ignored. Fields are joined with the unit separator so a crafted
/// reason cannot forge a field boundary.
pub fn compute_hash(record: &AuditRecord) -> String {
    const SEP: &[u8] = b"\x1f";

    let mut hasher = Sha256::new();
    hasher.update(record.event_id.as_bytes());
    hasher.update(SEP);
    hasher.update(canonical_ts(&record.ts).as_bytes());
    hasher.update(SEP);
    hasher.update(record.actor.as_str().as_bytes());
    hasher.update(SEP);
    hasher.update(record.action.as_str().as_bytes());
    hasher.update(SEP);
    hasher.update(record.object_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(SEP);
    hasher.update(record.object_kind.as_str().as_bytes());
    hasher.update(SEP);
    hasher.update(record.decision.as_bytes());
    hasher.update(SEP);
    hasher.update(record.reason.as_deref().unwrap_or("").as_bytes());
    hasher.update(SEP);
    hasher.update(record.prev_hash.as_deref().unwrap_or("").as_bytes());
    hasher.update(SEP);
    hasher.update(canonical_metadata(&record.metadata).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    /// Event ids whose `prev_hash` does not match the prior record's hash.
    pub broken_links: Vec<String>,
    /// Event ids whose stored hash does not match the recomputed digest.
    pub failed_hashes: Vec<String>,
}

/// Verify one actor's partition, oldest record first.
pub fn verify_chain(records: &[AuditRecord]) -> ChainReport {
    let mut broken_links = Vec::new();
    let mut failed_hashes = Vec::new();

    let mut prev: Option<&str> = None;
    for record in records {
        if compute_hash(record) != record.hash {
            failed_hashes.push(record.event_id.clone());
        }
        if record.prev_hash.as_deref() != prev {
            broken_links.push(record.event_id.clone());
        }
        prev = Some(&record.hash);
    }

    ChainReport {
        valid: broken_links.is_empty() && failed_hashes.is_empty(),
        broken_links,
        failed_hashes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(event_id: &str, prev_hash: Option<String>) -> AuditRecord {
        let mut r = AuditRecord {
            event_id: event_id.to_string(),
            ts: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
            actor: SubjectId::from("alice"),
            action: AuditAction::QueryIssued,
            object_id: Some("q-1".to_string()),
            object_kind: ObjectKind::Query,
            decision: "ok".to_string(),
            reason: None,
            metadata: serde_json::json!({"top_k": 10, "min_evidence": 2}),
            hash: String::new(),
            prev_hash,
        };
        r.hash = compute_hash(&r);
        r
    }

    fn chain(n: usize) -> Vec<AuditRecord> {
        let mut out: Vec<AuditRecord> = Vec::new();
        for i in 0..n {
            let prev = out.last().map(|r: &AuditRecord| r.hash.clone());
            out.push(record(&format!("e{i}"), prev));
        }
        out
    }

    #[test]
    fn canonical_metadata_sorts_keys() {
        let v = serde_json::json!({"zeta": 1, "alpha": {"b": 2, "a": [1, 2]}});
        assert_eq!(
            canonical_metadata(&v),
            r#"{"alpha":{"a":[1,2],"b":2},"zeta":1}"#
        );
    }

    #[test]
    fn canonical_metadata_has_no_insignificant_whitespace() {
        let v: Value = serde_json::from_str(r#"{ "a" : [ 1 , true , null ] }"#).unwrap();
        assert_eq!(canonical_metadata(&v), r#"{"a":[1,true,null]}"#);
    }

    #[test]
    fn canonical_metadata_escapes_strings() {
        let v = serde_json::json!({"msg": "a\"b\n"});
        assert_eq!(canonical_metadata(&v), r#"{"msg":"a\"b\n"}"#);
    }

    #[test]
    fn hash_is_64_lowercase_hex() {
        let r = record("e1", None);
        assert_eq!(r.hash.len(), 64);
        assert!(r.hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn hash_changes_with_any_field() {
        let base = record("e1", None);

        let mut other = base.clone();
        other.decision = "DENY".to_string();
        assert_ne!(compute_hash(&other), base.hash);

        let mut other = base.clone();
        other.metadata = serde_json::json!({"top_k": 11, "min_evidence": 2});
        assert_ne!(compute_hash(&other), base.hash);

        let mut other = base.clone();
        other.prev_hash = Some("00".repeat(32));
        assert_ne!(compute_hash(&other), base.hash);
    }

    #[test]
    fn hash_is_stable_under_metadata_key_order() {
        let mut a = record("e1", None);
        a.metadata = serde_json::json!({"b": 1, "a": 2});
        let mut b = a.clone();
        b.metadata = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(compute_hash(&a), compute_hash(&b));
    }

    #[test]
    fn field_shift_across_separator_changes_hash() {
        // reason="x", decision="ok" must not collide with reason="", decision="okx".
        let mut a = record("e1", None);
        a.decision = "ok".to_string();
        a.reason = Some("x".to_string());
        let mut b = record("e1", None);
        b.decision = "okx".to_string();
        b.reason = None;
        assert_ne!(compute_hash(&a), compute_hash(&b));
    }

    #[test]
    fn verify_accepts_intact_chain() {
        let records = chain(4);
        let report = verify_chain(&records);
        assert!(report.valid);
        assert!(report.broken_links.is_empty());
        assert!(report.failed_hashes.is_empty());
    }

    #[test]
    fn verify_flags_tampered_metadata() {
        let mut records = chain(3);
        records[1].metadata = serde_json::json!({"top_k": 99});

        let report = verify_chain(&records);
        assert!(!report.valid);
        assert_eq!(report.failed_hashes, vec!["e1".to_string()]);
    }

    #[test]
    fn verify_flags_broken_link() {
        let mut records = chain(3);
        records[2].prev_hash = Some("ab".repeat(32));
        records[2].hash = compute_hash(&records[2]);

        let report = verify_chain(&records);
        assert!(!report.valid);
        assert_eq!(report.broken_links, vec!["e2".to_string()]);
        assert!(report.failed_hashes.is_empty());
    }

    #[test]
    fn verify_flags_missing_initial_prev() {
        let mut records = chain(2);
        records[0].prev_hash = Some("cd".repeat(32));
        records[0].hash = compute_hash(&records[0]);
        // Link from e1 now points at a hash that is still e0's stored hash,
        // so only e0's own link is broken.
        records[1].prev_hash = Some(records[0].hash.clone());
        records[1].hash = compute_hash(&records[1]);

        let report = verify_chain(&records);
        assert!(!report.valid);
        assert_eq!(report.broken_links, vec!["e0".to_string()]);
    }

    #[test]
    fn empty_partition_is_valid() {
        assert!(verify_chain(&[]).valid);
    }
}
