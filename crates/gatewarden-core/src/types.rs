use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::label::Label;

macro_rules! string_id {
    ($name:ident) => {
        #[derive(
            Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(TenantId);
string_id!(SubjectId);
string_id!(DocumentId);
string_id!(FragmentId);

/// Typed attributes the gateway and policy adapter depend on, plus a
/// pass-through bag forwarded verbatim to the policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectAttrs {
    pub clearance: Label,
    pub allow_export: bool,
    /// Composed per request from the step-up session store; never persisted.
    #[serde(default)]
    pub mfa_satisfied: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub email: String,
    pub groups: Vec<String>,
    /// Identity-provider assurance level, 1..=3.
    pub assurance_level: u8,
    pub attrs: SubjectAttrs,
    pub tenant: TenantId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub source: String,
    pub path: String,
    pub title: String,
    pub mime: String,
    pub owner: SubjectId,
    pub tenant: TenantId,
    pub legal_hold: bool,
}

/// One classification event. A document's current label is its most recent
/// classification; fragments denormalize the label current at indexing time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub document: DocumentId,
    pub label: Label,
    pub confidence: f64,
    pub reason: String,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    pub id: FragmentId,
    pub document: DocumentId,
    pub ordinal: u32,
    pub text: String,
    pub embedding: Vec<f32>,
    pub label: Label,
}

/// Relationship row surfaced to the policy engine; the gateway never
/// interprets it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub subject: SubjectId,
    pub object: String,
    pub relation: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

/// Days-to-live per (label, source), consulted by the retention reaper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionRule {
    pub label: Label,
    pub source: String,
    pub days_to_live: u32,
    pub legal_hold: bool,
}

/// Pre-filter output: one fragment scored against the query, with the
/// provenance the policy adapter needs to build a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentCandidate {
    pub fragment_id: FragmentId,
    pub document_id: DocumentId,
    pub text: String,
    pub label: Label,
    pub source: String,
    pub owner_id: SubjectId,
    pub tenant: TenantId,
    pub legal_hold: bool,
    /// `1 - cosine_distance`, clamped into `[0, 1]`.
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(clearance: Label) -> Subject {
        Subject {
            id: SubjectId::from("alice"),
            email: "alice@example.com".to_string(),
            groups: vec!["eng".to_string()],
            assurance_level: 1,
            attrs: SubjectAttrs {
                clearance,
                allow_export: false,
                mfa_satisfied: false,
                extra: BTreeMap::new(),
            },
            tenant: TenantId::from("dash"),
        }
    }

    #[test]
    fn ids_display_their_inner_value() {
        assert_eq!(SubjectId::from("alice").to_string(), "alice");
        assert_eq!(TenantId::new("dash").as_str(), "dash");
    }

    #[test]
    fn ids_hash_consistent_with_equality() {
        use std::collections::HashSet;

        let mut set = HashSet::new();
        set.insert(FragmentId::from("f1"));
        assert!(set.contains(&FragmentId::new("f1")));
        assert!(!set.contains(&FragmentId::new("f2")));
    }

    #[test]
    fn subject_serde_round_trip() {
        let s = subject(Label::Internal);
        let json = serde_json::to_string(&s).unwrap();
        let back: Subject = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn subject_attrs_default_mfa_and_extra() {
        let json = r#"{"clearance":"internal","allow_export":true}"#;
        let attrs: SubjectAttrs = serde_json::from_str(json).unwrap();
        assert!(!attrs.mfa_satisfied);
        assert!(attrs.extra.is_empty());
        assert!(attrs.allow_export);
    }

    #[test]
    fn candidate_serde_keeps_similarity() {
        let c = FragmentCandidate {
            fragment_id: FragmentId::from("f1"),
            document_id: DocumentId::from("d1"),
            text: "hello".to_string(),
            label: Label::Public,
            source: "wiki".to_string(),
            owner_id: SubjectId::from("alice"),
            tenant: TenantId::from("dash"),
            legal_hold: false,
            similarity: 0.75,
        };
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["similarity"], 0.75);
        assert_eq!(json["label"], "public");
    }
}
