use serde::{Deserialize, Serialize};

/// Reason attached to decisions synthesized when the policy engine cannot be
/// consulted. Deny-by-default is absolute: every uncertainty collapses here.
pub const POLICY_UNAVAILABLE: &str = "policy-unavailable";

/// Reason attached to evaluations abandoned at the request deadline.
pub const CANCELLED: &str = "cancelled";

/// Outcome of one policy evaluation. Closed set; every consumer must handle
/// all three arms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Allow {
        rule_id: Option<String>,
    },
    Deny {
        reason: String,
        rule_id: Option<String>,
    },
    #[serde(rename = "STEP_UP_REQUIRED")]
    StepUp {
        reason: String,
    },
}

impl Decision {
    pub fn allow(rule_id: Option<String>) -> Self {
        Decision::Allow { rule_id }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Decision::Deny {
            reason: reason.into(),
            rule_id: None,
        }
    }

    pub fn step_up(reason: impl Into<String>) -> Self {
        Decision::StepUp {
            reason: reason.into(),
        }
    }

    pub fn policy_unavailable() -> Self {
        Decision::deny(POLICY_UNAVAILABLE)
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn is_step_up(&self) -> bool {
        matches!(self, Decision::StepUp { .. })
    }

    pub fn kind_str(&self) -> &'static str {
        match self {
            Decision::Allow { .. } => "ALLOW",
            Decision::Deny { .. } => "DENY",
            Decision::StepUp { .. } => "STEP_UP_REQUIRED",
        }
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Decision::Allow { .. } => None,
            Decision::Deny { reason, .. } | Decision::StepUp { reason } => Some(reason),
        }
    }

    pub fn rule_id(&self) -> Option<&str> {
        match self {
            Decision::Allow { rule_id } | Decision::Deny { rule_id, .. } => rule_id.as_deref(),
            Decision::StepUp { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_match_wire_vocabulary() {
        assert_eq!(Decision::allow(None).kind_str(), "ALLOW");
        assert_eq!(Decision::deny("nope").kind_str(), "DENY");
        assert_eq!(Decision::step_up("mfa").kind_str(), "STEP_UP_REQUIRED");
    }

    #[test]
    fn allow_has_no_reason() {
        assert_eq!(Decision::allow(Some("r1".into())).reason(), None);
        assert_eq!(Decision::allow(Some("r1".into())).rule_id(), Some("r1"));
    }

    #[test]
    fn deny_carries_reason_and_rule() {
        let d = Decision::Deny {
            reason: "label above clearance".to_string(),
            rule_id: Some("clearance-gate".to_string()),
        };
        assert_eq!(d.reason(), Some("label above clearance"));
        assert_eq!(d.rule_id(), Some("clearance-gate"));
        assert!(!d.is_allow());
    }

    #[test]
    fn policy_unavailable_is_a_deny() {
        let d = Decision::policy_unavailable();
        assert!(!d.is_allow());
        assert_eq!(d.reason(), Some(POLICY_UNAVAILABLE));
    }

    #[test]
    fn serde_tags_by_kind() {
        let json = serde_json::to_value(Decision::step_up("confidential requires mfa")).unwrap();
        assert_eq!(json["kind"], "STEP_UP_REQUIRED");
        let back: Decision =
            serde_json::from_value(serde_json::json!({"kind": "ALLOW", "rule_id": null})).unwrap();
        assert!(back.is_allow());
    }
}
