//! Operational audit log lines, `target: "audit"`.
//!
//! These complement the hash-chained ledger: the ledger is the durable,
//! tamper-evident record; these events feed the log pipeline for alerting
//! and dashboards.

use gatewarden_core::types::SubjectId;

pub fn search_completed(actor: &SubjectId, allowed: usize, denied: usize, step_up: usize) {
    tracing::info!(
        target: "audit",
        event = "search_completed",
        actor = %actor,
        allowed = allowed,
        denied = denied,
        step_up = step_up,
        "search completed"
    );
}

pub fn search_rejected(actor: &SubjectId, denied: usize) {
    tracing::warn!(
        target: "audit",
        event = "search_rejected",
        actor = %actor,
        denied = denied,
        "every candidate was denied"
    );
}

pub fn export_decision(actor: &SubjectId, granted: bool) {
    tracing::info!(
        target: "audit",
        event = "export_decision",
        actor = %actor,
        granted = granted,
        "export decided"
    );
}

pub fn step_up_asserted(actor: &SubjectId) {
    tracing::info!(
        target: "audit",
        event = "step_up_asserted",
        actor = %actor,
        "second factor asserted"
    );
}

pub fn auth_failure(reason: &str) {
    tracing::warn!(
        target: "audit",
        event = "auth_failure",
        reason = reason,
        "authentication failed"
    );
}
