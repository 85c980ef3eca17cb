use std::sync::atomic::{AtomicU64, Ordering};

use gatewarden_core::decision::Decision;

#[derive(Debug, Default)]
pub struct Metrics {
    request_total: AtomicU64,
    request_success: AtomicU64,
    request_error: AtomicU64,
    decisions_allow: AtomicU64,
    decisions_deny: AtomicU64,
    decisions_step_up: AtomicU64,
    auth_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.request_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.request_success.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.request_error.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_decision(&self, decision: &Decision) {
        let counter = match decision {
            Decision::Allow { .. } => &self.decisions_allow,
            Decision::Deny { .. } => &self.decisions_deny,
            Decision::StepUp { .. } => &self.decisions_step_up,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Unauthenticated requests are not written to the ledger; this counter
    /// is their only trace.
    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn request_total(&self) -> u64 {
        self.request_total.load(Ordering::Relaxed)
    }

    pub fn request_success(&self) -> u64 {
        self.request_success.load(Ordering::Relaxed)
    }

    pub fn request_error(&self) -> u64 {
        self.request_error.load(Ordering::Relaxed)
    }

    pub fn auth_failures(&self) -> u64 {
        self.auth_failures.load(Ordering::Relaxed)
    }

    pub fn render_prometheus(&self) -> String {
        let mut output = String::new();
        let mut counter = |name: &str, help: &str, value: u64| {
            output.push_str(&format!("# HELP {name} {help}\n"));
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {value}\n"));
        };
        counter(
            "gatewarden_requests_total",
            "Total number of gateway requests.",
            self.request_total.load(Ordering::Relaxed),
        );
        counter(
            "gatewarden_requests_success_total",
            "Total successful requests.",
            self.request_success.load(Ordering::Relaxed),
        );
        counter(
            "gatewarden_requests_error_total",
            "Total failed requests.",
            self.request_error.load(Ordering::Relaxed),
        );
        counter(
            "gatewarden_decisions_allow_total",
            "Policy evaluations that allowed a fragment.",
            self.decisions_allow.load(Ordering::Relaxed),
        );
        counter(
            "gatewarden_decisions_deny_total",
            "Policy evaluations that denied a fragment.",
            self.decisions_deny.load(Ordering::Relaxed),
        );
        counter(
            "gatewarden_decisions_step_up_total",
            "Policy evaluations that required step-up.",
            self.decisions_step_up.load(Ordering::Relaxed),
        );
        counter(
            "gatewarden_auth_failures_total",
            "Requests rejected at token verification.",
            self.auth_failures.load(Ordering::Relaxed),
        );
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_are_zero() {
        let m = Metrics::new();
        assert_eq!(m.request_total(), 0);
        assert_eq!(m.request_success(), 0);
        assert_eq!(m.request_error(), 0);
        assert_eq!(m.auth_failures(), 0);
    }

    #[test]
    fn record_increments_counters() {
        let m = Metrics::new();
        m.record_request();
        m.record_request();
        m.record_success();
        m.record_error();
        m.record_auth_failure();

        assert_eq!(m.request_total(), 2);
        assert_eq!(m.request_success(), 1);
        assert_eq!(m.request_error(), 1);
        assert_eq!(m.auth_failures(), 1);
    }

    #[test]
    fn decisions_bucket_by_kind() {
        let m = Metrics::new();
        m.record_decision(&Decision::allow(None));
        m.record_decision(&Decision::deny("nope"));
        m.record_decision(&Decision::deny("nope"));
        m.record_decision(&Decision::step_up("mfa"));

        let rendered = m.render_prometheus();
        assert!(rendered.contains("gatewarden_decisions_allow_total 1"));
        assert!(rendered.contains("gatewarden_decisions_deny_total 2"));
        assert!(rendered.contains("gatewarden_decisions_step_up_total 1"));
    }

    #[test]
    fn render_emits_help_and_type_lines() {
        let rendered = Metrics::new().render_prometheus();
        assert!(rendered.contains("# HELP gatewarden_requests_total"));
        assert!(rendered.contains("# TYPE gatewarden_requests_total counter"));
    }
}
