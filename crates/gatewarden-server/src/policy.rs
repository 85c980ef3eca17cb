//! Policy decision point clients.
//!
//! [`HttpPolicyAdapter`] speaks the external engine's wire contract and is
//! deny-by-default: transport failures, timeouts, and unparseable responses
//! all collapse to `DENY("policy-unavailable")`. [`LocalPolicy`] is the
//! built-in clearance policy used when no engine is configured, and doubles
//! as the deterministic policy for tests.

use std::collections::BTreeMap;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use gatewarden_core::decision::Decision;
use gatewarden_core::label::Label;
use gatewarden_core::retrieve::{Action, PolicyPoint, ResourceRef};
use gatewarden_core::types::Subject;

#[derive(Debug, Serialize)]
struct EngineSubject {
    id: String,
    groups: Vec<String>,
    attrs: BTreeMap<String, String>,
}

impl EngineSubject {
    fn from_subject(subject: &Subject) -> Self {
        let mut attrs = subject.attrs.extra.clone();
        attrs.insert("clearance".to_string(), subject.attrs.clearance.to_string());
        attrs.insert(
            "allow_export".to_string(),
            subject.attrs.allow_export.to_string(),
        );
        attrs.insert(
            "mfa_satisfied".to_string(),
            subject.attrs.mfa_satisfied.to_string(),
        );
        Self {
            id: subject.id.to_string(),
            groups: subject.groups.clone(),
            attrs,
        }
    }
}

#[derive(Debug, Serialize)]
struct EngineRequest<'a> {
    subject: EngineSubject,
    resource: &'a ResourceRef,
    action: &'a str,
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    allow: bool,
    #[serde(default)]
    step_up_required: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    rule_id: Option<String>,
}

/// Map an engine verdict to a decision, in the mandated priority order.
fn map_response(response: EngineResponse, mfa_satisfied: bool) -> Decision {
    if response.step_up_required && !mfa_satisfied {
        return Decision::step_up(
            response
                .reason
                .unwrap_or_else(|| "second factor required".to_string()),
        );
    }
    if response.allow {
        return Decision::allow(response.rule_id);
    }
    Decision::Deny {
        reason: response
            .reason
            .unwrap_or_else(|| "denied by policy".to_string()),
        rule_id: response.rule_id,
    }
}

pub struct HttpPolicyAdapter {
    client: reqwest::Client,
    url: String,
}

impl HttpPolicyAdapter {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn call(&self, request: &EngineRequest<'_>) -> Result<EngineResponse, EngineCallError> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(EngineCallError::transport)?;

        let status = response.status();
        if status.is_server_error() {
            return Err(EngineCallError::Transient(format!("engine returned {status}")));
        }
        if !status.is_success() {
            return Err(EngineCallError::Permanent(format!("engine returned {status}")));
        }
        response
            .json::<EngineResponse>()
            .await
            .map_err(|e| EngineCallError::Permanent(format!("bad engine response: {e}")))
    }
}

enum EngineCallError {
    /// Worth one retry: timeouts, connection failures, 5xx.
    Transient(String),
    /// Never retried: schema or status problems.
    Permanent(String),
}

impl EngineCallError {
    fn transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            EngineCallError::Transient(err.to_string())
        } else {
            EngineCallError::Permanent(err.to_string())
        }
    }
}

impl PolicyPoint for HttpPolicyAdapter {
    async fn evaluate(&self, subject: &Subject, resource: &ResourceRef, action: Action) -> Decision {
        let request = EngineRequest {
            subject: EngineSubject::from_subject(subject),
            resource,
            action: action.as_str(),
        };

        let mut attempted_retry = false;
        loop {
            match self.call(&request).await {
                Ok(response) => return map_response(response, subject.attrs.mfa_satisfied),
                Err(EngineCallError::Transient(msg)) if !attempted_retry => {
                    attempted_retry = true;
                    tracing::warn!(error = %msg, "policy engine call failed, retrying once");
                    let jitter_ms = rand::thread_rng().gen_range(25..=125);
                    tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
                }
                Err(EngineCallError::Transient(msg)) | Err(EngineCallError::Permanent(msg)) => {
                    tracing::warn!(error = %msg, "policy engine unavailable, denying by default");
                    return Decision::policy_unavailable();
                }
            }
        }
    }
}

/// Built-in clearance policy, used when `policy_engine_url` is empty.
///
/// Rules, in order: cross-tenant resources are denied; labels above the
/// subject's clearance are denied; regulated content is never exportable;
/// exports require the `allow_export` attribute; confidential-or-above
/// reads require a satisfied second factor.
#[derive(Debug, Clone, Default)]
pub struct LocalPolicy;

impl LocalPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl PolicyPoint for LocalPolicy {
    async fn evaluate(&self, subject: &Subject, resource: &ResourceRef, action: Action) -> Decision {
        if resource.tenant != subject.tenant {
            return Decision::Deny {
                reason: "resource belongs to another tenant".to_string(),
                rule_id: Some("tenant-isolation".to_string()),
            };
        }
        if resource.label > subject.attrs.clearance {
            return Decision::Deny {
                reason: "label above clearance".to_string(),
                rule_id: Some("clearance-gate".to_string()),
            };
        }
        if action == Action::Export {
            if resource.label == Label::Regulated {
                return Decision::Deny {
                    reason: "regulated content is not exportable".to_string(),
                    rule_id: Some("export-regulated".to_string()),
                };
            }
            if !subject.attrs.allow_export {
                return Decision::Deny {
                    reason: "subject may not export".to_string(),
                    rule_id: Some("export-gate".to_string()),
                };
            }
        }
        if resource.label >= Label::Confidential && !subject.attrs.mfa_satisfied {
            return Decision::step_up("sensitive label requires a second factor");
        }
        Decision::allow(Some("clearance-gate".to_string()))
    }
}
