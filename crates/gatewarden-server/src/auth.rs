//! Bearer token mint and verify.
//!
//! Tokens are compact HS256 JWTs: `base64url(header).base64url(claims).sig`
//! over the configured signing key. The gateway never talks to the identity
//! provider at request time; possession of a token with a valid signature
//! and unexpired `exp` is the authentication contract.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use gatewarden_core::label::Label;
use gatewarden_core::types::{SubjectId, TenantId};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing authorization header")]
    MissingHeader,

    #[error("malformed token")]
    Malformed,

    #[error("bad signature")]
    BadSignature,

    #[error("token expired")]
    Expired,

    #[error("internal authentication error: {0}")]
    Internal(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenAttrs {
    pub clearance: Label,
    pub allow_export: bool,
}

/// Claim names are contractual: `sub`, `groups`, `attrs`, `tenant`, `exp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub sub: String,
    pub groups: Vec<String>,
    pub attrs: TokenAttrs,
    pub tenant: String,
    pub exp: i64,
}

/// Verified identity attached to each request by the auth middleware.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub subject_id: SubjectId,
    pub tenant: TenantId,
    pub groups: Vec<String>,
}

impl AuthContext {
    pub fn from_claims(claims: &TokenClaims) -> Self {
        Self {
            subject_id: SubjectId::new(claims.sub.clone()),
            tenant: TenantId::new(claims.tenant.clone()),
            groups: claims.groups.clone(),
        }
    }

    pub fn is_auditor(&self) -> bool {
        self.groups.iter().any(|g| g == "auditors")
    }
}

#[derive(Clone)]
pub struct TokenSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner").field("key", &"[REDACTED]").finish()
    }
}

const HEADER_JSON: &str = r#"{"alg":"HS256","typ":"JWT"}"#;

impl TokenSigner {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.as_bytes().to_vec(),
        }
    }

    pub fn mint(&self, claims: &TokenClaims) -> Result<String, AuthError> {
        let header = URL_SAFE_NO_PAD.encode(HEADER_JSON);
        let payload_json =
            serde_json::to_vec(claims).map_err(|e| AuthError::Internal(e.to_string()))?;
        let payload = URL_SAFE_NO_PAD.encode(payload_json);

        let signing_input = format!("{header}.{payload}");
        let signature = URL_SAFE_NO_PAD.encode(self.sign(signing_input.as_bytes())?);
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify signature and expiry; returns the claims on success.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, AuthError> {
        let mut parts = token.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed);
        };

        let presented = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| AuthError::Malformed)?;
        let signing_input = format!("{header}.{payload}");
        let expected = self.sign(signing_input.as_bytes())?;
        if !bool::from(presented.as_slice().ct_eq(expected.as_slice())) {
            return Err(AuthError::BadSignature);
        }

        let payload_json = URL_SAFE_NO_PAD
            .decode(payload)
            .map_err(|_| AuthError::Malformed)?;
        let claims: TokenClaims =
            serde_json::from_slice(&payload_json).map_err(|_| AuthError::Malformed)?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(claims)
    }

    fn sign(&self, input: &[u8]) -> Result<Vec<u8>, AuthError> {
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| AuthError::Internal(e.to_string()))?;
        mac.update(input);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Strip the `Bearer ` scheme from an Authorization header value.
pub fn bearer_token(header_value: &str) -> Result<&str, AuthError> {
    header_value
        .strip_prefix("Bearer ")
        .ok_or(AuthError::Malformed)
}
