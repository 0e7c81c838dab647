//! Agent capability token issuance and validation (§4.1).
//!
//! A token is `base64url(payload_json) "." hex(HMAC_SHA256(secret, base64url_payload))`.
//! The signing secret (`TOKEN_HMAC_SECRET`) is loaded once at process start
//! from [`crate::config_manager`]; rotating it at runtime is an open
//! question the spec declines to resolve (see `DESIGN.md`).

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Scopes are `"tool:action"` strings, e.g. `"search:query"`.
pub type Scope = String;

/// Decoded token contents, carried through the pipeline after validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenPayload {
    pub agent_id: Uuid,
    pub scopes: Vec<Scope>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub nonce: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,
}

impl TokenPayload {
    pub fn has_scope(&self, tool: &str, action: &str) -> bool {
        let needle = format!("{tool}:{action}");
        self.scopes.iter().any(|s| s == &needle)
    }
}

/// Parameters for [`TokenCodec::issue`].
pub struct IssueParams {
    pub agent_id: Uuid,
    pub scopes: Vec<Scope>,
    pub ttl_seconds: i64,
    pub token_id: Option<Uuid>,
}

/// A serialized, signed token ready to hand back to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedToken(pub String);

impl std::fmt::Display for SignedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why [`TokenCodec::validate`] rejected a token. Deliberately not a
/// `crate::error::Error` — the proxy pipeline maps these to the
/// authentication taxonomy at the call site (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationFailure {
    Malformed,
    BadSignature,
    Expired,
}

impl ValidationFailure {
    pub fn reason(self) -> &'static str {
        match self {
            ValidationFailure::Malformed => "malformed",
            ValidationFailure::BadSignature => "bad_signature",
            ValidationFailure::Expired => "expired",
        }
    }
}

/// Signs and verifies agent capability tokens under a process-wide secret.
#[derive(Clone)]
pub struct TokenCodec {
    secret: Vec<u8>,
    rotation_horizon: Duration,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>, rotation_horizon_secs: i64) -> Self {
        Self {
            secret: secret.into(),
            rotation_horizon: Duration::seconds(rotation_horizon_secs),
        }
    }

    /// Issue a new signed token (§4.1).
    pub fn issue(&self, params: IssueParams) -> SignedToken {
        let issued_at = Utc::now();
        let expires_at = issued_at + Duration::seconds(params.ttl_seconds);
        let payload = TokenPayload {
            agent_id: params.agent_id,
            scopes: params.scopes,
            issued_at,
            expires_at,
            nonce: Uuid::new_v4(),
            token_id: params.token_id,
        };
        self.encode(&payload)
    }

    fn encode(&self, payload: &TokenPayload) -> SignedToken {
        let json = serde_json::to_vec(payload).expect("TokenPayload always serializes");
        let encoded_payload = URL_SAFE_NO_PAD.encode(json);
        let sig = self.sign(encoded_payload.as_bytes());
        SignedToken(format!("{encoded_payload}.{sig}"))
    }

    fn sign(&self, encoded_payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(encoded_payload);
        to_hex(&mac.finalize().into_bytes())
    }

    /// Validate a serialized token: checks shape, signature (constant-time),
    /// then expiry. Never panics on attacker-controlled input.
    pub fn validate(&self, token: &str) -> std::result::Result<TokenPayload, ValidationFailure> {
        let (encoded_payload, sig_hex) = token
            .split_once('.')
            .ok_or(ValidationFailure::Malformed)?;

        let expected_sig = self.sign(encoded_payload.as_bytes());
        if !constant_time_eq(expected_sig.as_bytes(), sig_hex.as_bytes()) {
            return Err(ValidationFailure::BadSignature);
        }

        let payload_bytes = URL_SAFE_NO_PAD
            .decode(encoded_payload)
            .map_err(|_| ValidationFailure::Malformed)?;
        let payload: TokenPayload =
            serde_json::from_slice(&payload_bytes).map_err(|_| ValidationFailure::Malformed)?;

        if Utc::now() >= payload.expires_at {
            return Err(ValidationFailure::Expired);
        }

        Ok(payload)
    }

    /// True when the token will expire within the configured rotation
    /// horizon (default 5 minutes). Callers set the
    /// `X-Token-Rotation-Recommended` header when this is true.
    pub fn is_expiring_soon(&self, payload: &TokenPayload) -> bool {
        payload.expires_at - Utc::now() <= self.rotation_horizon
    }
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut acc, b| {
        let _ = write!(acc, "{b:02x}");
        acc
    })
}

/// Byte-for-byte constant-time comparison; does not use `subtle` because the
/// rest of the stack favors small, direct dependencies for primitives this
/// size (see DESIGN.md).
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> TokenCodec {
        TokenCodec::new(b"test-signing-secret".to_vec(), 300)
    }

    #[test]
    fn issue_then_validate_round_trips() {
        let codec = codec();
        let agent_id = Uuid::new_v4();
        let token = codec.issue(IssueParams {
            agent_id,
            scopes: vec!["search:query".to_string()],
            ttl_seconds: 900,
            token_id: None,
        });
        let payload = codec.validate(&token.0).unwrap();
        assert_eq!(payload.agent_id, agent_id);
        assert!(payload.has_scope("search", "query"));
        assert!(Utc::now() < payload.expires_at);
    }

    #[test]
    fn tampering_payload_byte_breaks_signature() {
        let codec = codec();
        let token = codec.issue(IssueParams {
            agent_id: Uuid::new_v4(),
            scopes: vec!["search:query".to_string()],
            ttl_seconds: 900,
            token_id: None,
        });
        let mut mutated = token.0.clone();
        let pos = mutated.find('.').unwrap() - 1;
        let bytes = unsafe { mutated.as_bytes_mut() };
        bytes[pos] ^= 0x01;
        let err = codec.validate(&mutated).unwrap_err();
        assert!(matches!(
            err,
            ValidationFailure::BadSignature | ValidationFailure::Malformed
        ));
    }

    #[test]
    fn malformed_token_without_separator() {
        let codec = codec();
        assert_eq!(
            codec.validate("not-a-token").unwrap_err(),
            ValidationFailure::Malformed
        );
    }

    #[test]
    fn expired_token_is_rejected() {
        let codec = codec();
        let token = codec.issue(IssueParams {
            agent_id: Uuid::new_v4(),
            scopes: vec!["search:query".to_string()],
            ttl_seconds: -1,
            token_id: None,
        });
        assert_eq!(codec.validate(&token.0).unwrap_err(), ValidationFailure::Expired);
    }

    #[test]
    fn is_expiring_soon_within_horizon() {
        let codec = codec();
        let token = codec.issue(IssueParams {
            agent_id: Uuid::new_v4(),
            scopes: vec!["search:query".to_string()],
            ttl_seconds: 60,
            token_id: None,
        });
        let payload = codec.validate(&token.0).unwrap();
        assert!(codec.is_expiring_soon(&payload));
    }

    #[test]
    fn is_expiring_soon_false_for_long_ttl() {
        let codec = codec();
        let token = codec.issue(IssueParams {
            agent_id: Uuid::new_v4(),
            scopes: vec!["search:query".to_string()],
            ttl_seconds: 3600,
            token_id: None,
        });
        let payload = codec.validate(&token.0).unwrap();
        assert!(!codec.is_expiring_soon(&payload));
    }
}
