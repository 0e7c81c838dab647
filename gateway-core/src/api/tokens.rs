//! Capability token issuance (`POST /api/generate-token`, §4.1, §6).

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::registry::{AgentStatus, TokenRegistryEntry};
use crate::responses::Created;
use crate::state::AppState;
use crate::token::IssueParams;

#[derive(Debug, Deserialize)]
pub struct GenerateTokenRequest {
    pub agent_id: Uuid,
    pub tools: Vec<String>,
    pub permissions: Vec<String>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct GenerateTokenResponse {
    pub agent_token: String,
    pub expires_at: DateTime<Utc>,
    pub agent_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_id: Option<Uuid>,
}

/// `POST /api/generate-token`. Scopes are the cross product of `tools` and
/// `permissions` (`"search:query"`, `"chat:complete"`, ...) — the pair the
/// policy engine and `TokenPayload::has_scope` both key on (§4.1, §4.2).
pub async fn generate_token(
    State(state): State<AppState>,
    Json(body): Json<GenerateTokenRequest>,
) -> Result<Created<GenerateTokenResponse>> {
    let agent = state
        .registry()
        .get_agent(body.agent_id)
        .ok_or_else(|| Error::NotFound(format!("agent '{}' not found", body.agent_id)))?;
    if agent.status != AgentStatus::Active {
        return Err(Error::ValidationError("agent is disabled".into()));
    }
    if body.tools.is_empty() || body.permissions.is_empty() {
        return Err(Error::ValidationError("tools and permissions must be non-empty".into()));
    }

    let ttl_seconds = (body.expires_at - Utc::now()).num_seconds();
    if ttl_seconds <= 0 {
        return Err(Error::ValidationError("expires_at must be in the future".into()));
    }

    let scopes: Vec<String> = body
        .tools
        .iter()
        .flat_map(|tool| body.permissions.iter().map(move |action| format!("{tool}:{action}")))
        .collect();

    let token_id = Uuid::new_v4();
    let signed = state.token_codec().issue(IssueParams {
        agent_id: agent.id,
        scopes,
        ttl_seconds,
        token_id: Some(token_id),
    });

    let mut hasher = Sha256::new();
    hasher.update(signed.0.as_bytes());
    let payload_hash = format!("{:x}", hasher.finalize());

    state.registry().register_token(TokenRegistryEntry {
        token_id,
        agent_id: agent.id,
        payload_hash,
        issued_at: Utc::now(),
        expires_at: body.expires_at,
        is_revoked: false,
    })?;

    Ok(Created::new(GenerateTokenResponse {
        agent_token: signed.0,
        expires_at: body.expires_at,
        agent_name: agent.name,
        token_id: Some(token_id),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scopes_are_the_cross_product_of_tools_and_permissions() {
        let tools = vec!["search".to_string(), "chat".to_string()];
        let permissions = vec!["query".to_string()];
        let scopes: Vec<String> = tools
            .iter()
            .flat_map(|tool| permissions.iter().map(move |action| format!("{tool}:{action}")))
            .collect();
        assert_eq!(scopes, vec!["search:query".to_string(), "chat:query".to_string()]);
    }
}
