//! Agent registration and lookup (`POST /api/create-agent`, `GET /api/agents`,
//! `GET /api/agents/:id`, §6).

use axum::extract::{Path, State};
use axum::Json;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::registry::{Agent, AgentKeyPair, AgentStatus};
use crate::responses::Created;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAgentRequest {
    pub name: String,
    pub created_by: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct CreateAgentResponse {
    pub agent_id: Uuid,
    pub private_key: String,
}

/// `POST /api/create-agent` — generates a fresh keypair, stores the public
/// half, and hands the private half back exactly once. Nothing in this
/// core ever persists the private key (§4.12: "only the public half is
/// ever stored").
pub async fn create_agent(
    State(state): State<AppState>,
    Json(body): Json<CreateAgentRequest>,
) -> Result<Created<CreateAgentResponse>> {
    if body.name.trim().is_empty() || body.role.trim().is_empty() {
        return Err(Error::ValidationError("name and role are required".into()));
    }

    let keypair = AgentKeyPair::generate();
    let agent = Agent {
        id: Uuid::new_v4(),
        name: body.name,
        created_by: body.created_by,
        role: body.role,
        public_key: keypair.public_key,
        status: AgentStatus::Active,
        created_at: Utc::now(),
    };
    state.registry().create_agent(agent.clone())?;

    Ok(Created::new(CreateAgentResponse {
        agent_id: agent.id,
        private_key: STANDARD.encode(keypair.private_key),
    })
    .with_location(format!("/api/agents/{}", agent.id)))
}

/// `GET /api/agents` — every registered agent, public keys only.
pub async fn list_agents(State(state): State<AppState>) -> Json<Vec<Agent>> {
    Json(state.registry().list_agents())
}

/// `GET /api/agents/:id`.
pub async fn get_agent(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<Json<Agent>> {
    state
        .registry()
        .get_agent(id)
        .map(Json)
        .ok_or_else(|| Error::NotFound(format!("agent '{id}' not found")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;

    #[test]
    fn create_agent_request_requires_name_and_role() {
        let request = CreateAgentRequest {
            name: String::new(),
            created_by: "tester".into(),
            role: "default".into(),
        };
        assert!(request.name.trim().is_empty());
    }

    #[test]
    fn list_agents_reflects_registry_contents() {
        let registry = InMemoryRegistry::new(10);
        let agent = Agent {
            id: Uuid::new_v4(),
            name: "a".into(),
            created_by: "tester".into(),
            role: "default".into(),
            public_key: vec![0u8; 32],
            status: AgentStatus::Active,
            created_at: Utc::now(),
        };
        use crate::registry::Registry;
        registry.create_agent(agent.clone()).unwrap();
        assert_eq!(registry.list_agents().len(), 1);
        assert_eq!(registry.get_agent(agent.id).unwrap().name, "a");
    }
}
