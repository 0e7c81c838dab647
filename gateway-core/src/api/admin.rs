//! Admin HTTP surface (§6): policy CRUD, chaos configuration, credential
//! upload, the operational config-backup endpoints, recovery trigger, and
//! degradation force/recover. Every route here sits behind the admin JWT
//! layer ([`crate::middleware::JwtAuth`]) wired in [`crate::server`] — the
//! agent capability tokens validated by [`crate::token`] are a completely
//! separate credential.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chaos::{ChaosMode, ChaosSetting};
use crate::config_manager::BackupMetadata;
use crate::crypto::seal;
use crate::error::{Error, Result};
use crate::registry::{PolicyAssignment, PolicySpec, PolicyTarget, Tool, ToolCredential};
use crate::responses::{Created, NoContent};
use crate::state::AppState;
use crate::supervision::DegradationLevel;

// ---------------------------------------------------------------------
// Policy CRUD
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreatePolicyAssignmentRequest {
    pub agent_id: Option<Uuid>,
    pub role: Option<String>,
    pub spec: PolicySpec,
}

/// `GET /api/admin/policies` — every assignment, agent- and role-scoped.
pub async fn list_policies(State(state): State<AppState>) -> Json<Vec<PolicyAssignment>> {
    Json(state.registry().list_policy_assignments())
}

/// `POST /api/admin/policies` — attach a [`PolicySpec`] to exactly one of
/// `agent_id` or `role` (§3: "associated with either a specific `agentId`
/// or a `role`").
pub async fn create_policy(
    State(state): State<AppState>,
    Json(body): Json<CreatePolicyAssignmentRequest>,
) -> Result<Created<PolicyAssignment>> {
    if body.spec.scopes.is_empty() {
        return Err(Error::ValidationError("policy spec requires at least one scope".into()));
    }
    let target = match (body.agent_id, body.role) {
        (Some(agent_id), None) => PolicyTarget::Agent(agent_id),
        (None, Some(role)) => PolicyTarget::Role(role),
        _ => {
            return Err(Error::ValidationError(
                "exactly one of agent_id or role must be set".into(),
            ))
        }
    };
    let assignment = PolicyAssignment {
        id: Uuid::new_v4(),
        target,
        spec: body.spec,
    };
    state.registry().put_policy_assignment(assignment.clone())?;
    Ok(Created::new(assignment))
}

/// `DELETE /api/admin/policies/:id`.
pub async fn delete_policy(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<NoContent> {
    state.registry().delete_policy_assignment(id)?;
    Ok(NoContent)
}

// ---------------------------------------------------------------------
// Chaos configuration (§4.8, §6: "{tool, mode, pct}")
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChaosConfigRequest {
    pub tool: String,
    pub mode: ChaosMode,
    pub pct: u8,
}

#[derive(Debug, Serialize)]
pub struct ChaosConfigResponse {
    pub tool: String,
    pub mode: ChaosMode,
    pub probability_percent: u8,
}

/// `POST /api/admin/chaos` — configure (or overwrite) one tool's fault
/// injection. `pct` is clamped to `[0, 100]` by the type (`u8`); values
/// above 100 are rejected explicitly since the spec defines the domain as
/// a closed interval.
pub async fn configure_chaos(
    State(state): State<AppState>,
    Json(body): Json<ChaosConfigRequest>,
) -> Result<Json<ChaosConfigResponse>> {
    if Tool::parse(&body.tool).is_none() {
        return Err(Error::ValidationError(format!("unknown tool '{}'", body.tool)));
    }
    if body.pct > 100 {
        return Err(Error::ValidationError("pct must be between 0 and 100".into()));
    }
    let setting = ChaosSetting {
        mode: body.mode,
        probability_percent: body.pct,
    };
    state.chaos().configure(body.tool.clone(), setting);
    Ok(Json(ChaosConfigResponse {
        tool: body.tool,
        mode: body.mode,
        probability_percent: body.pct,
    }))
}

/// `DELETE /api/admin/chaos/:tool` — clear a tool's chaos setting.
pub async fn clear_chaos(State(state): State<AppState>, Path(tool): Path<String>) -> Result<NoContent> {
    state.chaos().clear(&tool);
    Ok(NoContent)
}

/// `GET /api/admin/chaos` — every currently configured tool.
pub async fn list_chaos(State(state): State<AppState>) -> Json<HashMap<String, ChaosSetting>> {
    Json(state.chaos().list())
}

// ---------------------------------------------------------------------
// Credential upload (§4.12: sealed on write)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UploadCredentialRequest {
    pub tool: String,
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct UploadCredentialResponse {
    pub tool: String,
    pub created_at: chrono::DateTime<Utc>,
}

/// `POST /api/admin/credentials` — seal `secret` under the process KEK and
/// store it as the active credential for `tool`; any prior credential for
/// the same tool is superseded (a new row is written, the old one is left
/// in place but is no longer `active_credential`). Reloads the live
/// adapter set afterwards so the next proxy call picks up the change
/// without a restart.
pub async fn upload_credential(
    State(state): State<AppState>,
    Json(body): Json<UploadCredentialRequest>,
) -> Result<Created<UploadCredentialResponse>> {
    let tool = Tool::parse(&body.tool).ok_or_else(|| Error::ValidationError(format!("unknown tool '{}'", body.tool)))?;
    if body.secret.trim().is_empty() {
        return Err(Error::ValidationError("secret must not be empty".into()));
    }
    let sealed = seal(body.secret.as_bytes(), state.kek())?;
    let created_at = Utc::now();
    state.registry().put_credential(ToolCredential {
        tool,
        encrypted_credential: sealed,
        created_at,
        revoked_at: None,
    })?;
    state.reload_adapters()?;
    Ok(Created::new(UploadCredentialResponse {
        tool: body.tool,
        created_at,
    }))
}

/// `DELETE /api/admin/credentials/:tool` — revoke the active credential.
pub async fn revoke_credential(State(state): State<AppState>, Path(tool): Path<String>) -> Result<NoContent> {
    let tool = Tool::parse(&tool).ok_or_else(|| Error::ValidationError(format!("unknown tool '{tool}'")))?;
    state.registry().revoke_credential(tool)?;
    state.reload_adapters()?;
    Ok(NoContent)
}

// ---------------------------------------------------------------------
// Operational configuration (§4.10, §6)
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UpdateConfigRequest {
    pub changes: HashMap<String, String>,
    pub reason: String,
}

/// `PATCH /api/admin/config` — atomic, validated, backed-up update of the
/// live `.env` file.
pub async fn update_config(
    State(state): State<AppState>,
    Json(body): Json<UpdateConfigRequest>,
) -> Result<Json<BackupMetadata>> {
    let backup = state.config_manager().update_config(
        body.changes,
        &body.reason,
        crate::config_manager::validate_required_keys,
    )?;
    Ok(Json(backup))
}

/// `GET /api/admin/config/backups` — newest first.
pub async fn list_backups(State(state): State<AppState>) -> Result<Json<Vec<BackupMetadata>>> {
    Ok(Json(state.config_manager().list_backups()?))
}

/// `POST /api/admin/config/backups/:id/rollback` — restore a prior backup
/// unconditionally (§4.10: "rollback must always succeed").
pub async fn rollback_config(State(state): State<AppState>, Path(id): Path<String>) -> Result<NoContent> {
    state.config_manager().rollback_config(&id)?;
    Ok(NoContent)
}

#[derive(Debug, Deserialize)]
pub struct CleanupBackupsRequest {
    #[serde(default = "default_keep")]
    pub keep: usize,
}

fn default_keep() -> usize {
    10
}

#[derive(Debug, Serialize)]
pub struct CleanupBackupsResponse {
    pub removed: usize,
}

/// `POST /api/admin/config/backups/cleanup`.
pub async fn cleanup_backups(
    State(state): State<AppState>,
    Json(body): Json<CleanupBackupsRequest>,
) -> Result<Json<CleanupBackupsResponse>> {
    let removed = state.config_manager().cleanup_backups(body.keep)?;
    Ok(Json(CleanupBackupsResponse { removed }))
}

// ---------------------------------------------------------------------
// Recovery & degradation (§4.11)
// ---------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct RecoveryTriggerResponse {
    pub successes: u64,
    pub failures: u64,
}

/// `POST /api/admin/recovery/trigger` — run the recovery controller's
/// matching strategy against its last-reported snapshot out-of-band, the
/// way the watchdog would after sustained unhealthy status.
pub async fn trigger_recovery(State(state): State<AppState>) -> Json<RecoveryTriggerResponse> {
    state.recovery().trigger().await;
    Json(RecoveryTriggerResponse {
        successes: state.recovery().successes(),
        failures: state.recovery().failures(),
    })
}

#[derive(Debug, Serialize)]
pub struct DegradationResponse {
    pub level: u8,
}

/// `POST /api/admin/degradation/force/:level` — manually set the
/// degradation level (operator override, e.g. before a planned maintenance
/// window).
pub async fn force_degradation(
    State(state): State<AppState>,
    Path(level): Path<u8>,
) -> Result<Json<DegradationResponse>> {
    let level = match level {
        0 => DegradationLevel::Normal,
        1 => DegradationLevel::DisableCaches,
        2 => DegradationLevel::DisableNonEssential,
        3 => DegradationLevel::HealthOnly,
        other => return Err(Error::ValidationError(format!("degradation level must be 0-3, got {other}"))),
    };
    state.degradation().set_level(level, state.audit()).await;
    Ok(Json(DegradationResponse {
        level: state.degradation().level(),
    }))
}

/// `POST /api/admin/degradation/recover` — step back to `Normal`.
pub async fn recover_degradation(State(state): State<AppState>) -> Json<DegradationResponse> {
    state
        .degradation()
        .set_level(DegradationLevel::Normal, state.audit())
        .await;
    Json(DegradationResponse {
        level: state.degradation().level(),
    })
}

// ---------------------------------------------------------------------
// Sandbox introspection (§6, §9 Open Questions): gated behind demo mode.
// Deliberately the *unsigned* token form — never accepted by the proxy
// pipeline, which only honours `TokenCodec::validate`'s HMAC-signed form.
// ---------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SandboxTokenRequest {
    pub agent_id: Uuid,
    pub scopes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct SandboxTokenResponse {
    pub sandbox_token: String,
}

/// `POST /api/sandbox/token` — a raw, unsigned base64-of-JSON token for
/// exploring the dashboard locally. Refuses to run unless
/// `gateway.demo_mode` is set: this form carries no HMAC and must never be
/// mistaken for a production capability token.
pub async fn sandbox_token(
    State(state): State<AppState>,
    Json(body): Json<SandboxTokenRequest>,
) -> Result<Json<SandboxTokenResponse>> {
    if !state.config().gateway.demo_mode {
        return Err(Error::NotFound("sandbox endpoints require demo mode".into()));
    }
    let payload = serde_json::json!({
        "agentId": body.agent_id,
        "scopes": body.scopes,
        "issuedAt": Utc::now(),
    });
    use base64::Engine;
    let encoded = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(
        serde_json::to_vec(&payload).map_err(|e| Error::Internal(e.to_string()))?,
    );
    Ok(Json(SandboxTokenResponse { sandbox_token: encoded }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_policy_request_needs_exactly_one_target() {
        let agent_id = Some(Uuid::new_v4());
        let role = Some("support".to_string());
        assert!(matches!((agent_id, None::<String>), (Some(_), None)));
        assert!(matches!((None::<Uuid>, role), (None, Some(_))));
    }

    #[test]
    fn chaos_pct_above_100_is_rejected_by_validation() {
        let pct: u8 = 150;
        assert!(pct > 100);
    }
}
