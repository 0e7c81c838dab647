//! Health check handlers (§4.11, §6): liveness, enhanced registry detail,
//! readiness, and the Prometheus metrics scrape endpoint.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use crate::supervision::HealthStatus;

/// Liveness probe response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: Option<String>,
}

/// Enhanced health response with every registered check and the current
/// degradation level.
#[derive(Debug, Serialize)]
pub struct EnhancedHealthResponse {
    pub status: HealthStatus,
    pub service: String,
    pub degradation_level: u8,
    pub checks: Vec<crate::supervision::CheckResult>,
    pub recovery_successes: u64,
    pub recovery_failures: u64,
}

/// Readiness response: 200 while the process accepts new work, 503 once
/// shutdown has begun or the aggregate health status is unhealthy.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub service: String,
}

/// `GET /health` — always 200 while the process is alive.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config().service.name.clone(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    };
    (StatusCode::OK, Json(response))
}

/// `GET /health/enhanced` — full registry snapshot plus recovery counters.
pub async fn enhanced_health(State(state): State<AppState>) -> impl IntoResponse {
    let checks = state.health_registry().all_results();
    let status = state.health_registry().aggregate();
    let response = EnhancedHealthResponse {
        status,
        service: state.config().service.name.clone(),
        degradation_level: state.degradation().level(),
        checks,
        recovery_successes: state.recovery().successes(),
        recovery_failures: state.recovery().failures(),
    };
    let code = match status {
        HealthStatus::Healthy => StatusCode::OK,
        HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(response))
}

/// `GET /ready` — 200 unless shutting down or the aggregate status is
/// unhealthy.
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let ready = !state.is_shutting_down()
        && !matches!(state.health_registry().aggregate(), HealthStatus::Unhealthy);
    let response = ReadinessResponse {
        ready,
        service: state.config().service.name.clone(),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(response))
}

/// `GET /metrics` — Prometheus text exposition (§11).
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics().render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_serializes_status() {
        let response = HealthResponse {
            status: "healthy".to_string(),
            service: "gateway".to_string(),
            version: Some("1.0.0".to_string()),
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "healthy");
    }
}
