//! `POST /api/proxy-request` (§4.9, §6): the thin HTTP translation layer
//! over [`crate::proxy::handle_proxy_request`] — headers and the
//! correlation id are the only concerns this layer owns, the pipeline
//! itself lives in `proxy`.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ids::CorrelationId;
use crate::proxy::{handle_proxy_request, ProxyRequest};
use crate::sse::BroadcastMessage;
use crate::state::AppState;

const HEADER_CORRELATION_ID: &str = "X-Correlation-Id";
const HEADER_ROTATION_RECOMMENDED: &str = "X-Token-Rotation-Recommended";
const HEADER_TOKEN_EXPIRES_AT: &str = "X-Token-Expires-At";

pub async fn proxy_request(State(state): State<AppState>, Json(body): Json<ProxyRequest>) -> Response {
    let correlation_id = CorrelationId::new();
    let deps = state.proxy_deps();

    match handle_proxy_request(&deps, correlation_id.clone(), body).await {
        Ok((success, response_headers)) => {
            let message = BroadcastMessage::json_named("tool_call", &success)
                .unwrap_or_else(|_| BroadcastMessage::new("{}"))
                .with_id(correlation_id.as_str());
            let _ = state
                .log_broadcaster()
                .broadcast_to_channel(&success.metadata.agent_id.to_string(), message)
                .await;
            let mut headers = HeaderMap::new();
            headers.insert(HEADER_CORRELATION_ID, correlation_id.as_str().parse().unwrap());
            if response_headers.rotation_recommended {
                headers.insert(HEADER_ROTATION_RECOMMENDED, "true".parse().unwrap());
            }
            if let Some(expires_at) = response_headers.token_expires_at {
                if let Ok(value) = expires_at.to_rfc3339().parse() {
                    headers.insert(HEADER_TOKEN_EXPIRES_AT, value);
                }
            }
            (headers, Json(success)).into_response()
        }
        Err(err) => {
            let mut headers = HeaderMap::new();
            headers.insert(HEADER_CORRELATION_ID, correlation_id.as_str().parse().unwrap());
            let mut response = err.into_response();
            response.headers_mut().extend(headers);
            response
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_envelope_shape_matches_wire_contract() {
        let body = json!({"error": "policy_denied", "details": "out_of_scope"});
        assert!(body.get("error").is_some());
    }
}
