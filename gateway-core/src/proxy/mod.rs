//! Proxy pipeline orchestration (§4.9): rate limiting → auth → policy →
//! circuit breaker → retry → tool adapter → response filter → audit log.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::adapters::{call_with_chaos, AdapterError, AdapterSet};
use crate::audit::{AuditEventKind, AuditLogger, AuditSeverity, AuditSource};
use crate::chaos::ChaosInjector;
use crate::error::{Error, Result};
use crate::ids::CorrelationId;
use crate::metrics::MetricsRegistry;
use crate::policy::{self, Decision};
use crate::ratelimit::RateLimiter;
use crate::registry::{AgentStatus, Registry, Tool};
use crate::resilience::{
    fingerprint, is_breaker_countable, is_cache_bypassed, retry_with_backoff, Admission,
    BreakerConfig, CacheConfig, CircuitBreaker, ResponseCache, Retryable, RetryConfig,
};
use crate::supervision::degradation::DegradationController;
use crate::token::TokenCodec;

/// Inbound shape of `POST /api/proxy-request` (§4.9 step 3, §6).
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyRequest {
    pub agent_token: String,
    pub token_id: Option<Uuid>,
    pub proof_payload: Option<String>,
    pub tool: String,
    pub action: String,
    pub params: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxyMetadata {
    pub agent_id: Uuid,
    pub tool: String,
    pub action: String,
    pub response_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProxySuccess {
    pub success: bool,
    pub data: Value,
    pub metadata: ProxyMetadata,
}

/// Headers the HTTP layer attaches to the response regardless of outcome
/// (§6 wire-level conventions).
#[derive(Debug, Clone, Default)]
pub struct ProxyResponseHeaders {
    pub correlation_id: CorrelationId,
    pub rotation_recommended: bool,
    pub token_expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Everything the pipeline needs, gathered in one place so the HTTP handler
/// stays a thin translation layer (§9: "pass handles through the request
/// context rather than referencing globals").
pub struct ProxyDeps {
    pub registry: Arc<dyn Registry>,
    pub token_codec: Arc<TokenCodec>,
    pub adapters: Arc<AdapterSet>,
    pub breakers: HashMap<Tool, Arc<CircuitBreaker>>,
    pub chaos: Arc<ChaosInjector>,
    pub rate_limiter: Arc<RateLimiter>,
    pub cache: Arc<ResponseCache>,
    pub audit: AuditLogger,
    pub degradation: Arc<DegradationController>,
    pub shutting_down: Arc<AtomicBool>,
    pub retry_config: RetryConfig,
    pub default_timezone: String,
    pub metrics: Arc<MetricsRegistry>,
}

/// Feature name the proxy pipeline registers with the degradation
/// controller at bootstrap (§4.11 level ≥ 2 non-essential shedding).
pub const NON_ESSENTIAL_FEATURE: &str = "proxy:non_essential";

fn breaker_config_defaults() -> HashMap<Tool, Arc<CircuitBreaker>> {
    [Tool::Search, Tool::HttpFetch, Tool::Chat, Tool::SendMail]
        .into_iter()
        .map(|tool| (tool, Arc::new(CircuitBreaker::new(BreakerConfig::default()))))
        .collect()
}

impl ProxyDeps {
    pub fn new(
        registry: Arc<dyn Registry>,
        token_codec: Arc<TokenCodec>,
        adapters: Arc<AdapterSet>,
        chaos: Arc<ChaosInjector>,
        rate_limiter: Arc<RateLimiter>,
        audit: AuditLogger,
        degradation: Arc<DegradationController>,
        shutting_down: Arc<AtomicBool>,
        default_timezone: String,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        Self {
            registry,
            token_codec,
            adapters,
            breakers: breaker_config_defaults(),
            chaos,
            rate_limiter,
            cache: Arc::new(ResponseCache::new(CacheConfig::default())),
            audit,
            degradation,
            shutting_down,
            retry_config: RetryConfig::default(),
            default_timezone,
            metrics,
        }
    }
}

/// Runs the full pipeline in §4.9 order. Any step may short-circuit with an
/// `Err` that the HTTP layer maps to a status code via `Error::into_response`.
pub async fn handle_proxy_request(
    deps: &ProxyDeps,
    correlation_id: CorrelationId,
    request: ProxyRequest,
) -> Result<(ProxySuccess, ProxyResponseHeaders)> {
    let start = Instant::now();
    let mut headers = ProxyResponseHeaders {
        correlation_id: correlation_id.clone(),
        ..Default::default()
    };

    // 1. Shutdown gate.
    if deps.shutting_down.load(Ordering::Acquire) {
        return Err(Error::ShuttingDown);
    }

    // §5 level 3: shed all non-health traffic.
    if deps.degradation.health_only() {
        return Err(fail(deps, &request, start, Error::Degraded("health_only".into())));
    }

    // 3. Schema check.
    if request.tool.trim().is_empty() || request.action.trim().is_empty() {
        return Err(fail(
            deps,
            &request,
            start,
            Error::BadRequest("tool and action are required".into()),
        ));
    }
    let tool = match Tool::parse(&request.tool) {
        Some(tool) => tool,
        None => {
            return Err(fail(
                deps,
                &request,
                start,
                Error::BadRequest(format!("unknown tool '{}'", request.tool)),
            ))
        }
    };

    // 4. Provenance.
    if let Some(token_id) = request.token_id {
        let entry = match deps.registry.get_token_entry(token_id) {
            Some(entry) => entry,
            None => return Err(fail(deps, &request, start, Error::TokenInvalid("unknown token_id".into()))),
        };
        if entry.is_revoked {
            return Err(fail(deps, &request, start, Error::TokenInvalid("token has been revoked".into())));
        }
        if let Some(proof) = &request.proof_payload {
            let mut hasher = Sha256::new();
            hasher.update(proof.as_bytes());
            let computed = format!("{:x}", hasher.finalize());
            if computed != entry.payload_hash {
                return Err(fail(
                    deps,
                    &request,
                    start,
                    Error::TokenInvalid("proof payload does not match registry".into()),
                ));
            }
        }
    }

    // 5-7. Signature, decode, expiry.
    let payload = match deps.token_codec.validate(&request.agent_token) {
        Ok(payload) => payload,
        Err(failure) => {
            return Err(fail(
                deps,
                &request,
                start,
                Error::TokenInvalid(failure.reason().to_string()),
            ))
        }
    };
    if deps.token_codec.is_expiring_soon(&payload) {
        headers.rotation_recommended = true;
        headers.token_expires_at = Some(payload.expires_at);
    }

    // 8. Agent lookup.
    let agent = match deps.registry.get_agent(payload.agent_id) {
        Some(agent) => agent,
        None => {
            return Err(fail(
                deps,
                &request,
                start,
                Error::TokenInvalid("agent no longer exists".into()),
            ))
        }
    };
    if agent.status != AgentStatus::Active {
        return Err(fail(deps, &request, start, Error::TokenInvalid("agent is disabled".into())));
    }
    if !payload.has_scope(&request.tool, &request.action) {
        return Err(fail(deps, &request, start, Error::PolicyDenied("out_of_scope".into())));
    }

    // 9. Policy merge + evaluate.
    let specs = policy::resolve(&deps.registry, agent.id, &agent.role);
    let merged = policy::merge(specs);
    let target_host = request
        .params
        .get("url")
        .and_then(|v| v.as_str())
        .and_then(|u| reqwest::Url::parse(u).ok())
        .and_then(|u| u.host_str().map(str::to_string));
    let decision = policy::evaluate(
        &deps.registry,
        &merged,
        agent.id,
        &request.tool,
        &request.action,
        &request.params,
        target_host.as_deref(),
        chrono::Utc::now(),
        &deps.default_timezone,
    );
    let (response_filters, _quota_info, quota_commits) = match decision {
        Decision::Allow {
            response_filters,
            quota_info,
            quota_commits,
        } => (response_filters, quota_info, quota_commits),
        Decision::Deny { reason, detail } => {
            deps.audit
                .log_with_source(
                    AuditEventKind::PolicyDenied,
                    AuditSeverity::Notice,
                    AuditSource {
                        agent_id: Some(agent.id.to_string()),
                        tool: Some(request.tool.clone()),
                        correlation_id: Some(correlation_id.to_string()),
                        ..Default::default()
                    },
                )
                .await;
            return Err(fail(
                deps,
                &request,
                start,
                Error::PolicyDenied(format!("{}: {}", reason.as_str(), detail)),
            ));
        }
    };

    // 11. Configuration check.
    let adapter = deps.adapters.get(tool);
    if !adapter.is_configured() {
        policy::release_quotas(&deps.registry, &quota_commits);
        return Err(fail(
            deps,
            &request,
            start,
            Error::Degraded(format!("tool '{}' is not configured", tool.as_str())),
        ));
    }

    // Degradation: non-essential features disabled at level >= 2 (§4.9).
    if !deps.degradation.is_essential(NON_ESSENTIAL_FEATURE) && deps.degradation.level() >= 2 {
        policy::release_quotas(&deps.registry, &quota_commits);
        return Err(fail(
            deps,
            &request,
            start,
            Error::Degraded("non-essential request path".into()),
        ));
    }

    // 12. Rate limit.
    if let Err(exceeded) = deps.rate_limiter.try_acquire(agent.id) {
        policy::release_quotas(&deps.registry, &quota_commits);
        return Err(fail(
            deps,
            &request,
            start,
            Error::QuotaExceeded(format!("rate_limited: retry after {}s", exceeded.retry_after_secs)),
        ));
    }

    // 14. Execute: cache (§4.6) wraps breaker(retry(adapter)); chaos (§4.8) is
    // rolled inside the adapter call itself so a cache hit never rolls it.
    // Level >= 1 additionally bypasses the cache for every tool (§5).
    let breaker = deps.breakers.get(&tool).expect("breaker exists for every fixed tool");
    let bypassed = is_cache_bypassed(&request.tool, &request.action) || deps.degradation.caches_disabled();
    let fp = fingerprint(&request.tool, &request.action, &request.params, &payload.scopes);
    let metrics = deps.metrics.clone();
    let metrics_tool = request.tool.clone();
    let metrics_action = request.action.clone();

    let run_adapter = || {
        let breaker = breaker.clone();
        let chaos = deps.chaos.clone();
        let adapter_for_call = adapter.clone();
        let retry_config = deps.retry_config;
        let action = request.action.clone();
        let params = request.params.clone();
        let metrics = metrics.clone();
        let metrics_tool = metrics_tool.clone();
        let metrics_action = metrics_action.clone();
        async move {
            let admission = breaker.admit();
            if matches!(admission, Admission::Rejected) {
                return Err(Error::BreakerOpen(adapter_for_call.tool().as_str().to_string()));
            }
            let retry_result = retry_with_backoff(
                retry_config,
                || {
                    let adapter = adapter_for_call.clone();
                    let chaos = chaos.clone();
                    let action = action.clone();
                    let params = params.clone();
                    async move { call_with_chaos(adapter.as_ref(), &action, &params, &chaos).await }
                },
                classify_adapter_error,
                |attempt| metrics.record_retry(&metrics_tool, &metrics_action, attempt),
            )
            .await;
            match &retry_result {
                Ok(_) => breaker.record_success(),
                Err(err) if is_breaker_countable(&adapter_error_to_gateway(err)) => {
                    breaker.record_failure()
                }
                Err(_) => {}
            }
            retry_result.map_err(|e| adapter_error_to_gateway(&e))
        }
    };

    let execution = if bypassed {
        run_adapter().await
    } else {
        deps.cache.get_or_build(&fp, run_adapter).await
    };

    let data = match execution {
        Ok(value) => value,
        Err(gateway_err) => {
            policy::release_quotas(&deps.registry, &quota_commits);
            record_request_log(
                deps,
                &correlation_id,
                &agent,
                &request,
                start,
                false,
                Some(gateway_err.to_string()),
            )
            .await;
            return Err(fail(deps, &request, start, gateway_err));
        }
    };

    // 15. Response filter.
    let filtered = crate::policy::apply_response_filters(data, &response_filters);

    // 16. Audit.
    record_request_log(deps, &correlation_id, &agent, &request, start, true, None).await;
    deps.audit
        .log_with_source(
            AuditEventKind::ToolCallCompleted,
            AuditSeverity::Informational,
            AuditSource {
                agent_id: Some(agent.id.to_string()),
                tool: Some(request.tool.clone()),
                correlation_id: Some(correlation_id.to_string()),
                ..Default::default()
            },
        )
        .await;

    let elapsed_ms = start.elapsed().as_millis() as u64;
    deps.metrics.record_outcome(&request.tool, &request.action, "success", elapsed_ms);
    Ok((
        ProxySuccess {
            success: true,
            data: filtered,
            metadata: ProxyMetadata {
                agent_id: agent.id,
                tool: request.tool,
                action: request.action,
                response_time_ms: elapsed_ms,
            },
        },
        headers,
    ))
}

/// Records a `{tool, action, outcome}` counter increment and a latency
/// observation for `err`, then returns it unchanged so callers can
/// `return Err(fail(...))` at every pipeline exit (§2, §4.9).
fn fail(deps: &ProxyDeps, request: &ProxyRequest, start: Instant, err: Error) -> Error {
    let outcome = outcome_for_error(&err);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    deps.metrics.record_outcome(&request.tool, &request.action, outcome, elapsed_ms);
    err
}

/// Maps an [`Error`] to a bounded-cardinality outcome label. Message
/// payloads that themselves carry a small fixed vocabulary (policy deny
/// reasons, token validation failures, rate-limit vs. quota) are split out
/// so `/metrics` doesn't bucket everything under one generic label.
fn outcome_for_error(err: &Error) -> String {
    match err {
        Error::ShuttingDown => "shutting_down".to_string(),
        Error::BadRequest(_) => "bad_request".to_string(),
        Error::ValidationError(_) => "validation_error".to_string(),
        Error::TokenInvalid(reason) => match reason.as_str() {
            "malformed" | "bad_signature" | "expired" => reason.clone(),
            _ => "token_invalid".to_string(),
        },
        Error::TokenExpired => "expired".to_string(),
        Error::PolicyDenied(detail) => detail
            .split(':')
            .next()
            .unwrap_or("policy_denied")
            .to_string(),
        Error::QuotaExceeded(detail) => {
            if detail.starts_with("rate_limited") {
                "rate_limited".to_string()
            } else {
                "quota_exceeded".to_string()
            }
        }
        Error::BreakerOpen(_) => "breaker_open".to_string(),
        Error::Degraded(_) => "degraded".to_string(),
        Error::ToolFailed(message) => {
            if message.contains("chaos_timeout") || message.contains("chaos_500") {
                "chaos_injected".to_string()
            } else {
                "tool_failed".to_string()
            }
        }
        _ => "internal_error".to_string(),
    }
}

async fn record_request_log(
    deps: &ProxyDeps,
    correlation_id: &CorrelationId,
    agent: &crate::registry::Agent,
    request: &ProxyRequest,
    start: Instant,
    success: bool,
    error_message: Option<String>,
) {
    let _ = deps.registry.append_request_log(crate::registry::RequestLog {
        corr_id: correlation_id.to_string(),
        agent_id: agent.id,
        tool: request.tool.clone(),
        action: request.action.clone(),
        response_time_ms: start.elapsed().as_millis() as u64,
        status_code: if success { 200 } else { 502 },
        success,
        error_message,
        created_at: chrono::Utc::now(),
    });
}

/// §4.4: network I/O, 5xx, and explicit `retryable: true` are retryable;
/// 429 is retryable honouring `retry_after`.
fn classify_adapter_error(err: &AdapterError) -> Retryable {
    if err.retryable {
        Retryable::Yes {
            retry_after: err.retry_after,
        }
    } else {
        Retryable::No
    }
}

fn adapter_error_to_gateway(err: &AdapterError) -> Error {
    match err.status {
        Some(400) | Some(422) => Error::ValidationError(err.message.clone()),
        Some(503) => Error::Degraded(err.message.clone()),
        _ => Error::ToolFailed(err.message.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_adapter_error_classified_as_retryable() {
        let err = AdapterError::upstream(500, "boom");
        assert!(matches!(classify_adapter_error(&err), Retryable::Yes { .. }));
    }

    #[test]
    fn validation_adapter_error_is_not_retryable() {
        let err = AdapterError::validation("bad params");
        assert!(matches!(classify_adapter_error(&err), Retryable::No));
    }

    #[test]
    fn tool_failed_maps_to_internal_tool_failed_error() {
        let err = AdapterError::upstream(500, "boom");
        assert!(matches!(adapter_error_to_gateway(&err), Error::ToolFailed(_)));
    }
}
