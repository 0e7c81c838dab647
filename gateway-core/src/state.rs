//! Application state: every long-lived handle the HTTP layer, proxy
//! pipeline, and supervision tasks share, assembled once at process start.
//!
//! Unlike the template's generic `AppState<T>` (database/cache/events pools
//! behind feature flags), this gateway has a fixed, known set of
//! dependencies — there is no pluggable custom config type, so `AppState`
//! is concrete rather than generic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::adapters::chat::{LiveChatAdapter, MockChatAdapter};
use crate::adapters::http_fetch::{LiveHttpFetchAdapter, MockHttpFetchAdapter};
use crate::adapters::search::{LiveSearchAdapter, MockSearchAdapter};
use crate::adapters::send_mail::{LiveSendMailAdapter, MockSendMailAdapter};
use crate::adapters::{AdapterSet, UpstreamMode};
use crate::audit::{AuditAgent, AuditLogger};
use crate::chaos::ChaosInjector;
use crate::config::Config;
use crate::config_manager::{self, ConfigManager};
use crate::crypto::Kek;
use crate::error::{Error, Result};
use crate::metrics::MetricsRegistry;
use crate::proxy::{ProxyDeps, NON_ESSENTIAL_FEATURE};
use crate::ratelimit::{RateLimitConfig, RateLimiter};
use crate::registry::{InMemoryRegistry, Registry, Tool};
use crate::resilience::{BreakerConfig, CacheConfig, CircuitBreaker, GatewayHttpClient, HttpClientConfig, ResponseCache, RetryConfig};
use crate::sse::SseBroadcaster;
use crate::supervision::health_registry::HealthRegistry;
use crate::supervision::recovery::RecoveryController;
use crate::supervision::DegradationController;
use crate::token::TokenCodec;

const DEFAULT_CHAT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_SEARCH_ENDPOINT: &str = "https://serpapi.com/search";
const DEFAULT_SEND_MAIL_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";

/// Fallback hard allow-list for `http_fetch` (§4.7) when the operator hasn't
/// set `HTTP_FETCH_ALLOWED_DOMAINS` in the `.env`. This is separate from any
/// per-policy `allowed_domains` guard: it bounds what the adapter's shared
/// client can reach at all, regardless of what an agent's policy grants.
const DEFAULT_HTTP_FETCH_ALLOWED_DOMAINS: &[&str] = &["wikipedia.org", "github.com"];

fn parse_allowed_domains(env: &crate::registry::ConfigMap) -> Vec<String> {
    match env.get("HTTP_FETCH_ALLOWED_DOMAINS") {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => DEFAULT_HTTP_FETCH_ALLOWED_DOMAINS
            .iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

/// Everything a handler or background task might need, gathered once at
/// boot. Cloning an `AppState` is cheap — every field is an `Arc` or a
/// small `Copy`/owned value — so it is passed by value into axum's
/// `State` extractor the way the template passes its `AppState<T>`.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    registry: Arc<dyn Registry>,
    token_codec: Arc<TokenCodec>,
    kek: Arc<Kek>,
    chaos: Arc<ChaosInjector>,
    rate_limiter: Arc<RateLimiter>,
    cache: Arc<ResponseCache>,
    breakers: Arc<HashMap<Tool, Arc<CircuitBreaker>>>,
    adapters: Arc<std::sync::RwLock<Arc<AdapterSet>>>,
    audit: AuditLogger,
    degradation: Arc<DegradationController>,
    health_registry: Arc<HealthRegistry>,
    recovery: Arc<RecoveryController>,
    config_manager: Arc<ConfigManager>,
    metrics: Arc<MetricsRegistry>,
    shutting_down: Arc<AtomicBool>,
    cancellation: CancellationToken,
    retry_config: RetryConfig,
    upstream_mode: UpstreamMode,
    log_broadcaster: Arc<SseBroadcaster>,
}

impl AppState {
    /// Assemble every dependency from `config` plus the operator-managed
    /// `.env` file it points at (§4.10), and spawn the audit actor (§4.13)
    /// and supervision background tasks (§4.11). This is the single place
    /// process startup and integration tests both go through.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        let config_manager = ConfigManager::open(&config.env_path)?;
        config_manager.cleanup_stale_locks()?;
        let env = config_manager.read_config()?;
        config_manager::validate_required_keys(&env)
            .map_err(Error::ValidationError)?;

        let hmac_secret = required(&env, "TOKEN_HMAC_SECRET")?;
        let kek = Kek::from_base64(&required(&env, "KEK_BASE64")?)?;
        let upstream_mode = match env.get("UPSTREAM_MODE").map(String::as_str) {
            Some("live") => UpstreamMode::Live,
            _ => UpstreamMode::Mock,
        };

        let registry: Arc<dyn Registry> = InMemoryRegistry::new_shared(config.gateway.audit_retention);
        let token_codec = Arc::new(TokenCodec::new(
            hmac_secret.into_bytes(),
            config.gateway.rotation_horizon_secs,
        ));
        let kek = Arc::new(kek);

        let mut runtime = acton_reactive::prelude::ActonApp::launch();
        let (handle, buffer) = AuditAgent::spawn(
            &mut runtime,
            config.audit.clone(),
            config.service.name.clone(),
        )
        .await
        .map_err(|e| Error::Internal(format!("audit agent failed to start: {e}")))?;
        let audit = AuditLogger::new(handle, buffer, config.service.name.clone(), config.audit.clone());

        let http_client = GatewayHttpClient::new(HttpClientConfig {
            timeout: std::time::Duration::from_millis(config.gateway.http_timeout_ms),
            ..HttpClientConfig::default()
        });
        let http_fetch_client = GatewayHttpClient::new(HttpClientConfig {
            timeout: std::time::Duration::from_millis(config.gateway.http_timeout_ms),
            allowed_domain_suffixes: parse_allowed_domains(&env),
            ..HttpClientConfig::default()
        });

        let adapters = build_adapters(upstream_mode, &registry, kek.as_ref(), &http_client, &http_fetch_client, &env);

        let breakers: HashMap<Tool, Arc<CircuitBreaker>> = [Tool::Search, Tool::HttpFetch, Tool::Chat, Tool::SendMail]
            .into_iter()
            .map(|tool| (tool, Arc::new(CircuitBreaker::new(BreakerConfig::default()))))
            .collect();

        let rate_limiter = Arc::new(RateLimiter::new(RateLimitConfig {
            burst: config.gateway.rate_limit_burst,
            window: std::time::Duration::from_secs(config.gateway.rate_limit_window_secs),
        }));

        let degradation = Arc::new(DegradationController::new());
        degradation.declare_non_essential(NON_ESSENTIAL_FEATURE);
        let health_registry = Arc::new(HealthRegistry::new());
        let recovery = Arc::new(RecoveryController::new(Vec::new(), 1, audit.clone()));
        let cancellation = CancellationToken::new();
        health_registry.spawn_scheduler(cancellation.clone()).await;

        Ok(Self {
            config: Arc::new(config),
            registry,
            token_codec,
            kek,
            chaos: Arc::new(ChaosInjector::new()),
            rate_limiter,
            cache: Arc::new(ResponseCache::new(CacheConfig::default())),
            breakers: Arc::new(breakers),
            adapters: Arc::new(std::sync::RwLock::new(Arc::new(adapters))),
            audit,
            degradation,
            health_registry,
            recovery,
            config_manager: Arc::new(config_manager),
            metrics: MetricsRegistry::new_shared(),
            shutting_down: Arc::new(AtomicBool::new(false)),
            cancellation,
            retry_config: RetryConfig::default(),
            upstream_mode,
            log_broadcaster: Arc::new(SseBroadcaster::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &Arc<dyn Registry> {
        &self.registry
    }

    pub fn token_codec(&self) -> &Arc<TokenCodec> {
        &self.token_codec
    }

    pub fn kek(&self) -> &Arc<Kek> {
        &self.kek
    }

    pub fn chaos(&self) -> &Arc<ChaosInjector> {
        &self.chaos
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn degradation(&self) -> &Arc<DegradationController> {
        &self.degradation
    }

    pub fn health_registry(&self) -> &Arc<HealthRegistry> {
        &self.health_registry
    }

    pub fn recovery(&self) -> &Arc<RecoveryController> {
        &self.recovery
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn log_broadcaster(&self) -> &Arc<SseBroadcaster> {
        &self.log_broadcaster
    }

    pub fn upstream_mode(&self) -> UpstreamMode {
        self.upstream_mode
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Flip the shutdown gate and cancel every background task started at
    /// bootstrap (health scheduler, watchdog). Called once from the
    /// server's shutdown signal handler (§4.11: "the proxy pipeline stops
    /// admitting new work before in-flight requests are drained").
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.cancellation.cancel();
    }

    /// Re-derive the live [`AdapterSet`] from whatever credential is
    /// currently active in the registry. Called after an admin credential
    /// upload or revocation so the next proxy request picks up the change
    /// without a process restart.
    pub fn reload_adapters(&self) -> Result<()> {
        let env = self.config_manager.read_config()?;
        let http_client = GatewayHttpClient::new(HttpClientConfig {
            timeout: std::time::Duration::from_millis(self.config.gateway.http_timeout_ms),
            ..HttpClientConfig::default()
        });
        let http_fetch_client = GatewayHttpClient::new(HttpClientConfig {
            timeout: std::time::Duration::from_millis(self.config.gateway.http_timeout_ms),
            allowed_domain_suffixes: parse_allowed_domains(&env),
            ..HttpClientConfig::default()
        });
        let rebuilt = build_adapters(self.upstream_mode, &self.registry, &self.kek, &http_client, &http_fetch_client, &env);
        *self
            .adapters
            .write()
            .expect("adapter set lock poisoned")
            = Arc::new(rebuilt);
        Ok(())
    }

    /// Assemble a fresh [`ProxyDeps`] for one request. Breaker state and
    /// the response cache are shared Arcs underneath, so this is cheap —
    /// only the adapter-set snapshot and a handful of Arc clones are taken.
    pub fn proxy_deps(&self) -> ProxyDeps {
        ProxyDeps {
            registry: self.registry.clone(),
            token_codec: self.token_codec.clone(),
            adapters: self.adapters.read().expect("adapter set lock poisoned").clone(),
            breakers: (*self.breakers).clone(),
            chaos: self.chaos.clone(),
            rate_limiter: self.rate_limiter.clone(),
            cache: self.cache.clone(),
            audit: self.audit.clone(),
            degradation: self.degradation.clone(),
            shutting_down: self.shutting_down.clone(),
            retry_config: self.retry_config,
            default_timezone: self.config.gateway.default_timezone.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

fn required<'a>(env: &'a crate::registry::ConfigMap, key: &str) -> Result<String> {
    env.get(key)
        .cloned()
        .ok_or_else(|| Error::ValidationError(format!("missing required key: {key}")))
}

fn build_adapters(
    mode: UpstreamMode,
    registry: &Arc<dyn Registry>,
    kek: &Kek,
    http_client: &GatewayHttpClient,
    http_fetch_client: &GatewayHttpClient,
    env: &crate::registry::ConfigMap,
) -> AdapterSet {
    match mode {
        UpstreamMode::Mock => AdapterSet {
            search: Arc::new(MockSearchAdapter),
            http_fetch: Arc::new(MockHttpFetchAdapter),
            chat: Arc::new(MockChatAdapter),
            send_mail: Arc::new(MockSendMailAdapter),
        },
        UpstreamMode::Live => AdapterSet {
            search: Arc::new(LiveSearchAdapter::new(
                active_credential_secret(registry, kek, Tool::Search),
                http_client.clone(),
                env.get("SEARCH_API_ENDPOINT").cloned().unwrap_or_else(|| DEFAULT_SEARCH_ENDPOINT.to_string()),
            )),
            http_fetch: Arc::new(LiveHttpFetchAdapter::new(http_fetch_client.clone())),
            chat: Arc::new(LiveChatAdapter::new(
                active_credential_secret(registry, kek, Tool::Chat),
                http_client.clone(),
                env.get("CHAT_API_ENDPOINT").cloned().unwrap_or_else(|| DEFAULT_CHAT_ENDPOINT.to_string()),
            )),
            send_mail: Arc::new(LiveSendMailAdapter::new(
                active_credential_secret(registry, kek, Tool::SendMail),
                http_client.clone(),
                env.get("SEND_MAIL_API_ENDPOINT").cloned().unwrap_or_else(|| DEFAULT_SEND_MAIL_ENDPOINT.to_string()),
            )),
        },
    }
}

fn active_credential_secret(registry: &Arc<dyn Registry>, kek: &Kek, tool: Tool) -> Option<String> {
    let credential = registry.active_credential(tool)?;
    if !credential.is_active() {
        return None;
    }
    let plaintext = crate::crypto::unseal(&credential.encrypted_credential, kek).ok()?;
    String::from_utf8(plaintext).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(dir: &std::path::Path) -> Config {
        let mut config = Config::default();
        config.env_path = dir.join("config/.env");
        config
    }

    async fn seeded_manager(dir: &std::path::Path) {
        let manager = ConfigManager::open(dir.join("config/.env")).unwrap();
        let mut changes = HashMap::new();
        changes.insert("PORT".to_string(), "8080".to_string());
        changes.insert("DATABASE_URL".to_string(), "postgres://localhost/gateway".to_string());
        changes.insert("REDIS_URL".to_string(), "redis://localhost".to_string());
        changes.insert("TOKEN_HMAC_SECRET".to_string(), "test-secret".to_string());
        changes.insert("SECRETS_BACKEND".to_string(), "env".to_string());
        changes.insert("HTTP_TIMEOUT_MS".to_string(), "6000".to_string());
        changes.insert("DEFAULT_TIMEZONE".to_string(), "UTC".to_string());
        changes.insert("KEK_BASE64".to_string(), Kek::generate().to_base64());
        changes.insert("UPSTREAM_MODE".to_string(), "mock".to_string());
        manager.update_config(changes, "test seed", |_| Ok(())).unwrap();
    }

    #[tokio::test]
    async fn bootstrap_succeeds_with_a_seeded_env_file() {
        let dir = tempfile::tempdir().unwrap();
        seeded_manager(dir.path()).await;
        let state = AppState::bootstrap(test_config(dir.path())).await.unwrap();
        assert_eq!(state.upstream_mode(), UpstreamMode::Mock);
        assert!(!state.is_shutting_down());
    }

    #[tokio::test]
    async fn bootstrap_fails_without_required_keys() {
        let dir = tempfile::tempdir().unwrap();
        ConfigManager::open(dir.path().join("config/.env")).unwrap();
        let err = AppState::bootstrap(test_config(dir.path())).await.unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }

    #[tokio::test]
    async fn begin_shutdown_sets_the_gate() {
        let dir = tempfile::tempdir().unwrap();
        seeded_manager(dir.path()).await;
        let state = AppState::bootstrap(test_config(dir.path())).await.unwrap();
        state.begin_shutdown();
        assert!(state.is_shutting_down());
    }

    #[tokio::test]
    async fn proxy_deps_shares_the_same_breaker_instances_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        seeded_manager(dir.path()).await;
        let state = AppState::bootstrap(test_config(dir.path())).await.unwrap();
        let first = state.proxy_deps();
        let second = state.proxy_deps();
        assert!(Arc::ptr_eq(
            first.breakers.get(&Tool::Search).unwrap(),
            second.breakers.get(&Tool::Search).unwrap()
        ));
    }
}
