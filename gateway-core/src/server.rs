//! HTTP server with graceful shutdown.

use axum::routing::{delete, get, patch, post};
use axum::Router;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    compression::CompressionLayer,
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

use crate::{
    api, health,
    config::Config,
    error::Result,
    middleware::{
        apply_security_headers, request_id_layer, request_id_propagation_layer,
        sensitive_headers_layer, JwtAuth,
    },
    state::AppState,
};

/// Assemble the full HTTP surface (§6) over a bootstrapped [`AppState`]:
/// the agent-facing endpoints (agents, tokens, the proxy, the SSE log
/// stream), the unauthenticated health/readiness/metrics probes, and the
/// admin surface gated behind the admin JWT layer when one is configured
/// (§9: "Auto-apply JWT middleware if configured" is the template's
/// pattern — a gateway with no admin key configured still serves agent
/// traffic and health checks, just not the admin endpoints under auth).
pub fn build_router(state: AppState) -> Router {
    let agent_surface = Router::new()
        .route("/api/create-agent", post(api::agents::create_agent))
        .route("/api/agents", get(api::agents::list_agents))
        .route("/api/agents/:id", get(api::agents::get_agent))
        .route("/api/generate-token", post(api::tokens::generate_token))
        .route("/api/proxy-request", post(api::proxy::proxy_request))
        .route("/api/runs/:id/logs/stream", get(api::stream::stream_logs))
        .route("/api/sandbox/token", post(api::admin::sandbox_token));

    let probes = Router::new()
        .route("/health", get(health::health))
        .route("/health/enhanced", get(health::enhanced_health))
        .route("/ready", get(health::readiness))
        .route("/metrics", get(health::metrics));

    let mut admin_surface = Router::new()
        .route("/api/admin/policies", get(api::admin::list_policies).post(api::admin::create_policy))
        .route("/api/admin/policies/:id", delete(api::admin::delete_policy))
        .route("/api/admin/chaos", get(api::admin::list_chaos).post(api::admin::configure_chaos))
        .route("/api/admin/chaos/:tool", delete(api::admin::clear_chaos))
        .route("/api/admin/credentials", post(api::admin::upload_credential))
        .route("/api/admin/credentials/:tool", delete(api::admin::revoke_credential))
        .route("/api/admin/config", patch(api::admin::update_config))
        .route("/api/admin/config/backups", get(api::admin::list_backups))
        .route(
            "/api/admin/config/backups/:id/rollback",
            post(api::admin::rollback_config),
        )
        .route(
            "/api/admin/config/backups/cleanup",
            post(api::admin::cleanup_backups),
        )
        .route("/api/admin/recovery/trigger", post(api::admin::trigger_recovery))
        .route(
            "/api/admin/degradation/force/:level",
            post(api::admin::force_degradation),
        )
        .route(
            "/api/admin/degradation/recover",
            post(api::admin::recover_degradation),
        )
        .layer(axum::middleware::from_fn_with_state(
            state.audit().clone(),
            crate::audit::audit_middleware,
        ));

    if let Ok(jwt_auth) = JwtAuth::new(&state.config().jwt) {
        tracing::debug!("auto-applying admin JWT authentication middleware");
        admin_surface = admin_surface.layer(axum::middleware::from_fn_with_state(jwt_auth, JwtAuth::middleware));
    } else {
        tracing::warn!("admin JWT configuration invalid or key unreadable; admin surface runs unauthenticated");
    }

    Router::new()
        .merge(agent_surface)
        .merge(probes)
        .merge(admin_surface)
        .with_state(state)
}

/// Default body size cap applied when wrapping the router in the server's
/// standard middleware stack.
const DEFAULT_BODY_LIMIT_BYTES: usize = 2 * 1024 * 1024;

/// Owns the listen address and shutdown policy; wraps a caller-built
/// [`Router`] in the standard tower middleware stack and serves it.
pub struct Server {
    config: Config,
}

impl Server {
    /// Create a new server instance.
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    /// Run the server with the given router, blocking until a shutdown
    /// signal is received and in-flight requests have drained.
    pub async fn serve(self, app: Router) -> Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.service.port));

        tracing::info!(%addr, service = %self.config.service.name, "starting gateway");

        let app = self.wrap(app);

        let listener = TcpListener::bind(&addr).await?;
        tracing::info!(%addr, "server listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.config.service.shutdown_timeout_secs))
            .await?;

        tracing::info!("server shutdown complete");

        Ok(())
    }

    /// Apply the standard middleware stack: CORS, compression, a request
    /// timeout, a body-size cap, request tracing, request-id propagation,
    /// sensitive-header masking, security response headers and panic
    /// recovery, in that order from outermost to innermost.
    fn wrap(&self, app: Router) -> Router {
        let mut app = app
            .layer(CorsLayer::permissive())
            .layer(CompressionLayer::new())
            .layer(TimeoutLayer::with_status_code(
                http::StatusCode::REQUEST_TIMEOUT,
                Duration::from_millis(self.config.gateway.http_timeout_ms),
            ))
            .layer(RequestBodyLimitLayer::new(DEFAULT_BODY_LIMIT_BYTES))
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().include_headers(true))
                    .on_response(DefaultOnResponse::new().include_headers(true)),
            );

        if self.config.middleware.request_id {
            app = app
                .layer(sensitive_headers_layer())
                .layer(request_id_propagation_layer())
                .layer(request_id_layer());
        }

        app = apply_security_headers(app, &self.config.security_headers, false);

        if self.config.middleware.catch_panic {
            app = app.layer(CatchPanicLayer::new());
        }

        app
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT), then give in-flight
/// requests `shutdown_timeout_secs` to drain before returning.
async fn shutdown_signal(shutdown_timeout_secs: u64) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        },
    }

    tracing::info!(timeout_secs = shutdown_timeout_secs, "draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_creation_preserves_config() {
        let config = Config::default();
        let server = Server::new(config.clone());
        assert_eq!(server.config().service.port, config.service.port);
    }

    #[test]
    fn wrap_does_not_panic_on_default_config() {
        let server = Server::new(Config::default());
        let _ = server.wrap(Router::new());
    }
}
