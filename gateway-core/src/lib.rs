//! # gateway-core
//!
//! Agent-aware API gateway core: issues scoped capability tokens to
//! autonomous agents, enforces a per-agent/per-role policy (scopes, guards,
//! quotas, schedules, response filters) in front of a small fixed set of
//! tool adapters (search, http_fetch, chat, send_mail), and wraps every
//! outbound call in circuit breaking, retry-with-backoff, response caching,
//! chaos injection and hash-chained audit logging.
//!
//! ## Example
//!
//! ```rust,no_run
//! use gateway_core::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = Config::load()?;
//!     init_tracing(&config)?;
//!
//!     let state = AppState::bootstrap(config).await?;
//!     let app = gateway_core::server::build_router(state.clone());
//!
//!     Server::new(state.config().clone()).serve(app).await?;
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod api;
pub mod audit;
pub mod chaos;
pub mod config;
pub mod config_manager;
pub mod crypto;
pub mod error;
pub mod health;
pub mod ids;
pub mod metrics;
pub mod middleware;
pub mod observability;
pub mod policy;
pub mod proxy;
pub mod ratelimit;
pub mod registry;
pub mod resilience;
pub mod responses;
pub mod server;
pub mod sse;
pub mod state;
pub mod supervision;
pub mod token;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{
        Config, GatewaySettings, JwtConfig, MiddlewareConfig, SecurityHeadersConfig, ServiceConfig,
    };
    pub use crate::error::{Error, Result};
    pub use crate::ids::{CorrelationId, MakeTypedRequestId, RequestId, RequestIdError};
    pub use crate::middleware::{
        Claims, JwtAuth, RequestTrackingConfig, PROPAGATE_HEADERS, SENSITIVE_HEADERS,
        request_id_layer, request_id_propagation_layer, sensitive_headers_layer,
    };
    pub use crate::observability::init_tracing;
    pub use crate::responses::{
        Accepted, Conflict, Created, FieldError, NoContent, Success, ValidationError,
    };
    pub use crate::server::Server;
    pub use crate::state::AppState;

    pub use crate::adapters::{AdapterError, AdapterSet, ToolAdapter, UpstreamMode};
    pub use crate::audit::{AuditEvent, AuditEventKind, AuditLogger, AuditSeverity};
    pub use crate::chaos::{ChaosInjector, ChaosMode, ChaosSetting};
    pub use crate::crypto::{seal, unseal, Kek, SealedEnvelope};
    pub use crate::policy::Decision;
    pub use crate::proxy::{ProxyDeps, ProxyRequest, ProxySuccess};
    pub use crate::ratelimit::RateLimiter;
    pub use crate::registry::{Agent, AgentStatus, InMemoryRegistry, Registry, Tool};
    pub use crate::supervision::{
        DegradationController, HealthRegistry, RecoveryController, Watchdog,
    };
    pub use crate::token::{IssueParams, SignedToken, TokenCodec, TokenPayload};

    pub use axum::{
        extract::{Path, Query, State},
        http::{HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Json, Response},
        routing::{delete, get, patch, post, put},
        Extension, Router,
    };

    pub use serde::{Deserialize, Serialize};

    pub use tracing::{debug, error, info, instrument, trace, warn, Level, Span};

    pub use tokio;

    pub use async_trait::async_trait;

    pub use thiserror::Error;
    pub use anyhow::{self, Context as AnyhowContext};

    pub use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};

    pub use uuid::Uuid;

    pub use futures::{future, stream, Future, Stream, StreamExt, TryFutureExt, TryStreamExt};

    pub use http::{Method, Uri};

    pub use acton_reactive::prelude::*;
}
