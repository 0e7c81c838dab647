//! Audit middleware for admin HTTP request logging
//!
//! Provides an axum middleware function that captures admin HTTP
//! request/response details as audit events. Supports per-route annotation
//! and route exclusion.

use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use std::time::Instant;

use super::event::{AuditEventKind, AuditSeverity, AuditSource};
use super::logger::AuditLogger;
use crate::audit::event::AuditEvent;

/// Per-route audit annotation
///
/// Apply to specific routes to override the default event kind.
///
/// # Example
///
/// ```rust,ignore
/// Router::new()
///     .route("/admin/agents/:id", delete(handler))
///     .layer(Extension(AuditRoute::new("agent.delete")))
/// ```
#[derive(Clone, Debug)]
pub struct AuditRoute {
    /// Custom event name for this route
    pub name: String,
}

impl AuditRoute {
    /// Create a new audit route annotation
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Create an audit route annotation layer for use with specific routes
///
/// This adds an `AuditRoute` extension to matching requests, which the
/// global audit middleware picks up to emit a custom-named audit event.
pub fn audit_layer(name: &str) -> axum::Extension<AuditRoute> {
    axum::Extension(AuditRoute::new(name))
}

/// Audit middleware function for the admin HTTP surface
///
/// 1. If the route has an `AuditRoute` extension, always audit with that name
/// 2. If `audit_all_admin_requests` is true, audit everything not excluded
/// 3. Otherwise, only mutating methods (POST/PUT/PATCH/DELETE) are audited
pub async fn audit_middleware(
    State(logger): State<AuditLogger>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();

    let audit_route = request.extensions().get::<AuditRoute>().cloned();

    let should_audit = if audit_route.is_some() {
        true
    } else {
        let config = logger.config();
        if config.excluded_routes.iter().any(|p| path_matches(&path, p)) {
            false
        } else if config.audit_all_admin_requests {
            true
        } else {
            matches!(method.as_str(), "POST" | "PUT" | "PATCH" | "DELETE")
        }
    };

    if !should_audit {
        return next.run(request).await;
    }

    let source = AuditSource {
        agent_id: None,
        tool: None,
        subject: request
            .extensions()
            .get::<crate::middleware::Claims>()
            .map(|c| c.sub.clone()),
        request_id: request
            .headers()
            .get("x-request-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
        correlation_id: request
            .headers()
            .get("x-correlation-id")
            .and_then(|v| v.to_str().ok())
            .map(String::from),
    };

    let start = Instant::now();
    let response = next.run(request).await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let status_code = response.status().as_u16();

    let kind = if let Some(ref route) = audit_route {
        AuditEventKind::Custom(route.name.clone())
    } else if status_code == 401 || status_code == 403 {
        AuditEventKind::AdminRequestDenied
    } else {
        AuditEventKind::AdminRequest
    };

    let severity = if status_code >= 500 {
        AuditSeverity::Error
    } else if status_code >= 400 {
        AuditSeverity::Warning
    } else {
        AuditSeverity::Informational
    };

    let event = AuditEvent::new(kind, severity, logger.service_name().to_string())
        .with_source(source)
        .with_http(method, path, Some(status_code), Some(duration_ms));

    logger.log(event).await;

    response
}

/// Check if a path matches a simple glob pattern (exact, trailing `/*`, `/**`)
pub fn path_matches(path: &str, pattern: &str) -> bool {
    if path == pattern {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return path.starts_with(prefix) && path.len() > prefix.len();
    }
    if let Some(prefix) = pattern.strip_suffix("/**") {
        return path.starts_with(prefix);
    }
    if pattern.contains('*') {
        let parts: Vec<&str> = pattern.split('*').collect();
        if parts.len() == 2 {
            return path.starts_with(parts[0]) && path.ends_with(parts[1]);
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_matches_exact() {
        assert!(path_matches("/health", "/health"));
        assert!(!path_matches("/health", "/ready"));
    }

    #[test]
    fn test_path_matches_trailing_wildcard() {
        assert!(path_matches("/admin/agents/123", "/admin/agents/*"));
        assert!(!path_matches("/admin/agents", "/admin/agents/*"));
    }

    #[test]
    fn test_path_matches_double_wildcard() {
        assert!(path_matches("/admin/agents/123/tokens", "/admin/**"));
        assert!(path_matches("/admin", "/admin/**"));
    }
}
