//! Error types and HTTP response conversion
//!
//! One `thiserror`-derived enum for the whole crate, matching the error
//! taxonomy in the gateway spec: each variant maps to a stable HTTP status
//! and a machine-readable `code` in the JSON body. Large inner error types
//! are boxed so the enum itself stays small.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias using the crate's error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the gateway core
#[derive(Debug, Error)]
pub enum Error {
    /// Ambient typed configuration failed to load (figment)
    #[error("Configuration error: {0}")]
    Config(Box<figment::Error>),

    /// The `.env`-style configuration manager hit an I/O or lock problem
    #[error("Configuration manager error: {0}")]
    ConfigManager(String),

    /// HTTP error constructing a response
    #[error("HTTP error: {0}")]
    Http(Box<axum::http::Error>),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Admin JWT bearer missing, malformed, or signature invalid
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Agent capability token missing, malformed, expired, or signature invalid
    #[error("Invalid token: {0}")]
    TokenInvalid(String),

    /// Agent capability token was well-formed but has expired
    #[error("Token expired")]
    TokenExpired,

    /// Policy evaluation denied the request (tool not assigned, domain not
    /// allow-listed, schedule window closed, etc.)
    #[error("Policy denied: {0}")]
    PolicyDenied(String),

    /// Quota counter exhausted for the current window
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Circuit breaker for the requested tool is open
    #[error("Circuit open for tool: {0}")]
    BreakerOpen(String),

    /// The gateway is mid-shutdown and is no longer admitting new requests
    #[error("Shutting down")]
    ShuttingDown,

    /// Degradation controller has disabled this feature
    #[error("Feature degraded: {0}")]
    Degraded(String),

    /// Requested entity does not exist in the registry
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed request body or parameters
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Resource already exists / conflicting state transition
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Request body failed schema/semantic validation
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A tool adapter call failed (upstream error, timeout, or chaos injection)
    #[error("Tool call failed: {0}")]
    ToolFailed(String),

    /// AEAD seal/unseal of a credential envelope failed
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Unexpected internal error — never exposes detail to the client
    #[error("Internal server error: {0}")]
    Internal(String),

    /// Generic catch-all
    #[error("{0}")]
    Other(String),
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub error: String,

    /// Machine-readable error code
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// HTTP status code (duplicated in the body for clients that don't
    /// inspect the status line)
    pub status: u16,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: None,
            status: status.as_u16(),
        }
    }

    pub fn with_code(status: StatusCode, code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
            status: status.as_u16(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::Config(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_ERROR", e.to_string()),
            ),
            Error::ConfigManager(msg) => {
                tracing::error!("config manager error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_MANAGER_ERROR", "Configuration store operation failed"),
                )
            }
            Error::Http(e) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "HTTP_ERROR", e.to_string()),
            ),
            Error::Io(e) => {
                tracing::error!("I/O error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "IO_ERROR", "I/O operation failed"),
                )
            }
            Error::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg),
            ),
            Error::TokenInvalid(msg) => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "TOKEN_INVALID", msg),
            ),
            Error::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                ErrorResponse::with_code(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", "Token expired"),
            ),
            Error::PolicyDenied(msg) => (
                StatusCode::FORBIDDEN,
                ErrorResponse::with_code(StatusCode::FORBIDDEN, "POLICY_DENIED", msg),
            ),
            Error::QuotaExceeded(msg) => (
                StatusCode::TOO_MANY_REQUESTS,
                ErrorResponse::with_code(StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED", msg),
            ),
            Error::BreakerOpen(tool) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_code(StatusCode::SERVICE_UNAVAILABLE, "BREAKER_OPEN", format!("Circuit open for tool: {tool}")),
            ),
            Error::ShuttingDown => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_code(StatusCode::SERVICE_UNAVAILABLE, "SHUTTING_DOWN", "Server is shutting down"),
            ),
            Error::Degraded(feature) => (
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorResponse::with_code(StatusCode::SERVICE_UNAVAILABLE, "FEATURE_DEGRADED", format!("Feature unavailable: {feature}")),
            ),
            Error::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                ErrorResponse::with_code(StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ),
            Error::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse::with_code(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ),
            Error::Conflict(msg) => (
                StatusCode::CONFLICT,
                ErrorResponse::with_code(StatusCode::CONFLICT, "CONFLICT", msg),
            ),
            Error::ValidationError(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                ErrorResponse::with_code(StatusCode::UNPROCESSABLE_ENTITY, "VALIDATION_ERROR", msg),
            ),
            Error::ToolFailed(msg) => {
                tracing::warn!("tool call failed: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorResponse::with_code(StatusCode::BAD_GATEWAY, "TOOL_FAILED", msg),
                )
            }
            Error::Crypto(msg) => {
                tracing::error!("crypto error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "CRYPTO_ERROR", "Credential operation failed"),
                )
            }
            Error::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::with_code(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "Internal server error"),
                )
            }
            Error::Other(msg) => {
                tracing::error!("unexpected error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorResponse::new(StatusCode::INTERNAL_SERVER_ERROR, "An unexpected error occurred"),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Error::Config(Box::new(err))
    }
}

impl From<axum::http::Error> for Error {
    fn from(err: axum::http::Error) -> Self {
        Error::Http(Box::new(err))
    }
}

impl From<jsonwebtoken::errors::Error> for Error {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        Error::Unauthorized(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response() {
        let err = ErrorResponse::new(StatusCode::NOT_FOUND, "Agent not found");
        assert_eq!(err.status, 404);
        assert_eq!(err.error, "Agent not found");
        assert!(err.code.is_none());
    }

    #[test]
    fn test_error_response_with_code() {
        let err = ErrorResponse::with_code(StatusCode::TOO_MANY_REQUESTS, "QUOTA_EXCEEDED", "daily quota exhausted");
        assert_eq!(err.status, 429);
        assert_eq!(err.code, Some("QUOTA_EXCEEDED".to_string()));
    }

    #[tokio::test]
    async fn test_breaker_open_maps_to_503() {
        let resp = Error::BreakerOpen("search".into()).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_policy_denied_maps_to_403() {
        let resp = Error::PolicyDenied("tool not assigned".into()).into_response();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
