//! Audit event types
//!
//! Core types for representing audit trail events emitted by the proxy
//! pipeline, the token codec, the policy engine, resilience layer, and the
//! configuration manager.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single audit trail event
///
/// Events are sealed by [`AuditChain`](super::AuditChain) with BLAKE3 hash chaining
/// before being appended to the in-memory trail, providing tamper detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event identifier
    pub id: Uuid,
    /// When the event occurred
    pub timestamp: DateTime<Utc>,
    /// Category of the event
    pub kind: AuditEventKind,
    /// Severity level
    pub severity: AuditSeverity,
    /// Source information (agent, correlation id, admin subject)
    pub source: AuditSource,
    /// HTTP method (if applicable)
    pub method: Option<String>,
    /// Request path (if applicable)
    pub path: Option<String>,
    /// HTTP status code (if applicable)
    pub status_code: Option<u16>,
    /// Request duration in milliseconds (if applicable)
    pub duration_ms: Option<u64>,
    /// Name of the service that generated this event
    pub service_name: String,
    /// Additional structured metadata
    pub metadata: Option<serde_json::Value>,
    /// BLAKE3 hash of this event (set by AuditChain::seal)
    pub hash: Option<String>,
    /// Hash of the previous event in the chain
    pub previous_hash: Option<String>,
    /// Monotonically increasing sequence number
    pub sequence: u64,
}

impl AuditEvent {
    /// Create a new audit event with the given kind and severity
    pub fn new(kind: AuditEventKind, severity: AuditSeverity, service_name: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            kind,
            severity,
            source: AuditSource::default(),
            method: None,
            path: None,
            status_code: None,
            duration_ms: None,
            service_name,
            metadata: None,
            hash: None,
            previous_hash: None,
            sequence: 0,
        }
    }

    /// Set the source information
    pub fn with_source(mut self, source: AuditSource) -> Self {
        self.source = source;
        self
    }

    /// Set HTTP request details
    pub fn with_http(
        mut self,
        method: String,
        path: String,
        status_code: Option<u16>,
        duration_ms: Option<u64>,
    ) -> Self {
        self.method = Some(method);
        self.path = Some(path);
        self.status_code = status_code;
        self.duration_ms = duration_ms;
        self
    }

    /// Set additional metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// Categories of audit events
///
/// Proxy-pipeline events are emitted from [`crate::proxy`]; admin events come
/// from the admin handlers; `Custom` covers anything else.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AuditEventKind {
    /// A capability token was issued for an agent
    TokenIssued,
    /// A token presented on a request was validated successfully
    TokenValidated,
    /// A token was rejected (expired, malformed, bad signature)
    TokenRejected,
    /// A token was revoked before its natural expiry
    TokenRevoked,
    /// The policy engine denied a request
    PolicyDenied,
    /// A quota counter was exhausted
    QuotaExceeded,
    /// A tool's circuit breaker transitioned to open
    BreakerOpened,
    /// A tool's circuit breaker transitioned to half-open
    BreakerHalfOpened,
    /// A tool's circuit breaker transitioned back to closed
    BreakerClosed,
    /// Chaos injection fired for a tool call
    ChaosInjected,
    /// A tool adapter call completed (success or failure)
    ToolCallCompleted,
    /// The degradation controller disabled a feature
    FeatureDegraded,
    /// The degradation controller restored a feature
    FeatureRestored,
    /// The recovery controller executed a recovery action
    RecoveryExecuted,
    /// The `.env` configuration store was updated
    ConfigUpdated,
    /// The `.env` configuration store was rolled back to a prior backup
    ConfigRolledBack,
    /// An admin HTTP request was processed
    AdminRequest,
    /// An admin HTTP request was denied (auth failure, bad role claim)
    AdminRequestDenied,
    /// Application-defined event
    Custom(String),
}

impl std::fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TokenIssued => write!(f, "token.issued"),
            Self::TokenValidated => write!(f, "token.validated"),
            Self::TokenRejected => write!(f, "token.rejected"),
            Self::TokenRevoked => write!(f, "token.revoked"),
            Self::PolicyDenied => write!(f, "policy.denied"),
            Self::QuotaExceeded => write!(f, "quota.exceeded"),
            Self::BreakerOpened => write!(f, "breaker.opened"),
            Self::BreakerHalfOpened => write!(f, "breaker.half_opened"),
            Self::BreakerClosed => write!(f, "breaker.closed"),
            Self::ChaosInjected => write!(f, "chaos.injected"),
            Self::ToolCallCompleted => write!(f, "tool.call.completed"),
            Self::FeatureDegraded => write!(f, "feature.degraded"),
            Self::FeatureRestored => write!(f, "feature.restored"),
            Self::RecoveryExecuted => write!(f, "recovery.executed"),
            Self::ConfigUpdated => write!(f, "config.updated"),
            Self::ConfigRolledBack => write!(f, "config.rolled_back"),
            Self::AdminRequest => write!(f, "admin.request"),
            Self::AdminRequestDenied => write!(f, "admin.request.denied"),
            Self::Custom(name) => write!(f, "custom.{}", name),
        }
    }
}

/// Audit event severity levels
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuditSeverity {
    /// System is unusable
    Emergency = 0,
    /// Action must be taken immediately
    Alert = 1,
    /// Critical conditions
    Critical = 2,
    /// Error conditions
    Error = 3,
    /// Warning conditions
    Warning = 4,
    /// Normal but significant condition
    Notice = 5,
    /// Informational messages
    Informational = 6,
    /// Debug-level messages
    Debug = 7,
}

impl AuditSeverity {
    /// Get the numeric severity value (0-7), matching syslog's scale even
    /// though nothing in this crate speaks syslog anymore.
    pub fn as_numeric(&self) -> u8 {
        *self as u8
    }
}

impl std::fmt::Display for AuditSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Emergency => write!(f, "EMERGENCY"),
            Self::Alert => write!(f, "ALERT"),
            Self::Critical => write!(f, "CRITICAL"),
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Notice => write!(f, "NOTICE"),
            Self::Informational => write!(f, "INFO"),
            Self::Debug => write!(f, "DEBUG"),
        }
    }
}

/// Source information for an audit event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditSource {
    /// Agent ID, when the event concerns an agent's request
    pub agent_id: Option<String>,
    /// Tool name, when the event concerns a tool call
    pub tool: Option<String>,
    /// Authenticated admin subject, when the event concerns an admin request
    pub subject: Option<String>,
    /// Request ID for correlation with HTTP access logs
    pub request_id: Option<String>,
    /// Correlation ID propagated across retries and internal tool calls
    pub correlation_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_new() {
        let event = AuditEvent::new(
            AuditEventKind::TokenIssued,
            AuditSeverity::Informational,
            "gateway".to_string(),
        );
        assert_eq!(event.kind, AuditEventKind::TokenIssued);
        assert_eq!(event.service_name, "gateway");
        assert!(event.hash.is_none());
        assert_eq!(event.sequence, 0);
    }

    #[test]
    fn test_audit_event_with_http() {
        let event = AuditEvent::new(
            AuditEventKind::AdminRequest,
            AuditSeverity::Informational,
            "gateway".to_string(),
        )
        .with_http("GET".into(), "/admin/agents".into(), Some(200), Some(42));

        assert_eq!(event.method, Some("GET".to_string()));
        assert_eq!(event.path, Some("/admin/agents".to_string()));
        assert_eq!(event.status_code, Some(200));
        assert_eq!(event.duration_ms, Some(42));
    }

    #[test]
    fn test_audit_event_kind_display() {
        assert_eq!(AuditEventKind::TokenIssued.to_string(), "token.issued");
        assert_eq!(AuditEventKind::BreakerOpened.to_string(), "breaker.opened");
        assert_eq!(
            AuditEventKind::Custom("demo.reset".to_string()).to_string(),
            "custom.demo.reset"
        );
    }

    #[test]
    fn test_audit_severity_numeric_value() {
        assert_eq!(AuditSeverity::Emergency.as_numeric(), 0);
        assert_eq!(AuditSeverity::Informational.as_numeric(), 6);
        assert_eq!(AuditSeverity::Debug.as_numeric(), 7);
    }

    #[test]
    fn test_audit_event_serde_roundtrip() {
        let event = AuditEvent::new(
            AuditEventKind::PolicyDenied,
            AuditSeverity::Warning,
            "gateway".to_string(),
        )
        .with_source(AuditSource {
            agent_id: Some("agent_01h455vb4pex5vsknk084sn02q".to_string()),
            tool: Some("search".to_string()),
            subject: None,
            request_id: Some("req-123".to_string()),
            correlation_id: Some("corr-456".to_string()),
        });

        let json = serde_json::to_string(&event).unwrap();
        let deserialized: AuditEvent = serde_json::from_str(&json).unwrap();

        assert_eq!(deserialized.id, event.id);
        assert_eq!(deserialized.kind, AuditEventKind::PolicyDenied);
        assert_eq!(
            deserialized.source.agent_id,
            Some("agent_01h455vb4pex5vsknk084sn02q".to_string())
        );
    }
}
