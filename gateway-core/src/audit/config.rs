//! Audit logging configuration
//!
//! Loaded from the `[audit]` section of the ambient typed config.

use serde::{Deserialize, Serialize};

/// Audit logging configuration
///
/// Controls which events are captured and how many are retained in the
/// in-memory trail. There is no durable store or SIEM export in this
/// build — the trail lives for the lifetime of the process and is
/// inspected through the admin API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Enable audit logging (default: true)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Audit every admin HTTP request, not just mutating ones (default: false)
    #[serde(default)]
    pub audit_all_admin_requests: bool,

    /// Routes to exclude from auditing (default: ["/health", "/ready", "/metrics"])
    #[serde(default = "default_excluded_routes")]
    pub excluded_routes: Vec<String>,

    /// Maximum number of sealed events kept in the in-memory trail
    ///
    /// Once exceeded, the oldest events are dropped from the queryable
    /// buffer; the hash chain itself keeps advancing regardless; only the
    /// buffer used by the admin "list recent audit events" endpoint is
    /// bounded.
    #[serde(default = "default_max_buffered_events")]
    pub max_buffered_events: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            audit_all_admin_requests: false,
            excluded_routes: default_excluded_routes(),
            max_buffered_events: default_max_buffered_events(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_excluded_routes() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/ready".to_string(),
        "/metrics".to_string(),
    ]
}

fn default_max_buffered_events() -> usize {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_config_defaults() {
        let config = AuditConfig::default();
        assert!(config.enabled);
        assert!(!config.audit_all_admin_requests);
        assert_eq!(
            config.excluded_routes,
            vec!["/health", "/ready", "/metrics"]
        );
        assert_eq!(config.max_buffered_events, 10_000);
    }

    #[test]
    fn test_audit_config_serde_roundtrip() {
        let config = AuditConfig {
            enabled: true,
            audit_all_admin_requests: true,
            excluded_routes: vec!["/health".to_string()],
            max_buffered_events: 500,
        };

        let json = serde_json::to_string(&config).unwrap();
        let deserialized: AuditConfig = serde_json::from_str(&json).unwrap();

        assert!(deserialized.audit_all_admin_requests);
        assert_eq!(deserialized.excluded_routes, vec!["/health"]);
        assert_eq!(deserialized.max_buffered_events, 500);
    }

    #[test]
    fn test_fields_default_from_json() {
        let json = r#"{"enabled": true}"#;
        let config: AuditConfig = serde_json::from_str(json).unwrap();
        assert!(!config.audit_all_admin_requests);
        assert_eq!(config.max_buffered_events, 10_000);
    }
}
