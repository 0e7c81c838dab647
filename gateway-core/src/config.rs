//! Ambient, typed configuration loaded via Figment.
//!
//! This is distinct from [`crate::config_manager`], which owns the mutable,
//! lockable, backed-up `.env`-style operational settings (`PORT`,
//! `TOKEN_HMAC_SECRET`, `KEK_BASE64`, `UPSTREAM_MODE`, ...). This module
//! loads the process's own bootstrap configuration (log level, listen
//! address, admin JWT verification key, security headers), merged in
//! precedence order:
//!
//! 1. Environment variables (prefix `GATEWAY_`)
//! 2. `./config.toml`
//! 3. `$XDG_CONFIG_HOME/gateway/config.toml`
//! 4. `/etc/gateway/config.toml`
//! 5. Defaults

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::audit::AuditConfig;
use crate::error::Result;

/// Root configuration structure for the gateway server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,
    #[serde(default)]
    pub middleware: MiddlewareConfig,
    /// Location of the mutable operational `.env` file owned by
    /// [`crate::config_manager`].
    #[serde(default = "default_env_path")]
    pub env_path: PathBuf,
    #[serde(default)]
    pub gateway: GatewaySettings,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

/// Admin-surface JWT verification configuration (bearer auth for the
/// `/api/*` management endpoints; distinct from the agent capability
/// tokens minted and verified by [`crate::token`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    pub public_key_path: PathBuf,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Standard HTTP security response headers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityHeadersConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub hsts: bool,
    #[serde(default = "default_hsts_max_age")]
    pub hsts_max_age_secs: u64,
    #[serde(default)]
    pub hsts_include_subdomains: bool,
    #[serde(default)]
    pub hsts_preload: bool,
    #[serde(default = "default_true")]
    pub x_content_type_options: bool,
    #[serde(default = "default_x_frame_options")]
    pub x_frame_options: String,
    #[serde(default = "default_true")]
    pub x_xss_protection: bool,
    #[serde(default = "default_referrer_policy")]
    pub referrer_policy: String,
    #[serde(default)]
    pub permissions_policy: Option<String>,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            hsts: true,
            hsts_max_age_secs: default_hsts_max_age(),
            hsts_include_subdomains: false,
            hsts_preload: false,
            x_content_type_options: true,
            x_frame_options: default_x_frame_options(),
            x_xss_protection: true,
            referrer_policy: default_referrer_policy(),
            permissions_policy: None,
        }
    }
}

/// Request tracking / compression / CORS toggles for the ambient tower stack.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    #[serde(default = "default_true")]
    pub request_id: bool,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_true")]
    pub catch_panic: bool,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            request_id: true,
            compression: true,
            catch_panic: true,
        }
    }
}

/// Gateway-domain defaults, overridable per-request by policy or by the
/// `.env`-backed [`crate::config_manager`] (§4.10 of the design doc).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySettings {
    #[serde(default = "default_timezone")]
    pub default_timezone: String,
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,
    #[serde(default = "default_token_ttl")]
    pub default_token_ttl_secs: i64,
    #[serde(default = "default_rotation_horizon")]
    pub rotation_horizon_secs: i64,
    #[serde(default)]
    pub demo_mode: bool,
    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_audit_retention")]
    pub audit_retention: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            default_timezone: default_timezone(),
            http_timeout_ms: default_http_timeout_ms(),
            default_token_ttl_secs: default_token_ttl(),
            rotation_horizon_secs: default_rotation_horizon(),
            demo_mode: false,
            rate_limit_burst: default_rate_limit_burst(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            audit_retention: default_audit_retention(),
        }
    }
}

fn default_env_path() -> PathBuf {
    PathBuf::from("config/.env")
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_environment() -> String {
    "development".to_string()
}
fn default_shutdown_timeout() -> u64 {
    30
}
fn default_jwt_algorithm() -> String {
    "RS256".to_string()
}
fn default_true() -> bool {
    true
}
fn default_hsts_max_age() -> u64 {
    31_536_000
}
fn default_x_frame_options() -> String {
    "DENY".to_string()
}
fn default_referrer_policy() -> String {
    "strict-origin-when-cross-origin".to_string()
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_http_timeout_ms() -> u64 {
    6_000
}
fn default_token_ttl() -> i64 {
    900
}
fn default_rotation_horizon() -> i64 {
    300
}
fn default_rate_limit_burst() -> u32 {
    5
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_audit_retention() -> usize {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                name: "gateway".to_string(),
                port: default_port(),
                log_level: default_log_level(),
                environment: default_environment(),
                shutdown_timeout_secs: default_shutdown_timeout(),
            },
            jwt: JwtConfig {
                public_key_path: PathBuf::from("config/admin_jwt.pub"),
                algorithm: default_jwt_algorithm(),
                issuer: None,
                audience: None,
            },
            security_headers: SecurityHeadersConfig::default(),
            middleware: MiddlewareConfig::default(),
            env_path: default_env_path(),
            gateway: GatewaySettings::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the standard precedence chain.
    pub fn load() -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));

        if let Some(xdg_dirs) = xdg::BaseDirectories::with_prefix("gateway").ok() {
            if let Some(path) = xdg_dirs.find_config_file("config.toml") {
                figment = figment.merge(Toml::file(path));
            }
        }

        let system_path = std::path::Path::new("/etc/gateway/config.toml");
        if system_path.exists() {
            figment = figment.merge(Toml::file(system_path));
        }

        figment = figment
            .merge(Toml::file("config.toml"))
            .merge(Env::prefixed("GATEWAY_").split("__"));

        Ok(figment.extract()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_gateway_defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.default_timezone, "UTC");
        assert_eq!(config.gateway.http_timeout_ms, 6_000);
        assert_eq!(config.gateway.rate_limit_burst, 5);
        assert!(!config.gateway.demo_mode);
    }

    #[test]
    fn load_falls_back_to_defaults_without_any_files() {
        let config = Config::load().expect("defaults-only load should succeed");
        assert_eq!(config.service.name, "gateway");
    }
}
