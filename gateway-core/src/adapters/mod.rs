//! Tool adapter abstraction (§4.7). A uniform `(tool, action, params) →
//! result` surface; live and mock implementations share this contract so
//! the proxy pipeline is unaware of which set is in effect (§9 REDESIGN
//! FLAGS: "avoid reflection; action routing is a small static table per
//! adapter").

pub mod chat;
pub mod http_fetch;
pub mod search;
pub mod send_mail;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::chaos::{ChaosInjector, ChaosMode, ChaosOutcome};
use crate::registry::Tool;

/// Typed adapter error (§7 propagation policy: "adapters raise typed
/// errors; the proxy pipeline maps them to categories above; nothing above
/// the adapter layer inspects provider-specific error shapes").
#[derive(Debug, Clone)]
pub struct AdapterError {
    pub message: String,
    pub retryable: bool,
    pub retry_after: Option<Duration>,
    pub status: Option<u16>,
}

impl AdapterError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
            retry_after: None,
            status: Some(400),
        }
    }

    pub fn unconfigured(tool: Tool) -> Self {
        Self {
            message: format!("tool '{}' is not configured", tool.as_str()),
            retryable: false,
            retry_after: None,
            status: Some(503),
        }
    }

    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        let retryable = status >= 500 || status == 429;
        Self {
            message: message.into(),
            retryable,
            retry_after: None,
            status: Some(status),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            retry_after: None,
            status: None,
        }
    }

    pub fn chaos(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
            retry_after: None,
            status: Some(500),
        }
    }
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AdapterError {}

/// `{isConfigured() → bool, actions: {name → (params) → result}}` (§4.7).
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    fn tool(&self) -> Tool;
    fn is_configured(&self) -> bool;
    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamMode {
    Live,
    Mock,
}

/// Wraps every adapter call with the chaos injector (§4.8: evaluated once
/// per call, whether the underlying adapter is live or mock).
pub async fn call_with_chaos(
    adapter: &dyn ToolAdapter,
    action: &str,
    params: &Value,
    chaos: &ChaosInjector,
) -> Result<Value, AdapterError> {
    match chaos.roll(adapter.tool().as_str()) {
        ChaosOutcome::Proceed => adapter.call(action, params).await,
        ChaosOutcome::Timeout { after } => {
            tokio::time::sleep(after).await;
            Err(AdapterError::chaos(format!(
                "chaos_timeout: {} injected fault ({:?} delay)",
                adapter.tool().as_str(),
                after
            )))
        }
        ChaosOutcome::Error500 => Err(AdapterError::chaos(format!(
            "chaos_500: {} injected fault",
            adapter.tool().as_str()
        ))),
        ChaosOutcome::Jitter { for_ } => {
            tokio::time::sleep(for_).await;
            adapter.call(action, params).await
        }
    }
}

/// The fixed adapter set `{search, http_fetch, chat, send_mail}` (§4.7).
pub struct AdapterSet {
    pub search: Arc<dyn ToolAdapter>,
    pub http_fetch: Arc<dyn ToolAdapter>,
    pub chat: Arc<dyn ToolAdapter>,
    pub send_mail: Arc<dyn ToolAdapter>,
}

impl AdapterSet {
    pub fn get(&self, tool: Tool) -> Arc<dyn ToolAdapter> {
        match tool {
            Tool::Search => self.search.clone(),
            Tool::HttpFetch => self.http_fetch.clone(),
            Tool::Chat => self.chat.clone(),
            Tool::SendMail => self.send_mail.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOk;

    #[async_trait]
    impl ToolAdapter for AlwaysOk {
        fn tool(&self) -> Tool {
            Tool::Search
        }
        fn is_configured(&self) -> bool {
            true
        }
        async fn call(&self, _action: &str, _params: &Value) -> Result<Value, AdapterError> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn chaos_error_500_short_circuits_the_real_call() {
        let chaos = ChaosInjector::new();
        chaos.configure(
            "search",
            crate::chaos::ChaosSetting {
                mode: ChaosMode::Error500,
                probability_percent: 100,
            },
        );
        let adapter = AlwaysOk;
        let result = call_with_chaos(&adapter, "query", &Value::Null, &chaos).await;
        assert!(result.is_err());
        assert!(result.unwrap_err().message.contains("chaos_500"));
    }

    #[tokio::test]
    async fn no_chaos_configured_calls_through() {
        let chaos = ChaosInjector::new();
        let adapter = AlwaysOk;
        let result = call_with_chaos(&adapter, "query", &Value::Null, &chaos).await;
        assert!(result.unwrap()["ok"].as_bool().unwrap());
    }

    #[test]
    fn upstream_429_is_retryable() {
        assert!(AdapterError::upstream(429, "rate limited").retryable);
        assert!(AdapterError::upstream(500, "boom").retryable);
        assert!(!AdapterError::upstream(404, "missing").retryable);
    }
}
