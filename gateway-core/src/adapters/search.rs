//! SerpAPI-like search adapter (§4.7).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{AdapterError, ToolAdapter};
use crate::registry::Tool;
use crate::resilience::GatewayHttpClient;

#[derive(Debug, Deserialize)]
struct QueryParams {
    q: String,
    #[serde(default = "default_num")]
    num: u32,
}

fn default_num() -> u32 {
    10
}

fn validate_query(params: &Value) -> Result<QueryParams, AdapterError> {
    let parsed: QueryParams = serde_json::from_value(params.clone())
        .map_err(|e| AdapterError::validation(format!("invalid search params: {e}")))?;
    if parsed.q.trim().is_empty() {
        return Err(AdapterError::validation("'q' must not be empty"));
    }
    Ok(parsed)
}

/// Live adapter backed by a SerpAPI-compatible HTTP endpoint.
pub struct LiveSearchAdapter {
    api_key: Option<String>,
    client: GatewayHttpClient,
    endpoint: String,
}

impl LiveSearchAdapter {
    pub fn new(api_key: Option<String>, client: GatewayHttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            api_key,
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ToolAdapter for LiveSearchAdapter {
    fn tool(&self) -> Tool {
        Tool::Search
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError> {
        if !self.is_configured() {
            return Err(AdapterError::unconfigured(Tool::Search));
        }
        match action {
            "query" => {
                let query = validate_query(params)?;
                let url = format!(
                    "{}?q={}&num={}&api_key={}",
                    self.endpoint,
                    urlencoding_q(&query.q),
                    query.num,
                    self.api_key.as_deref().unwrap_or_default()
                );
                let correlation = crate::ids::CorrelationId::new();
                let response = self
                    .client
                    .get(&url, &correlation)
                    .await
                    .map_err(|e| AdapterError::network(e.to_string()))?;
                if response.status >= 400 {
                    return Err(AdapterError::upstream(
                        response.status,
                        format!("search upstream returned {}", response.status),
                    ));
                }
                serde_json::from_slice(&response.body)
                    .map_err(|e| AdapterError::upstream(502, format!("malformed upstream body: {e}")))
            }
            other => Err(AdapterError::validation(format!("unknown search action '{other}'"))),
        }
    }
}

fn urlencoding_q(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            ' ' => "+".to_string(),
            c if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') => c.to_string(),
            c => format!("%{:02X}", c as u32),
        })
        .collect()
}

/// Mock adapter used when the process is started in `mock` mode (§4.7).
pub struct MockSearchAdapter;

#[async_trait]
impl ToolAdapter for MockSearchAdapter {
    fn tool(&self) -> Tool {
        Tool::Search
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError> {
        match action {
            "query" => {
                let query = validate_query(params)?;
                Ok(serde_json::json!({
                    "query": query.q,
                    "results": [
                        {"title": format!("Result for {}", query.q), "url": "https://example.com/1"},
                        {"title": "Second result", "url": "https://example.com/2"},
                    ],
                }))
            }
            other => Err(AdapterError::validation(format!("unknown search action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_adapter_returns_results_for_valid_query() {
        let adapter = MockSearchAdapter;
        let result = adapter
            .call("query", &serde_json::json!({"q": "ocean"}))
            .await
            .unwrap();
        assert_eq!(result["query"], "ocean");
        assert!(result["results"].as_array().unwrap().len() >= 1);
    }

    #[tokio::test]
    async fn empty_query_is_a_validation_error() {
        let adapter = MockSearchAdapter;
        let err = adapter
            .call("query", &serde_json::json!({"q": ""}))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }

    #[tokio::test]
    async fn unconfigured_live_adapter_refuses_to_execute() {
        let adapter = LiveSearchAdapter::new(
            None,
            GatewayHttpClient::new(Default::default()),
            "https://serpapi.example/search",
        );
        let err = adapter
            .call("query", &serde_json::json!({"q": "ocean"}))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(503));
    }
}
