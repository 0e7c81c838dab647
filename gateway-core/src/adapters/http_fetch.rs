//! Generic HTTP fetch adapter with a hard domain allow-list, separate from
//! per-policy allow-lists, plus a max body/header cap (§4.7).

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{AdapterError, ToolAdapter};
use crate::registry::Tool;
use crate::resilience::GatewayHttpClient;

#[derive(Debug, Deserialize)]
struct GetParams {
    url: String,
}

fn validate_get(params: &Value) -> Result<GetParams, AdapterError> {
    let parsed: GetParams = serde_json::from_value(params.clone())
        .map_err(|e| AdapterError::validation(format!("invalid http_fetch params: {e}")))?;
    if !parsed.url.starts_with("https://") && !parsed.url.starts_with("http://") {
        return Err(AdapterError::validation("'url' must be absolute http(s)"));
    }
    Ok(parsed)
}

pub struct LiveHttpFetchAdapter {
    client: GatewayHttpClient,
}

impl LiveHttpFetchAdapter {
    pub fn new(client: GatewayHttpClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ToolAdapter for LiveHttpFetchAdapter {
    fn tool(&self) -> Tool {
        Tool::HttpFetch
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError> {
        match action {
            "get" => {
                let get = validate_get(params)?;
                let correlation = crate::ids::CorrelationId::new();
                let response = self.client.get(&get.url, &correlation).await.map_err(|e| {
                    if matches!(e, crate::resilience::HttpClientError::DomainNotAllowed(_)) {
                        AdapterError::validation(e.to_string())
                    } else if e.is_retryable() {
                        AdapterError::network(e.to_string())
                    } else {
                        AdapterError::upstream(502, e.to_string())
                    }
                })?;
                if response.status >= 400 {
                    return Err(AdapterError::upstream(
                        response.status,
                        format!("http_fetch upstream returned {}", response.status),
                    ));
                }
                Ok(serde_json::json!({
                    "status": response.status,
                    "content_type": response.content_type,
                    "content_length": response.content_length,
                    "body": String::from_utf8_lossy(&response.body),
                }))
            }
            other => Err(AdapterError::validation(format!("unknown http_fetch action '{other}'"))),
        }
    }
}

pub struct MockHttpFetchAdapter;

#[async_trait]
impl ToolAdapter for MockHttpFetchAdapter {
    fn tool(&self) -> Tool {
        Tool::HttpFetch
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError> {
        match action {
            "get" => {
                let get = validate_get(params)?;
                Ok(serde_json::json!({
                    "status": 200,
                    "content_type": "text/plain",
                    "content_length": 13,
                    "body": format!("mock body for {}", get.url),
                }))
            }
            other => Err(AdapterError::validation(format!("unknown http_fetch action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_fetch_returns_synthetic_body() {
        let adapter = MockHttpFetchAdapter;
        let result = adapter
            .call("get", &serde_json::json!({"url": "https://example.com"}))
            .await
            .unwrap();
        assert_eq!(result["status"], 200);
    }

    #[tokio::test]
    async fn relative_url_is_rejected() {
        let adapter = MockHttpFetchAdapter;
        let err = adapter
            .call("get", &serde_json::json!({"url": "/relative"}))
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
