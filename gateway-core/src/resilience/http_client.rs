//! Outbound HTTP client with correlation IDs, timeouts, and domain
//! allow-listing as a defense-in-depth check (§4.5).

use std::time::Duration;

use crate::ids::CorrelationId;

const DEFAULT_USER_AGENT: &str = "gateway-core/0.1 (+tool-adapter)";
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub max_body_bytes: usize,
    pub user_agent: String,
    /// Domain suffixes this client is allowed to reach. Empty means unrestricted
    /// (only appropriate for adapters that do their own allow-listing upstream).
    pub allowed_domain_suffixes: Vec<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(6),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            allowed_domain_suffixes: Vec::new(),
        }
    }
}

/// Response surfaced to adapters: only `content-type`/`content-length` pass
/// through; everything else about the transport is hidden (§4.5).
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("domain '{0}' is not in the client allow-list")]
    DomainNotAllowed(String),
    #[error("request exceeded the configured timeout")]
    Timeout,
    #[error("network error: {0}")]
    Network(String),
    #[error("response body exceeded {0} bytes")]
    BodyTooLarge(usize),
}

impl HttpClientError {
    /// §4.4: network I/O is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, HttpClientError::Timeout | HttpClientError::Network(_))
    }
}

#[derive(Clone)]
pub struct GatewayHttpClient {
    inner: reqwest::Client,
    config: HttpClientConfig,
}

impl GatewayHttpClient {
    pub fn new(config: HttpClientConfig) -> Self {
        let inner = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .expect("reqwest client configuration is always valid");
        Self { inner, config }
    }

    fn domain_allowed(&self, host: &str) -> bool {
        self.config.allowed_domain_suffixes.is_empty()
            || self
                .config
                .allowed_domain_suffixes
                .iter()
                .any(|suffix| host == suffix || host.ends_with(&format!(".{suffix}")))
    }

    pub async fn get(
        &self,
        url: &str,
        correlation_id: &CorrelationId,
    ) -> Result<FetchedResponse, HttpClientError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| HttpClientError::Network(e.to_string()))?;
        let host = parsed.host_str().unwrap_or_default().to_string();
        if !self.domain_allowed(&host) {
            return Err(HttpClientError::DomainNotAllowed(host));
        }

        let response = self
            .inner
            .get(parsed)
            .header("X-Correlation-Id", correlation_id.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HttpClientError::Timeout
                } else {
                    HttpClientError::Network(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let content_length = response.content_length();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| HttpClientError::Network(e.to_string()))?;
        if bytes.len() > self.config.max_body_bytes {
            return Err(HttpClientError::BodyTooLarge(self.config.max_body_bytes));
        }

        Ok(FetchedResponse {
            status,
            content_type,
            content_length,
            body: bytes.to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let config = HttpClientConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(6));
        assert_eq!(config.max_body_bytes, 1024 * 1024);
    }

    #[test]
    fn domain_allowlist_matches_suffix() {
        let client = GatewayHttpClient::new(HttpClientConfig {
            allowed_domain_suffixes: vec!["example.com".into()],
            ..HttpClientConfig::default()
        });
        assert!(client.domain_allowed("example.com"));
        assert!(client.domain_allowed("api.example.com"));
        assert!(!client.domain_allowed("example.com.evil.net"));
    }

    #[test]
    fn empty_allowlist_permits_any_domain() {
        let client = GatewayHttpClient::new(HttpClientConfig::default());
        assert!(client.domain_allowed("anything.test"));
    }

    #[test]
    fn network_and_timeout_errors_are_retryable() {
        assert!(HttpClientError::Timeout.is_retryable());
        assert!(HttpClientError::Network("reset".into()).is_retryable());
        assert!(!HttpClientError::DomainNotAllowed("x".into()).is_retryable());
    }
}
