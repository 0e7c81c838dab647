//! Resilience primitives (§4.3-§4.6): circuit breaker, retry with backoff,
//! an outbound HTTP client, and a coalescing response cache.

pub mod breaker;
pub mod cache;
pub mod http_client;
pub mod retry;

pub use breaker::{Admission, BreakerConfig, BreakerState, CircuitBreaker, is_breaker_countable};
pub use cache::{CacheConfig, ResponseCache, fingerprint, is_cache_bypassed};
pub use http_client::{FetchedResponse, GatewayHttpClient, HttpClientConfig, HttpClientError};
pub use retry::{Retryable, RetryConfig, retry_with_backoff};
