//! Retry with jittered exponential backoff (§4.4).
//!
//! Generic over the error type so adapters can raise their own typed
//! errors (retryable network I/O, 5xx, `retryable: true`) without this
//! layer needing to know their shape (§7 propagation policy).

use rand::Rng;
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Whether an error is retryable (§4.4). 429 is retryable honouring
/// `retry_after`; other 4xx, `policy_denied`, and `validation_error` are not.
#[derive(Debug, Clone, Copy)]
pub enum Retryable {
    Yes { retry_after: Option<Duration> },
    No,
}

/// Runs `attempt` up to `config.max_attempts` times, sleeping with full
/// jitter between attempts, and invoking `on_retry(attempt_number)` before
/// each retry so callers can increment metrics. `classify` decides whether
/// a given error is worth retrying at all.
pub async fn retry_with_backoff<T, E, F, Fut>(
    config: RetryConfig,
    mut attempt: F,
    classify: impl Fn(&E) -> Retryable,
    mut on_retry: impl FnMut(u32),
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_err = None;
    for attempt_number in 1..=config.max_attempts {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let is_last = attempt_number == config.max_attempts;
                match classify(&err) {
                    Retryable::No => return Err(err),
                    Retryable::Yes { retry_after } if !is_last => {
                        on_retry(attempt_number);
                        let delay = retry_after.unwrap_or_else(|| backoff_delay(config, attempt_number));
                        tokio::time::sleep(delay).await;
                        last_err = Some(err);
                    }
                    Retryable::Yes { .. } => {
                        last_err = Some(err);
                    }
                }
            }
        }
    }
    Err(last_err.expect("loop runs at least once since max_attempts >= 1"))
}

fn backoff_delay(config: RetryConfig, attempt: u32) -> Duration {
    let exp = config.base_delay.as_millis() as u64 * 2u64.saturating_pow(attempt.saturating_sub(1));
    let capped = exp.min(config.max_delay.as_millis() as u64);
    let jittered = rand::rng().random_range(0..=capped.max(1));
    Duration::from_millis(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestErr {
        Retryable,
        Fatal,
    }

    fn classify(e: &TestErr) -> Retryable {
        match e {
            TestErr::Retryable => Retryable::Yes { retry_after: None },
            TestErr::Fatal => Retryable::No,
        }
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_first_attempt_ok() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestErr> = retry_with_backoff(
            RetryConfig::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(42) }
            },
            classify,
            |_| {},
        )
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_retryable_errors_up_to_max_attempts() {
        let calls = AtomicU32::new(0);
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        };
        let result: Result<u32, TestErr> = retry_with_backoff(
            config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestErr::Retryable) }
            },
            classify,
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_fatal_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, TestErr> = retry_with_backoff(
            RetryConfig::default(),
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestErr::Fatal) }
            },
            classify,
            |_| {},
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invokes_on_retry_callback_with_attempt_number() {
        let calls = AtomicU32::new(0);
        let retries_seen = std::sync::Mutex::new(Vec::new());
        let config = RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        };
        let _result: Result<u32, TestErr> = retry_with_backoff(
            config,
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TestErr::Retryable) }
            },
            classify,
            |n| retries_seen.lock().unwrap().push(n),
        )
        .await;
        assert_eq!(*retries_seen.lock().unwrap(), vec![1, 2]);
    }
}
