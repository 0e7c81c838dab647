//! Per-tool circuit breaker (§4.3).

use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cooldown: Duration,
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(30),
            cooldown: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

struct Inner {
    state: BreakerState,
    failures: Vec<Instant>,
    consecutive_successes: u32,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// One breaker instance per tool. The critical section guarded by the mutex
/// is a handful of comparisons — never a suspension point (§5).
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<Inner>,
}

/// Whether a probe may proceed, and what to do with its outcome.
pub enum Admission {
    /// Call is allowed to proceed normally (breaker closed).
    Proceed,
    /// Call is the single admitted half-open probe.
    Probe,
    /// Fail fast — breaker open.
    Rejected,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                failures: Vec::new(),
                consecutive_successes: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut inner);
        inner.state
    }

    fn maybe_transition_to_half_open(&self, inner: &mut Inner) {
        if inner.state == BreakerState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.cooldown {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = false;
                    inner.consecutive_successes = 0;
                }
            }
        }
    }

    /// Admit or reject a call. Half-open admits at most one concurrent probe.
    pub fn admit(&self) -> Admission {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        self.maybe_transition_to_half_open(&mut inner);
        match inner.state {
            BreakerState::Closed => Admission::Proceed,
            BreakerState::Open => Admission::Rejected,
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    Admission::Rejected
                } else {
                    inner.probe_in_flight = true;
                    Admission::Probe
                }
            }
        }
    }

    /// Record a successful call outcome.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        match inner.state {
            BreakerState::Closed => {
                inner.failures.clear();
            }
            BreakerState::HalfOpen => {
                inner.consecutive_successes += 1;
                inner.probe_in_flight = false;
                if inner.consecutive_successes >= self.config.success_threshold {
                    inner.state = BreakerState::Closed;
                    inner.failures.clear();
                    inner.consecutive_successes = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Record a failed call outcome. Per §4.3, `policy_denied` and
    /// `validation_error` never reach this — callers must filter those out
    /// before invoking the breaker at all.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().expect("breaker mutex poisoned");
        let now = Instant::now();
        match inner.state {
            BreakerState::Closed => {
                let window = self.config.window;
                inner.failures.retain(|t| now.duration_since(*t) <= window);
                inner.failures.push(now);
                if inner.failures.len() as u32 >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(now);
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.probe_in_flight = false;
                inner.consecutive_successes = 0;
            }
            BreakerState::Open => {}
        }
    }
}

/// True if `err` should be counted against the breaker (§4.3: everything
/// except explicit `policy_denied`/`validation_error`).
pub fn is_breaker_countable(err: &Error) -> bool {
    !matches!(err, Error::PolicyDenied(_) | Error::ValidationError(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            window: Duration::from_secs(30),
            cooldown: Duration::from_millis(20),
            success_threshold: 2,
        }
    }

    #[test]
    fn opens_after_threshold_failures() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            assert!(matches!(breaker.admit(), Admission::Proceed));
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(matches!(breaker.admit(), Admission::Rejected));
    }

    #[test]
    fn half_opens_after_cooldown_then_closes_on_successes() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(breaker.admit(), Admission::Probe));
        breaker.record_success();
        assert!(matches!(breaker.admit(), Admission::Probe));
        breaker.record_success();
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(breaker.admit(), Admission::Probe));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);
    }

    #[test]
    fn half_open_admits_only_one_concurrent_probe() {
        let breaker = CircuitBreaker::new(fast_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        std::thread::sleep(Duration::from_millis(30));
        assert!(matches!(breaker.admit(), Admission::Probe));
        assert!(matches!(breaker.admit(), Admission::Rejected));
    }

    #[test]
    fn policy_denied_is_not_breaker_countable() {
        assert!(!is_breaker_countable(&Error::PolicyDenied("x".into())));
        assert!(!is_breaker_countable(&Error::ValidationError("x".into())));
        assert!(is_breaker_countable(&Error::ToolFailed("x".into())));
    }
}
