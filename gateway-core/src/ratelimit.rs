//! Per-agent token bucket rate limiter (§4.9 step 12, §5: "refilled lazily
//! on access; guarded by per-agent lock").

use std::time::{Duration, Instant};

use dashmap::DashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub burst: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            burst: 5,
            window: Duration::from_secs(60),
        }
    }
}

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    config: RateLimitConfig,
    buckets: DashMap<Uuid, Bucket>,
}

pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            buckets: DashMap::new(),
        }
    }

    fn refill_rate_per_sec(&self) -> f64 {
        self.config.burst as f64 / self.config.window.as_secs_f64()
    }

    /// Attempts to consume one token for `agent_id`; lazily refills based on
    /// elapsed time since the last access.
    pub fn try_acquire(&self, agent_id: Uuid) -> Result<(), RateLimitExceeded> {
        let now = Instant::now();
        let mut bucket = self.buckets.entry(agent_id).or_insert_with(|| Bucket {
            tokens: self.config.burst as f64,
            last_refill: now,
        });

        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_rate_per_sec())
            .min(self.config.burst as f64);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait_secs = (deficit / self.refill_rate_per_sec()).ceil() as u64;
            Err(RateLimitExceeded {
                retry_after_secs: wait_secs.max(1),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_up_to_burst_then_rejects() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 5,
            window: Duration::from_secs(60),
        });
        let agent = Uuid::new_v4();
        for _ in 0..5 {
            assert!(limiter.try_acquire(agent).is_ok());
        }
        let err = limiter.try_acquire(agent).unwrap_err();
        assert!(err.retry_after_secs > 0);
    }

    #[test]
    fn separate_agents_have_independent_buckets() {
        let limiter = RateLimiter::new(RateLimitConfig {
            burst: 1,
            window: Duration::from_secs(60),
        });
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert!(limiter.try_acquire(a).is_ok());
        assert!(limiter.try_acquire(b).is_ok());
        assert!(limiter.try_acquire(a).is_err());
    }
}
