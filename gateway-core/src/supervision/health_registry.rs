//! Health check registry and scheduler (§4.11). Implementations register a
//! check; a background scheduler runs each on its own interval and publishes
//! results atomically so readers always see a consistent snapshot (§5).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock as AsyncRwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckType {
    Http,
    Tcp,
    Command,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Aggregate severity ordering used by [`HealthRegistry::aggregate`]:
    /// the worst status across every registered component wins.
    fn severity(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CheckSpec {
    pub name: String,
    pub check_type: CheckType,
    pub interval: Duration,
    pub timeout: Duration,
    pub failure_threshold: u32,
    pub success_threshold: u32,
}

/// A runnable health probe; live implementations hit an HTTP endpoint, dial
/// a TCP port, or shell out, while tests can stub `Custom` checks directly.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self) -> Result<(), String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: Option<String>,
    pub checked_at: DateTime<Utc>,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
}

struct RegisteredCheck {
    spec: CheckSpec,
    probe: Arc<dyn HealthCheck>,
}

/// Holds every registered check plus the last published result for each.
/// `results` is a [`DashMap`] so the scheduler's writer and any number of
/// concurrent readers (the `/health/enhanced` handler, the watchdog) never
/// contend on a single lock.
pub struct HealthRegistry {
    checks: AsyncRwLock<HashMap<String, RegisteredCheck>>,
    results: DashMap<String, CheckResult>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            checks: AsyncRwLock::new(HashMap::new()),
            results: DashMap::new(),
        }
    }

    pub async fn register(&self, spec: CheckSpec, probe: Arc<dyn HealthCheck>) {
        let name = spec.name.clone();
        self.results.insert(
            name.clone(),
            CheckResult {
                name: name.clone(),
                status: HealthStatus::Healthy,
                message: None,
                checked_at: Utc::now(),
                consecutive_failures: 0,
                consecutive_successes: 0,
            },
        );
        self.checks
            .write()
            .await
            .insert(name, RegisteredCheck { spec, probe });
    }

    pub fn result(&self, name: &str) -> Option<CheckResult> {
        self.results.get(name).map(|r| r.clone())
    }

    pub fn all_results(&self) -> Vec<CheckResult> {
        self.results.iter().map(|e| e.value().clone()).collect()
    }

    /// Worst status across every registered component (§4.11).
    pub fn aggregate(&self) -> HealthStatus {
        self.results
            .iter()
            .map(|e| e.status)
            .max_by_key(|s| s.severity())
            .unwrap_or(HealthStatus::Healthy)
    }

    /// Runs one check immediately and publishes the result, updating the
    /// consecutive failure/success counters used by the watchdog.
    async fn run_one(&self, name: &str) {
        let (spec, probe) = {
            let checks = self.checks.read().await;
            match checks.get(name) {
                Some(c) => (c.spec.clone(), c.probe.clone()),
                None => return,
            }
        };

        let outcome = tokio::time::timeout(spec.timeout, probe.check()).await;
        let mut prev = self
            .results
            .get(name)
            .map(|r| r.clone())
            .unwrap_or(CheckResult {
                name: name.to_string(),
                status: HealthStatus::Healthy,
                message: None,
                checked_at: Utc::now(),
                consecutive_failures: 0,
                consecutive_successes: 0,
            });

        match outcome {
            Ok(Ok(())) => {
                prev.consecutive_successes += 1;
                prev.consecutive_failures = 0;
                if prev.consecutive_successes >= spec.success_threshold {
                    prev.status = HealthStatus::Healthy;
                }
                prev.message = None;
            }
            Ok(Err(message)) => {
                prev.consecutive_failures += 1;
                prev.consecutive_successes = 0;
                prev.status = if prev.consecutive_failures >= spec.failure_threshold {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                };
                prev.message = Some(message);
            }
            Err(_) => {
                prev.consecutive_failures += 1;
                prev.consecutive_successes = 0;
                prev.status = if prev.consecutive_failures >= spec.failure_threshold {
                    HealthStatus::Unhealthy
                } else {
                    HealthStatus::Degraded
                };
                prev.message = Some("check timed out".to_string());
            }
        }
        prev.checked_at = Utc::now();
        self.results.insert(name.to_string(), prev);
    }

    /// Spawns one scheduling task per registered check, each ticking on its
    /// own interval, stopping when `token` is cancelled.
    pub async fn spawn_scheduler(self: &Arc<Self>, token: CancellationToken) {
        let names: Vec<(String, Duration)> = {
            let checks = self.checks.read().await;
            checks
                .values()
                .map(|c| (c.spec.name.clone(), c.spec.interval))
                .collect()
        };
        for (name, interval) in names {
            let registry = self.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now(), interval);
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = ticker.tick() => {
                            registry.run_one(&name).await;
                        }
                    }
                }
            });
        }
    }
}

impl Clone for CheckSpec {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            check_type: self.check_type,
            interval: self.interval,
            timeout: self.timeout,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct AlwaysHealthy;
    #[async_trait]
    impl HealthCheck for AlwaysHealthy {
        async fn check(&self) -> Result<(), String> {
            Ok(())
        }
    }

    struct AlwaysFails;
    #[async_trait]
    impl HealthCheck for AlwaysFails {
        async fn check(&self) -> Result<(), String> {
            Err("down".to_string())
        }
    }

    struct Flaky(Arc<AtomicBool>);
    #[async_trait]
    impl HealthCheck for Flaky {
        async fn check(&self) -> Result<(), String> {
            if self.0.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err("still down".to_string())
            }
        }
    }

    fn spec(name: &str) -> CheckSpec {
        CheckSpec {
            name: name.to_string(),
            check_type: CheckType::Custom,
            interval: Duration::from_secs(30),
            timeout: Duration::from_millis(100),
            failure_threshold: 2,
            success_threshold: 1,
        }
    }

    #[tokio::test]
    async fn registers_and_reports_healthy_by_default() {
        let registry = HealthRegistry::new();
        registry.register(spec("api"), Arc::new(AlwaysHealthy)).await;
        assert_eq!(registry.result("api").unwrap().status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn repeated_failures_cross_threshold_to_unhealthy() {
        let registry = HealthRegistry::new();
        registry.register(spec("db"), Arc::new(AlwaysFails)).await;
        registry.run_one("db").await;
        assert_eq!(registry.result("db").unwrap().status, HealthStatus::Degraded);
        registry.run_one("db").await;
        assert_eq!(registry.result("db").unwrap().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn aggregate_reports_worst_status() {
        let registry = HealthRegistry::new();
        registry.register(spec("a"), Arc::new(AlwaysHealthy)).await;
        registry.register(spec("b"), Arc::new(AlwaysFails)).await;
        registry.run_one("b").await;
        registry.run_one("b").await;
        assert_eq!(registry.aggregate(), HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn recovering_check_returns_to_healthy() {
        let flag = Arc::new(AtomicBool::new(false));
        let registry = HealthRegistry::new();
        registry.register(spec("flaky"), Arc::new(Flaky(flag.clone()))).await;
        registry.run_one("flaky").await;
        registry.run_one("flaky").await;
        assert_eq!(registry.result("flaky").unwrap().status, HealthStatus::Unhealthy);
        flag.store(true, Ordering::SeqCst);
        registry.run_one("flaky").await;
        assert_eq!(registry.result("flaky").unwrap().status, HealthStatus::Healthy);
    }
}
