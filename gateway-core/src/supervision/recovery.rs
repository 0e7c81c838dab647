//! Recovery controller (§4.11): a prioritized list of strategies, each
//! guarded by a condition over observed resource metrics, executed as an
//! ordered list of actions with a post-execution stabilization delay.
//! Concurrent recoveries are capped; excess triggers queue rather than
//! stack recovery attempts on top of one another.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tokio::sync::Semaphore;

use super::health_registry::HealthStatus;
use crate::audit::{AuditEventKind, AuditLogger, AuditSeverity, AuditSource};

/// Guard evaluated before a strategy is allowed to run.
#[derive(Debug, Clone, Default)]
pub struct RecoveryCondition {
    pub max_health_status: Option<HealthStatus>,
    pub min_restart_count: Option<u32>,
    pub min_memory_usage_percent: Option<f64>,
    pub min_cpu_usage_percent: Option<f64>,
    pub min_uptime: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryActionKind {
    CollectLogs,
    RestartContainer,
    StopContainer,
    RecreateContainer,
    NotifyOperator,
}

#[derive(Debug, Clone)]
pub struct RecoveryAction {
    pub kind: RecoveryActionKind,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub timeout: Duration,
}

pub struct RecoveryStrategy {
    pub name: String,
    pub priority: u32,
    pub condition: RecoveryCondition,
    pub actions: Vec<RecoveryAction>,
    pub stabilization_delay: Duration,
}

/// Snapshot of the metrics a [`RecoveryCondition`] is evaluated against.
/// Populated by the caller from whatever monitoring source is wired in;
/// the controller itself does not sample resource usage.
#[derive(Debug, Clone, Default)]
pub struct RecoverySnapshot {
    pub health_status: Option<HealthStatus>,
    pub restart_count: u32,
    pub memory_usage_percent: f64,
    pub cpu_usage_percent: f64,
    pub uptime: Duration,
}

fn condition_matches(condition: &RecoveryCondition, snapshot: &RecoverySnapshot) -> bool {
    if let Some(max) = condition.max_health_status {
        match snapshot.health_status {
            Some(status) if status_rank(status) >= status_rank(max) => {}
            _ => return false,
        }
    }
    if let Some(min) = condition.min_restart_count {
        if snapshot.restart_count < min {
            return false;
        }
    }
    if let Some(min) = condition.min_memory_usage_percent {
        if snapshot.memory_usage_percent < min {
            return false;
        }
    }
    if let Some(min) = condition.min_cpu_usage_percent {
        if snapshot.cpu_usage_percent < min {
            return false;
        }
    }
    if let Some(min) = condition.min_uptime {
        if snapshot.uptime < min {
            return false;
        }
    }
    true
}

fn status_rank(status: HealthStatus) -> u8 {
    match status {
        HealthStatus::Healthy => 0,
        HealthStatus::Degraded => 1,
        HealthStatus::Unhealthy => 2,
    }
}

/// Errors from the cross-platform command wrapper are classified so the
/// executor knows whether a transient failure is worth retrying (§4.11).
fn is_retryable_io_error(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    match err.kind() {
        ErrorKind::TimedOut | ErrorKind::ConnectionReset | ErrorKind::WouldBlock => true,
        _ => {
            let msg = err.to_string().to_ascii_lowercase();
            msg.contains("no buffer space available")
                || msg.contains("econnreset")
                || msg.contains("enotfound")
                || msg.contains("etimedout")
        }
    }
}

/// Runs `command` with `args`, capping captured stdout+stderr at
/// `max_output_bytes` (default 1 MiB per §4.11) and bounding wall time at
/// `timeout`. Retries once on a transient I/O error; permission-denied and
/// command-not-found are not retried.
async fn run_command(
    command: &str,
    args: &[String],
    timeout: Duration,
    max_output_bytes: usize,
) -> Result<String, String> {
    let mut attempts = 0;
    loop {
        attempts += 1;
        let result = tokio::time::timeout(timeout, async {
            Command::new(command)
                .args(args)
                .output()
                .await
        })
        .await;

        match result {
            Ok(Ok(output)) => {
                let mut combined = output.stdout;
                combined.extend_from_slice(&output.stderr);
                combined.truncate(max_output_bytes);
                return Ok(String::from_utf8_lossy(&combined).into_owned());
            }
            Ok(Err(io_err)) => {
                if matches!(
                    io_err.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
                ) {
                    return Err(format!("command unavailable: {io_err}"));
                }
                if is_retryable_io_error(&io_err) && attempts < 2 {
                    continue;
                }
                return Err(format!("command failed: {io_err}"));
            }
            Err(_) => {
                if attempts < 2 {
                    continue;
                }
                return Err(format!("command '{command}' timed out after {timeout:?}"));
            }
        }
    }
}

const MAX_OUTPUT_BYTES: usize = 1024 * 1024;

pub struct RecoveryController {
    strategies: Vec<RecoveryStrategy>,
    snapshot: Arc<std::sync::RwLock<RecoverySnapshot>>,
    restart_count: AtomicU32,
    concurrency: Arc<Semaphore>,
    audit: AuditLogger,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl RecoveryController {
    /// `max_concurrent_recoveries` bounds how many recovery runs may execute
    /// at once; additional `trigger()` calls block until a slot frees.
    pub fn new(
        mut strategies: Vec<RecoveryStrategy>,
        max_concurrent_recoveries: usize,
        audit: AuditLogger,
    ) -> Self {
        strategies.sort_by_key(|s| s.priority);
        Self {
            strategies,
            snapshot: Arc::new(std::sync::RwLock::new(RecoverySnapshot::default())),
            restart_count: AtomicU32::new(0),
            concurrency: Arc::new(Semaphore::new(max_concurrent_recoveries.max(1))),
            audit,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn update_snapshot(&self, mut snapshot: RecoverySnapshot) {
        snapshot.restart_count = self.restart_count.load(Ordering::Acquire);
        *self
            .snapshot
            .write()
            .expect("recovery snapshot lock poisoned") = snapshot;
    }

    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Selects the first (lowest-priority-number) strategy whose condition
    /// matches the current snapshot, runs its actions in order, waits out
    /// the stabilization delay, then re-checks health to record an outcome.
    pub async fn trigger(&self) {
        let _permit = match self.concurrency.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => return,
        };

        let snapshot = self
            .snapshot
            .read()
            .expect("recovery snapshot lock poisoned")
            .clone();

        let Some(strategy) = self
            .strategies
            .iter()
            .find(|s| condition_matches(&s.condition, &snapshot))
        else {
            tracing::warn!("recovery triggered but no strategy condition matched");
            return;
        };

        tracing::warn!(strategy = %strategy.name, "executing recovery strategy");
        let mut all_ok = true;
        for action in &strategy.actions {
            let outcome = self.execute_action(action).await;
            if outcome.is_err() {
                all_ok = false;
            }
            if matches!(action.kind, RecoveryActionKind::RestartContainer | RecoveryActionKind::RecreateContainer) {
                self.restart_count.fetch_add(1, Ordering::AcqRel);
            }
        }

        tokio::time::sleep(strategy.stabilization_delay).await;

        let healthy_after = self
            .snapshot
            .read()
            .expect("recovery snapshot lock poisoned")
            .health_status
            .map(|s| matches!(s, HealthStatus::Healthy))
            .unwrap_or(false);

        if all_ok && healthy_after {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        self.audit
            .log_with_source(
                AuditEventKind::RecoveryExecuted,
                if all_ok { AuditSeverity::Notice } else { AuditSeverity::Error },
                AuditSource {
                    subject: Some(strategy.name.clone()),
                    ..Default::default()
                },
            )
            .await;
    }

    async fn execute_action(&self, action: &RecoveryAction) -> Result<(), String> {
        match action.kind {
            RecoveryActionKind::NotifyOperator => {
                tracing::error!(message = ?action.command, "recovery: notify operator");
                Ok(())
            }
            _ => {
                let Some(command) = action.command.as_deref() else {
                    return Ok(());
                };
                match run_command(command, &action.args, action.timeout, MAX_OUTPUT_BYTES).await {
                    Ok(output) => {
                        tracing::info!(kind = ?action.kind, %output, "recovery action completed");
                        Ok(())
                    }
                    Err(message) => {
                        tracing::error!(kind = ?action.kind, %message, "recovery action failed");
                        Err(message)
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditAgent, AuditConfig};
    use acton_reactive::prelude::*;

    async fn test_logger() -> AuditLogger {
        let mut runtime = ActonApp::launch();
        let (handle, buffer) = AuditAgent::spawn(&mut runtime, AuditConfig::default(), "test".into())
            .await
            .expect("audit agent spawns");
        AuditLogger::new(handle, buffer, "test".into(), AuditConfig::default())
    }

    #[test]
    fn condition_matches_requires_all_clauses() {
        let condition = RecoveryCondition {
            max_health_status: Some(HealthStatus::Unhealthy),
            min_restart_count: Some(1),
            ..Default::default()
        };
        let mut snapshot = RecoverySnapshot {
            health_status: Some(HealthStatus::Unhealthy),
            restart_count: 0,
            ..Default::default()
        };
        assert!(!condition_matches(&condition, &snapshot));
        snapshot.restart_count = 1;
        assert!(condition_matches(&condition, &snapshot));
    }

    #[tokio::test]
    async fn trigger_with_no_matching_strategy_is_a_noop() {
        let audit = test_logger().await;
        let controller = RecoveryController::new(vec![], 1, audit);
        controller.trigger().await;
        assert_eq!(controller.successes(), 0);
        assert_eq!(controller.failures(), 0);
    }

    #[tokio::test]
    async fn trigger_runs_matching_strategy_and_counts_restart() {
        let audit = test_logger().await;
        let strategy = RecoveryStrategy {
            name: "notify-only".to_string(),
            priority: 0,
            condition: RecoveryCondition::default(),
            actions: vec![RecoveryAction {
                kind: RecoveryActionKind::NotifyOperator,
                command: Some("unhealthy service".to_string()),
                args: vec![],
                timeout: Duration::from_secs(1),
            }],
            stabilization_delay: Duration::from_millis(1),
        };
        let controller = RecoveryController::new(vec![strategy], 1, audit);
        controller.update_snapshot(RecoverySnapshot {
            health_status: Some(HealthStatus::Unhealthy),
            ..Default::default()
        });
        controller.trigger().await;
        assert_eq!(controller.restart_count.load(Ordering::Relaxed), 0);
        assert_eq!(controller.failures(), 1);
    }
}
