//! Watchdog (§4.11): periodically confirms aggregate health and triggers
//! recovery once the service has been unhealthy for a sustained run of
//! consecutive intervals, rather than on a single blip.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::health_registry::{HealthRegistry, HealthStatus};
use super::recovery::RecoveryController;
use crate::audit::{AuditEventKind, AuditLogger, AuditSeverity, AuditSource};

#[derive(Debug, Clone, Copy)]
pub struct WatchdogConfig {
    pub poll_interval: Duration,
    /// Consecutive unhealthy polls required before recovery triggers.
    pub failure_threshold: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            failure_threshold: 3,
        }
    }
}

pub struct Watchdog {
    config: WatchdogConfig,
    registry: Arc<HealthRegistry>,
    recovery: Arc<RecoveryController>,
    audit: AuditLogger,
}

impl Watchdog {
    pub fn new(
        config: WatchdogConfig,
        registry: Arc<HealthRegistry>,
        recovery: Arc<RecoveryController>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            config,
            registry,
            recovery,
            audit,
        }
    }

    /// Runs the polling loop until `token` is cancelled. Intended to be
    /// spawned as its own task by the binary's startup sequence.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        let mut consecutive_unhealthy: u32 = 0;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    match self.registry.aggregate() {
                        HealthStatus::Unhealthy => {
                            consecutive_unhealthy += 1;
                            tracing::warn!(consecutive_unhealthy, "watchdog observed unhealthy aggregate status");
                            if consecutive_unhealthy >= self.config.failure_threshold {
                                self.audit
                                    .log_with_source(
                                        AuditEventKind::Custom("recovery.triggered".to_string()),
                                        AuditSeverity::Error,
                                        AuditSource {
                                            subject: Some("watchdog".into()),
                                            ..Default::default()
                                        },
                                    )
                                    .await;
                                self.recovery.trigger().await;
                                consecutive_unhealthy = 0;
                            }
                        }
                        _ => {
                            consecutive_unhealthy = 0;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_defaults() {
        let config = WatchdogConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.poll_interval, Duration::from_secs(10));
    }
}
