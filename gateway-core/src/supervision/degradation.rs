//! Graceful degradation controller (§4.11). Levels `0..3`; transitions are
//! driven by resource metrics and error rates observed elsewhere and applied
//! here via [`DegradationController::set_level`]. Feature availability is
//! queried by name; unknown features default to "essential" so a typo never
//! silently disables a request path.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::RwLock;

use crate::audit::{AuditEventKind, AuditLogger, AuditSeverity, AuditSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum DegradationLevel {
    Normal = 0,
    DisableCaches = 1,
    DisableNonEssential = 2,
    HealthOnly = 3,
}

impl DegradationLevel {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Normal,
            1 => Self::DisableCaches,
            2 => Self::DisableNonEssential,
            _ => Self::HealthOnly,
        }
    }
}

/// Read-mostly: `level()` is a single atomic load; `is_essential` takes a
/// read lock over the declared non-essential feature set (§5).
pub struct DegradationController {
    level: AtomicU8,
    non_essential: RwLock<HashSet<String>>,
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new()
    }
}

impl DegradationController {
    pub fn new() -> Self {
        Self {
            level: AtomicU8::new(0),
            non_essential: RwLock::new(HashSet::new()),
        }
    }

    /// A component declares a feature name as non-essential, opting it out
    /// of service at level ≥ 2 (§4.11: "must be declared by the component").
    pub fn declare_non_essential(&self, feature: impl Into<String>) {
        self.non_essential
            .write()
            .expect("degradation feature set poisoned")
            .insert(feature.into());
    }

    pub fn level(&self) -> u8 {
        self.level.load(Ordering::Acquire)
    }

    pub fn current(&self) -> DegradationLevel {
        DegradationLevel::from_u8(self.level())
    }

    /// Unknown features default to essential (enabled) per §4.11.
    pub fn is_essential(&self, feature: &str) -> bool {
        let declared = self
            .non_essential
            .read()
            .expect("degradation feature set poisoned");
        !declared.contains(feature)
    }

    /// Whether caches should be bypassed at the current level (level ≥ 1).
    pub fn caches_disabled(&self) -> bool {
        self.level() >= 1
    }

    /// Whether only health endpoints may serve (level ≥ 3).
    pub fn health_only(&self) -> bool {
        self.level() >= 3
    }

    pub async fn set_level(&self, level: DegradationLevel, audit: &AuditLogger) {
        let previous = self.level.swap(level as u8, Ordering::AcqRel);
        if previous == level as u8 {
            return;
        }
        tracing::warn!(previous, new = level as u8, "degradation level changed");
        let kind = if (level as u8) > previous {
            AuditEventKind::FeatureDegraded
        } else {
            AuditEventKind::FeatureRestored
        };
        audit
            .log_with_source(
                kind,
                AuditSeverity::Warning,
                AuditSource {
                    subject: Some("degradation_controller".into()),
                    ..Default::default()
                },
            )
            .await;
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
    fn unknown_feature_defaults_essential() {
        let controller = DegradationController::new();
        assert!(controller.is_essential("anything"));
    }

    #[test]
    fn declared_feature_becomes_non_essential() {
        let controller = DegradationController::new();
        controller.declare_non_essential("response_cache");
        assert!(!controller.is_essential("response_cache"));
    }

    #[tokio::test]
    async fn set_level_updates_atomic_and_logs() {
        let controller = DegradationController::new();
        let audit = test_logger().await;
        controller.set_level(DegradationLevel::DisableNonEssential, &audit).await;
        assert_eq!(controller.level(), 2);
        assert!(controller.caches_disabled());
    }
}
