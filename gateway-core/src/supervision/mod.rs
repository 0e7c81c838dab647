//! Supervision subsystem (§4.11): health checks, a watchdog that escalates
//! sustained failures into recovery, a recovery controller that runs scripted
//! remediation, and a graceful-degradation controller the proxy pipeline
//! consults before admitting non-essential work.

pub mod degradation;
pub mod health_registry;
pub mod recovery;
pub mod watchdog;

pub use degradation::{DegradationController, DegradationLevel};
pub use health_registry::{CheckResult, CheckSpec, CheckType, HealthCheck, HealthRegistry, HealthStatus};
pub use recovery::{
    RecoveryAction, RecoveryActionKind, RecoveryCondition, RecoveryController, RecoverySnapshot,
    RecoveryStrategy,
};
pub use watchdog::{Watchdog, WatchdogConfig};
