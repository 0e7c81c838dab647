//! Immutable, in-memory audit logging
//!
//! Provides tamper-evident audit trails using BLAKE3 hash chaining. There is
//! no durable store and no SIEM export in this build — the trail lives for
//! the lifetime of the process in a bounded ring buffer, inspected through
//! the admin API's audit-trail endpoint.
//!
//! # Architecture
//!
//! An acton-reactive actor (`AuditAgent`) processes all audit events
//! sequentially, guaranteeing correct hash-chain ordering. The proxy
//! pipeline, token codec, policy engine, resilience layer, and config
//! manager send events via fire-and-forget message passing through
//! `AuditLogger`, so audit logging never blocks request handling.

pub mod agent;
pub mod chain;
pub mod config;
pub mod event;
pub mod logger;
pub mod middleware;

pub use agent::{AuditAgent, AuditBuffer};
pub use chain::{verify_chain, AuditChain, ChainVerificationError};
pub use config::AuditConfig;
pub use event::{AuditEvent, AuditEventKind, AuditSeverity, AuditSource};
pub use logger::AuditLogger;
pub use middleware::{audit_layer, AuditRoute};
