//! Audit logger — thin public API wrapper around the agent handle
//!
//! `AuditLogger` provides a fire-and-forget API for emitting audit events.
//! Events are sent to the `AuditAgent` via `ActorHandle::send()` (non-blocking),
//! so audit logging never blocks request handling. Reads go straight to the
//! shared in-memory buffer the agent maintains, bypassing messaging the same
//! way the degradation controller's `is_essential()` does.

use acton_reactive::prelude::{ActorHandle, ActorHandleInterface};

use super::agent::AuditBuffer;
use super::config::AuditConfig;
use super::event::{AuditEvent, AuditEventKind, AuditSeverity, AuditSource};

/// Audit logger for emitting events to the audit trail and reading recent ones
///
/// This is a thin wrapper around the `AuditAgent`'s actor handle plus a
/// handle to its shared ring buffer. All write methods are fire-and-forget —
/// they send a message to the agent and return immediately without waiting
/// for the event to be sealed.
///
/// Available via `state.audit_logger()`.
#[derive(Clone)]
pub struct AuditLogger {
    handle: ActorHandle,
    buffer: AuditBuffer,
    service_name: String,
    config: AuditConfig,
}

impl AuditLogger {
    /// Create a new audit logger wrapping the given agent handle and buffer
    pub fn new(
        handle: ActorHandle,
        buffer: AuditBuffer,
        service_name: String,
        config: AuditConfig,
    ) -> Self {
        Self {
            handle,
            buffer,
            service_name,
            config,
        }
    }

    /// Get the audit configuration
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Log an audit event (fire-and-forget)
    pub async fn log(&self, event: AuditEvent) {
        if !self.config.enabled {
            return;
        }
        let _ = self.handle.send(event).await;
    }

    /// Log an event carrying source information (agent id, tool, correlation id)
    pub async fn log_with_source(
        &self,
        kind: AuditEventKind,
        severity: AuditSeverity,
        source: AuditSource,
    ) {
        let event = AuditEvent::new(kind, severity, self.service_name.clone()).with_source(source);
        self.log(event).await;
    }

    /// Log a custom event
    pub async fn log_custom(
        &self,
        name: &str,
        severity: AuditSeverity,
        metadata: Option<serde_json::Value>,
    ) {
        let mut event = AuditEvent::new(
            AuditEventKind::Custom(name.to_string()),
            severity,
            self.service_name.clone(),
        );
        event.metadata = metadata;
        self.log(event).await;
    }

    /// Get the service name
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Return the most recent `limit` sealed events, newest first
    ///
    /// Used by the admin API's audit-trail endpoint. Synchronous — this
    /// reads the shared buffer directly rather than round-tripping through
    /// the actor.
    pub fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        match self.buffer.read() {
            Ok(buf) => buf.iter().rev().take(limit).cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    /// Verify the integrity of the currently buffered chain segment
    ///
    /// This only covers events still held in the bounded in-memory buffer;
    /// events evicted by the ring buffer are no longer verifiable since
    /// there is no durable store in this build.
    pub fn verify_buffered_chain(&self) -> Result<(), super::chain::ChainVerificationError> {
        let buf = match self.buffer.read() {
            Ok(buf) => buf,
            Err(_) => return Ok(()),
        };
        let events: Vec<AuditEvent> = buf.iter().cloned().collect();
        super::chain::verify_chain(&events)
    }
}
