//! Audit agent (acton-reactive actor)
//!
//! The `AuditAgent` owns the BLAKE3 hash chain state and processes events
//! sequentially, guaranteeing correct chain ordering. Sealed events are kept
//! in a bounded in-memory ring buffer queried by the admin API — there is no
//! durable store or external export in this build.

use acton_reactive::prelude::*;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use super::chain::AuditChain;
use super::config::AuditConfig;
use super::event::AuditEvent;

/// Shared, lock-protected ring buffer of sealed events.
///
/// The buffer is shared between the actor (which appends under the
/// sequential guarantee of message processing) and `AuditLogger` /
/// admin handlers (which read a snapshot synchronously, mirroring how
/// the degradation controller exposes `is_essential()` outside the
/// messaging path).
pub type AuditBuffer = Arc<RwLock<VecDeque<AuditEvent>>>;

/// State held by the audit agent actor
pub struct AuditAgentState {
    /// BLAKE3 hash chain state
    pub chain: Option<AuditChain>,
    /// Audit configuration
    pub config: Option<AuditConfig>,
    /// Bounded ring buffer of sealed events, most recent last
    pub buffer: AuditBuffer,
}

impl Default for AuditAgentState {
    fn default() -> Self {
        Self {
            chain: None,
            config: None,
            buffer: Arc::new(RwLock::new(VecDeque::new())),
        }
    }
}

impl std::fmt::Debug for AuditAgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditAgentState")
            .field("chain", &self.chain.is_some())
            .field("config", &self.config.is_some())
            .field(
                "buffered",
                &self.buffer.read().map(|b| b.len()).unwrap_or(0),
            )
            .finish()
    }
}

/// Audit agent that manages the immutable, in-memory audit trail
///
/// Spawned once at startup alongside the other supervision agents. Emitters
/// (the proxy pipeline, token codec, policy engine, config manager) send
/// `AuditEvent`s via fire-and-forget message passing, so audit logging never
/// blocks request handling.
pub struct AuditAgent;

impl AuditAgent {
    /// Spawn the audit agent with a fresh hash chain.
    ///
    /// Returns the actor handle (for sending events) together with the
    /// shared buffer (for synchronous reads from `AuditLogger::recent`).
    pub async fn spawn(
        runtime: &mut ActorRuntime,
        config: AuditConfig,
        service_name: String,
    ) -> anyhow::Result<(ActorHandle, AuditBuffer)> {
        let mut agent = runtime.new_actor::<AuditAgentState>();

        let max_buffered = config.max_buffered_events;
        let buffer: AuditBuffer = Arc::new(RwLock::new(VecDeque::with_capacity(
            max_buffered.min(1024),
        )));

        agent.model.config = Some(config);
        agent.model.chain = Some(AuditChain::new(service_name));
        agent.model.buffer = buffer.clone();

        agent.mutate_on::<AuditEvent>(move |agent, envelope| {
            let event = envelope.message().clone();

            let sealed_event = if let Some(ref mut chain) = agent.model.chain {
                chain.seal(event)
            } else {
                tracing::warn!("audit chain not initialized, dropping event");
                return Reply::ready();
            };

            tracing::debug!(
                kind = %sealed_event.kind,
                sequence = sealed_event.sequence,
                "audit event sealed"
            );

            if let Ok(mut buf) = agent.model.buffer.write() {
                buf.push_back(sealed_event);
                while buf.len() > max_buffered {
                    buf.pop_front();
                }
            }

            Reply::ready()
        });

        let handle = agent.start().await;
        Ok((handle, buffer))
    }
}
