//! In-memory registry backing every entity in §3, behind a [`Registry`]
//! trait so a durable backend can be swapped in later without touching the
//! policy engine or proxy pipeline (the core's Non-goals only require the
//! *seam*, not a durable implementation).

mod entities;

pub use entities::*;

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Storage seam for everything the proxy pipeline and admin API touch.
///
/// Default methods are synchronous because the in-memory implementation
/// never suspends; a durable backend implementing this trait directly
/// would need `async-trait` or a blocking adapter, which is an explicit
/// non-goal for this core.
pub trait Registry: Send + Sync {
    fn create_agent(&self, agent: Agent) -> Result<()>;
    fn get_agent(&self, id: Uuid) -> Option<Agent>;
    fn list_agents(&self) -> Vec<Agent>;
    fn update_agent_status(&self, id: Uuid, status: AgentStatus) -> Result<()>;
    fn delete_agent(&self, id: Uuid) -> Result<()>;

    fn put_credential(&self, cred: ToolCredential) -> Result<()>;
    fn active_credential(&self, tool: Tool) -> Option<ToolCredential>;
    fn revoke_credential(&self, tool: Tool) -> Result<()>;

    fn register_token(&self, entry: TokenRegistryEntry) -> Result<()>;
    fn get_token_entry(&self, token_id: Uuid) -> Option<TokenRegistryEntry>;
    fn revoke_token(&self, token_id: Uuid) -> Result<()>;

    fn put_policy_assignment(&self, assignment: PolicyAssignment) -> Result<()>;
    fn delete_policy_assignment(&self, id: Uuid) -> Result<()>;
    fn policies_for_agent(&self, agent_id: Uuid) -> Vec<PolicySpec>;
    fn policies_for_role(&self, role: &str) -> Vec<PolicySpec>;
    fn list_policy_assignments(&self) -> Vec<PolicyAssignment>;

    /// Fetch-or-create the counter for `key`, apply `f`, and persist the
    /// result. `f` returns `Ok(())` to accept the increment or an error to
    /// reject it (e.g. `quota_exceeded`) — in which case the counter is
    /// left untouched.
    fn with_quota_counter(
        &self,
        key: &str,
        f: &mut dyn FnMut(&mut QuotaCounter) -> Result<()>,
    ) -> Result<()>;

    fn append_request_log(&self, log: RequestLog) -> Result<()>;
    fn recent_request_logs(&self, limit: usize) -> Vec<RequestLog>;
}

/// Default in-process backend. Every collection is a [`DashMap`] so reads
/// and writes from concurrently executing request tasks never block on a
/// single global lock (§5).
#[derive(Default)]
pub struct InMemoryRegistry {
    agents: DashMap<Uuid, Agent>,
    credentials: DashMap<Tool, ToolCredential>,
    tokens: DashMap<Uuid, TokenRegistryEntry>,
    policies: DashMap<Uuid, PolicyAssignment>,
    quota_counters: DashMap<String, QuotaCounter>,
    request_logs: parking::Mutex<Vec<RequestLog>>,
    request_log_cap: usize,
}

/// A tiny `std::sync::Mutex` re-export under a project-local name so the
/// intent (bounded ring buffer, not a hot path) reads clearly at call
/// sites.
mod parking {
    pub use std::sync::Mutex;
}

impl InMemoryRegistry {
    pub fn new(request_log_cap: usize) -> Self {
        Self {
            request_log_cap,
            ..Default::default()
        }
    }

    pub fn new_shared(request_log_cap: usize) -> Arc<dyn Registry> {
        Arc::new(Self::new(request_log_cap))
    }
}

impl Registry for InMemoryRegistry {
    fn create_agent(&self, agent: Agent) -> Result<()> {
        if self.agents.contains_key(&agent.id) {
            return Err(Error::Conflict("agent id already exists".into()));
        }
        self.agents.insert(agent.id, agent);
        Ok(())
    }

    fn get_agent(&self, id: Uuid) -> Option<Agent> {
        self.agents.get(&id).map(|a| a.clone())
    }

    fn list_agents(&self) -> Vec<Agent> {
        self.agents.iter().map(|e| e.value().clone()).collect()
    }

    fn update_agent_status(&self, id: Uuid, status: AgentStatus) -> Result<()> {
        let mut entry = self
            .agents
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("agent {id}")))?;
        entry.status = status;
        Ok(())
    }

    fn delete_agent(&self, id: Uuid) -> Result<()> {
        self.agents
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("agent {id}")))
    }

    fn put_credential(&self, cred: ToolCredential) -> Result<()> {
        self.credentials.insert(cred.tool, cred);
        Ok(())
    }

    fn active_credential(&self, tool: Tool) -> Option<ToolCredential> {
        self.credentials
            .get(&tool)
            .map(|c| c.clone())
            .filter(|c| c.is_active())
    }

    fn revoke_credential(&self, tool: Tool) -> Result<()> {
        let mut entry = self
            .credentials
            .get_mut(&tool)
            .ok_or_else(|| Error::NotFound(format!("credential for {}", tool.as_str())))?;
        entry.revoked_at = Some(Utc::now());
        Ok(())
    }

    fn register_token(&self, entry: TokenRegistryEntry) -> Result<()> {
        self.tokens.insert(entry.token_id, entry);
        Ok(())
    }

    fn get_token_entry(&self, token_id: Uuid) -> Option<TokenRegistryEntry> {
        self.tokens.get(&token_id).map(|e| e.clone())
    }

    fn revoke_token(&self, token_id: Uuid) -> Result<()> {
        let mut entry = self
            .tokens
            .get_mut(&token_id)
            .ok_or_else(|| Error::NotFound(format!("token {token_id}")))?;
        entry.is_revoked = true;
        Ok(())
    }

    fn put_policy_assignment(&self, assignment: PolicyAssignment) -> Result<()> {
        self.policies.insert(assignment.id, assignment);
        Ok(())
    }

    fn delete_policy_assignment(&self, id: Uuid) -> Result<()> {
        self.policies
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("policy assignment {id}")))
    }

    fn policies_for_agent(&self, agent_id: Uuid) -> Vec<PolicySpec> {
        self.policies
            .iter()
            .filter_map(|e| match &e.value().target {
                PolicyTarget::Agent(id) if *id == agent_id => Some(e.value().spec.clone()),
                _ => None,
            })
            .collect()
    }

    fn policies_for_role(&self, role: &str) -> Vec<PolicySpec> {
        self.policies
            .iter()
            .filter_map(|e| match &e.value().target {
                PolicyTarget::Role(r) if r == role => Some(e.value().spec.clone()),
                _ => None,
            })
            .collect()
    }

    fn list_policy_assignments(&self) -> Vec<PolicyAssignment> {
        self.policies.iter().map(|e| e.value().clone()).collect()
    }

    fn with_quota_counter(
        &self,
        key: &str,
        f: &mut dyn FnMut(&mut QuotaCounter) -> Result<()>,
    ) -> Result<()> {
        let mut entry = self.quota_counters.entry(key.to_string()).or_default();
        f(&mut entry)
    }

    fn append_request_log(&self, log: RequestLog) -> Result<()> {
        let mut logs = self.request_logs.lock().expect("request log mutex poisoned");
        logs.push(log);
        if logs.len() > self.request_log_cap {
            let overflow = logs.len() - self.request_log_cap;
            logs.drain(0..overflow);
        }
        Ok(())
    }

    fn recent_request_logs(&self, limit: usize) -> Vec<RequestLog> {
        let logs = self.request_logs.lock().expect("request log mutex poisoned");
        logs.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn agent(id: Uuid) -> Agent {
        Agent {
            id,
            name: "test-agent".into(),
            created_by: "admin".into(),
            role: "default".into(),
            public_key: vec![1, 2, 3],
            status: AgentStatus::Active,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn create_and_fetch_agent() {
        let registry = InMemoryRegistry::new(100);
        let id = Uuid::new_v4();
        registry.create_agent(agent(id)).unwrap();
        assert_eq!(registry.get_agent(id).unwrap().id, id);
    }

    #[test]
    fn duplicate_agent_id_conflicts() {
        let registry = InMemoryRegistry::new(100);
        let id = Uuid::new_v4();
        registry.create_agent(agent(id)).unwrap();
        assert!(registry.create_agent(agent(id)).is_err());
    }

    #[test]
    fn request_log_ring_buffer_caps_at_limit() {
        let registry = InMemoryRegistry::new(3);
        for i in 0..5 {
            registry
                .append_request_log(RequestLog {
                    corr_id: format!("corr-{i}"),
                    agent_id: Uuid::new_v4(),
                    tool: "search".into(),
                    action: "query".into(),
                    response_time_ms: 10,
                    status_code: 200,
                    success: true,
                    error_message: None,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let logs = registry.recent_request_logs(10);
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].corr_id, "corr-4");
    }

    #[test]
    fn quota_counter_rejects_over_limit() {
        let registry = InMemoryRegistry::new(100);
        for _ in 0..3 {
            registry
                .with_quota_counter("search:query:2026-07-29", &mut |c| {
                    if c.count >= 3 {
                        return Err(Error::QuotaExceeded("limit reached".into()));
                    }
                    c.count += 1;
                    Ok(())
                })
                .unwrap();
        }
        let result = registry.with_quota_counter("search:query:2026-07-29", &mut |c| {
            if c.count >= 3 {
                return Err(Error::QuotaExceeded("limit reached".into()));
            }
            c.count += 1;
            Ok(())
        });
        assert!(result.is_err());
    }

    #[test]
    fn policy_lookup_separates_agent_and_role_assignments() {
        let registry = InMemoryRegistry::new(100);
        let agent_id = Uuid::new_v4();
        let spec = PolicySpec {
            scopes: HashSet::from(["search:query".to_string()]),
            intent: None,
            guards: Guards::default(),
            quotas: vec![],
            schedule: None,
            response_filters: ResponseFilters::default(),
        };
        registry
            .put_policy_assignment(PolicyAssignment {
                id: Uuid::new_v4(),
                target: PolicyTarget::Agent(agent_id),
                spec: spec.clone(),
            })
            .unwrap();
        registry
            .put_policy_assignment(PolicyAssignment {
                id: Uuid::new_v4(),
                target: PolicyTarget::Role("support".to_string()),
                spec,
            })
            .unwrap();

        assert_eq!(registry.policies_for_agent(agent_id).len(), 1);
        assert_eq!(registry.policies_for_role("support").len(), 1);
        assert_eq!(registry.policies_for_role("other").len(), 0);
    }
}
