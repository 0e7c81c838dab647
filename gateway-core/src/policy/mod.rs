//! Policy merge, evaluation, and response filtering (§4.2).

mod filters;
mod quota_key;

pub use filters::apply_response_filters;
pub use quota_key::quota_key;

use chrono::{DateTime, Datelike, Timelike, Utc};
use chrono_tz::Tz;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

use crate::registry::{Guards, PolicySpec, Quota, Registry, ResetStrategy, ResponseFilters, Schedule};

/// The outcome of evaluating a merged policy against one call (§4.2).
#[derive(Debug, Clone)]
pub enum Decision {
    Allow {
        response_filters: ResponseFilters,
        quota_info: Vec<QuotaInfo>,
        /// Provisional quota increments made during this evaluation, to be
        /// committed permanently on adapter success or rolled back with
        /// [`release_quotas`] if the call fails anywhere downstream of
        /// policy (§4.2 step 4: "increment on success only").
        quota_commits: Vec<QuotaCommit>,
    },
    Deny {
        reason: DenyReason,
        detail: String,
    },
}

/// One provisional quota increment made by [`evaluate`], enough to undo it
/// later without re-deriving the window key.
#[derive(Debug, Clone)]
pub struct QuotaCommit {
    pub key: String,
    pub reset_strategy: ResetStrategy,
    pub timestamp: DateTime<Utc>,
}

/// Rolls back the provisional increments from a [`Decision::Allow`] whose
/// request ultimately failed after policy ran (rate limit, unconfigured
/// tool, degradation, adapter failure). The hard per-window bound is still
/// enforced atomically inside `evaluate`'s `with_quota_counter` call; this
/// only undoes increments for calls that never actually succeeded.
pub fn release_quotas(registry: &Arc<dyn Registry>, commits: &[QuotaCommit]) {
    for commit in commits {
        let _ = registry.with_quota_counter(&commit.key, &mut |counter| {
            match commit.reset_strategy {
                ResetStrategy::Sliding => {
                    if let Some(pos) = counter.timestamps.iter().position(|ts| *ts == commit.timestamp) {
                        counter.timestamps.remove(pos);
                    }
                }
                ResetStrategy::Fixed => {
                    counter.count = counter.count.saturating_sub(1);
                }
            }
            Ok(())
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    OutOfScope,
    OutOfSchedule,
    GuardViolated,
    QuotaExceeded,
}

impl DenyReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DenyReason::OutOfScope => "out_of_scope",
            DenyReason::OutOfSchedule => "out_of_schedule",
            DenyReason::GuardViolated => "guard_violated",
            DenyReason::QuotaExceeded => "quota_exceeded",
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuotaInfo {
    pub action: String,
    pub limit: u64,
    pub used: u64,
}

/// Gathers every [`PolicySpec`] that applies to `agent_id`/`role` (§4.2 `resolve`).
pub fn resolve(registry: &Arc<dyn Registry>, agent_id: Uuid, role: &str) -> Vec<PolicySpec> {
    let mut specs = registry.policies_for_agent(agent_id);
    specs.extend(registry.policies_for_role(role));
    specs
}

/// Merges multiple specs into one, per the conservative rules in §4.2:
/// union of scopes, tightest guard bounds, concatenated quotas (deduped to
/// the lowest limit per `(action, window)`), intersected schedule,
/// concatenated response filters.
pub fn merge(specs: Vec<PolicySpec>) -> PolicySpec {
    let mut merged = PolicySpec {
        scopes: HashSet::new(),
        intent: None,
        guards: Guards::default(),
        quotas: Vec::new(),
        schedule: None,
        response_filters: ResponseFilters::default(),
    };

    let mut allowed_domains: Option<HashSet<String>> = None;
    let mut blocked_domains: HashSet<String> = HashSet::new();
    let mut pii_filters: HashSet<String> = HashSet::new();
    let mut schedules: Vec<Schedule> = Vec::new();
    let mut redact: HashSet<String> = HashSet::new();
    let mut truncate = Vec::new();
    let mut block_patterns: HashSet<String> = HashSet::new();

    for spec in specs {
        merged.scopes.extend(spec.scopes);
        if merged.intent.is_none() {
            merged.intent = spec.intent;
        }

        if let Some(max) = spec.guards.max_request_size {
            merged.guards.max_request_size =
                Some(merged.guards.max_request_size.map_or(max, |cur| cur.min(max)));
        }
        if let Some(max) = spec.guards.max_response_size {
            merged.guards.max_response_size =
                Some(merged.guards.max_response_size.map_or(max, |cur| cur.min(max)));
        }
        if let Some(allow) = spec.guards.allowed_domains {
            allowed_domains = Some(match allowed_domains {
                Some(existing) => existing.intersection(&allow).cloned().collect(),
                None => allow,
            });
        }
        if let Some(block) = spec.guards.blocked_domains {
            blocked_domains.extend(block);
        }
        if let Some(pii) = spec.guards.pii_filters {
            pii_filters.extend(pii);
        }
        if let Some(window) = spec.guards.time_window {
            merged.guards.time_window = Some(window);
        }

        merged.quotas.extend(spec.quotas);

        if let Some(schedule) = spec.schedule {
            schedules.push(schedule);
        }

        if let Some(fields) = spec.response_filters.redact_fields {
            redact.extend(fields);
        }
        if let Some(fields) = spec.response_filters.truncate_fields {
            truncate.extend(fields);
        }
        if let Some(patterns) = spec.response_filters.block_patterns {
            block_patterns.extend(patterns);
        }
    }

    merged.guards.allowed_domains = allowed_domains;
    merged.guards.blocked_domains = (!blocked_domains.is_empty()).then_some(blocked_domains);
    merged.guards.pii_filters = (!pii_filters.is_empty()).then_some(pii_filters.into_iter().collect());
    merged.quotas = dedupe_quotas_to_lowest_limit(merged.quotas);
    merged.schedule = intersect_schedules(schedules);
    merged.response_filters = ResponseFilters {
        redact_fields: (!redact.is_empty()).then_some(redact.into_iter().collect()),
        truncate_fields: (!truncate.is_empty()).then_some(truncate),
        block_patterns: (!block_patterns.is_empty()).then_some(block_patterns.into_iter().collect()),
    };

    merged
}

/// When multiple specs contribute quotas with the same `(action, window)`,
/// the lower `limit` wins (§4.2 tie-break).
fn dedupe_quotas_to_lowest_limit(quotas: Vec<Quota>) -> Vec<Quota> {
    use std::collections::HashMap;
    let mut by_key: HashMap<(String, &'static str), Quota> = HashMap::new();
    for q in quotas {
        let key = (q.action.clone(), window_key(q.window));
        by_key
            .entry(key)
            .and_modify(|existing| {
                if q.limit < existing.limit {
                    *existing = q.clone();
                }
            })
            .or_insert(q);
    }
    by_key.into_values().collect()
}

fn window_key(window: crate::registry::QuotaWindow) -> &'static str {
    use crate::registry::QuotaWindow::*;
    match window {
        OneHour => "1h",
        TwentyFourHours => "24h",
        SevenDays => "7d",
    }
}

/// If any assignment disables the schedule, or their allowed-day/allowed-hour
/// sets don't overlap, the combined schedule becomes maximally restrictive
/// (§4.2: "if any assignment disables or excludes an hour/day, the request
/// is disallowed").
fn intersect_schedules(schedules: Vec<Schedule>) -> Option<Schedule> {
    if schedules.is_empty() {
        return None;
    }
    let mut iter = schedules.into_iter();
    let mut acc = iter.next().unwrap();
    for s in iter {
        acc.enabled = acc.enabled && s.enabled;
        acc.allowed_days = match (acc.allowed_days.take(), s.allowed_days) {
            (Some(a), Some(b)) => Some(a.intersection(&b).cloned().collect()),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
        acc.allowed_hours = match (acc.allowed_hours, s.allowed_hours) {
            (Some(a), Some(b)) => Some(crate::registry::HourRange {
                start: a.start.max(b.start),
                end: a.end.min(b.end),
            }),
            (Some(a), None) => Some(a),
            (None, Some(b)) => Some(b),
            (None, None) => None,
        };
    }
    Some(acc)
}

/// Evaluates a merged spec against one call, in the order specified by §4.2.
pub fn evaluate(
    registry: &Arc<dyn Registry>,
    merged: &PolicySpec,
    agent_id: Uuid,
    tool: &str,
    action: &str,
    params: &Value,
    target_host: Option<&str>,
    now: DateTime<Utc>,
    default_timezone: &str,
) -> Decision {
    let scope = format!("{tool}:{action}");
    if !merged.scopes.contains(&scope) {
        return Decision::Deny {
            reason: DenyReason::OutOfScope,
            detail: format!("scope '{scope}' not granted"),
        };
    }

    if let Some(schedule) = &merged.schedule {
        if !schedule_allows(schedule, now, default_timezone) {
            return Decision::Deny {
                reason: DenyReason::OutOfSchedule,
                detail: "outside allowed schedule window".into(),
            };
        }
    }

    if let Some(host) = target_host {
        if let Some(blocked) = &merged.guards.blocked_domains {
            if blocked.iter().any(|suffix| domain_matches(host, suffix)) {
                return Decision::Deny {
                    reason: DenyReason::GuardViolated,
                    detail: format!("domain '{host}' is blocked"),
                };
            }
        }
        if let Some(allowed) = &merged.guards.allowed_domains {
            if !allowed.iter().any(|suffix| domain_matches(host, suffix)) {
                return Decision::Deny {
                    reason: DenyReason::GuardViolated,
                    detail: format!("domain '{host}' is not allow-listed"),
                };
            }
        }
    }

    if let Some(max) = merged.guards.max_request_size {
        let serialized = serde_json::to_vec(params).unwrap_or_default();
        if serialized.len() > max {
            return Decision::Deny {
                reason: DenyReason::GuardViolated,
                detail: format!("request size {} exceeds max {}", serialized.len(), max),
            };
        }
    }

    let mut quota_info = Vec::new();
    let mut quota_commits = Vec::new();
    for quota in &merged.quotas {
        let scope_ok = quota.action == action || quota.action == scope;
        if !scope_ok {
            continue;
        }
        let key = quota_key(agent_id, &quota.action, quota.window, now);
        let limit = quota.limit;
        let window_secs = window_seconds(quota.window);
        let reset_strategy = quota.reset_strategy;
        let mut rejected = false;
        let mut used_after = 0u64;
        let _ = registry.with_quota_counter(&key, &mut |counter| {
            match reset_strategy {
                crate::registry::ResetStrategy::Sliding => {
                    let cutoff = now - chrono::Duration::seconds(window_secs as i64);
                    counter.timestamps.retain(|ts| *ts > cutoff);
                    if counter.timestamps.len() as u64 >= limit {
                        rejected = true;
                        used_after = counter.timestamps.len() as u64;
                        return Err(crate::error::Error::QuotaExceeded(quota.action.clone()));
                    }
                    counter.timestamps.push(now);
                    used_after = counter.timestamps.len() as u64;
                }
                crate::registry::ResetStrategy::Fixed => {
                    if counter.count >= limit {
                        rejected = true;
                        used_after = counter.count;
                        return Err(crate::error::Error::QuotaExceeded(quota.action.clone()));
                    }
                    counter.count += 1;
                    used_after = counter.count;
                }
            }
            Ok(())
        });
        if rejected {
            // Earlier quotas in this same evaluation already incremented —
            // undo them so a deny doesn't leak a partial consumption.
            release_quotas(registry, &quota_commits);
            return Decision::Deny {
                reason: DenyReason::QuotaExceeded,
                detail: format!("quota for '{}' exhausted ({}/{})", quota.action, used_after, limit),
            };
        }
        quota_commits.push(QuotaCommit {
            key,
            reset_strategy,
            timestamp: now,
        });
        quota_info.push(QuotaInfo {
            action: quota.action.clone(),
            limit,
            used: used_after,
        });
    }

    Decision::Allow {
        response_filters: merged.response_filters.clone(),
        quota_info,
        quota_commits,
    }
}

fn window_seconds(window: crate::registry::QuotaWindow) -> u64 {
    use crate::registry::QuotaWindow::*;
    match window {
        OneHour => 3600,
        TwentyFourHours => 86_400,
        SevenDays => 604_800,
    }
}

fn domain_matches(host: &str, suffix: &str) -> bool {
    host == suffix || host.ends_with(&format!(".{suffix}"))
}

fn schedule_allows(schedule: &Schedule, now: DateTime<Utc>, default_timezone: &str) -> bool {
    if !schedule.enabled {
        return false;
    }
    let tz_name = if schedule.timezone.is_empty() {
        default_timezone
    } else {
        &schedule.timezone
    };
    let tz: Tz = tz_name.parse().unwrap_or(chrono_tz::UTC);
    let local = now.with_timezone(&tz);

    if let Some(days) = &schedule.allowed_days {
        if !days.contains(&local.weekday()) {
            return false;
        }
    }
    if let Some(hours) = &schedule.allowed_hours {
        let hour = local.hour() as u8;
        if hour < hours.start || hour >= hours.end {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::InMemoryRegistry;
    use std::collections::HashSet;

    fn spec_with_scope(scope: &str) -> PolicySpec {
        PolicySpec {
            scopes: HashSet::from([scope.to_string()]),
            intent: None,
            guards: Guards::default(),
            quotas: vec![],
            schedule: None,
            response_filters: ResponseFilters::default(),
        }
    }

    #[test]
    fn merge_unions_scopes() {
        let merged = merge(vec![
            spec_with_scope("search:query"),
            spec_with_scope("chat:complete"),
        ]);
        assert!(merged.scopes.contains("search:query"));
        assert!(merged.scopes.contains("chat:complete"));
    }

    #[test]
    fn merge_takes_smallest_max_request_size() {
        let mut a = spec_with_scope("search:query");
        a.guards.max_request_size = Some(1000);
        let mut b = spec_with_scope("search:query");
        b.guards.max_request_size = Some(500);
        let merged = merge(vec![a, b]);
        assert_eq!(merged.guards.max_request_size, Some(500));
    }

    #[test]
    fn evaluate_denies_out_of_scope() {
        let registry: std::sync::Arc<dyn Registry> = InMemoryRegistry::new_shared(10);
        let merged = spec_with_scope("search:query");
        let decision = evaluate(
            &registry,
            &merged,
            Uuid::new_v4(),
            "send_mail",
            "send",
            &serde_json::json!({}),
            None,
            Utc::now(),
            "UTC",
        );
        match decision {
            Decision::Deny { reason, .. } => assert_eq!(reason, DenyReason::OutOfScope),
            Decision::Allow { .. } => panic!("expected deny"),
        }
    }

    #[test]
    fn evaluate_allows_in_scope_call() {
        let registry: std::sync::Arc<dyn Registry> = InMemoryRegistry::new_shared(10);
        let merged = spec_with_scope("search:query");
        let decision = evaluate(
            &registry,
            &merged,
            Uuid::new_v4(),
            "search",
            "query",
            &serde_json::json!({"q": "ocean"}),
            None,
            Utc::now(),
            "UTC",
        );
        assert!(matches!(decision, Decision::Allow { .. }));
    }

    #[test]
    fn evaluate_enforces_quota_limit() {
        let registry: std::sync::Arc<dyn Registry> = InMemoryRegistry::new_shared(10);
        let mut merged = spec_with_scope("search:query");
        merged.quotas.push(Quota {
            action: "search:query".into(),
            limit: 2,
            window: crate::registry::QuotaWindow::OneHour,
            reset_strategy: crate::registry::ResetStrategy::Sliding,
        });
        let agent_id = Uuid::new_v4();
        for _ in 0..2 {
            let decision = evaluate(
                &registry,
                &merged,
                agent_id,
                "search",
                "query",
                &serde_json::json!({}),
                None,
                Utc::now(),
                "UTC",
            );
            assert!(matches!(decision, Decision::Allow { .. }));
        }
        let third = evaluate(
            &registry,
            &merged,
            agent_id,
            "search",
            "query",
            &serde_json::json!({}),
            None,
            Utc::now(),
            "UTC",
        );
        match third {
            Decision::Deny { reason, .. } => assert_eq!(reason, DenyReason::QuotaExceeded),
            Decision::Allow { .. } => panic!("expected quota_exceeded"),
        }
    }

    #[test]
    fn evaluate_enforces_domain_allowlist() {
        let registry: std::sync::Arc<dyn Registry> = InMemoryRegistry::new_shared(10);
        let mut merged = spec_with_scope("http_fetch:get");
        merged.guards.allowed_domains = Some(HashSet::from(["example.com".to_string()]));
        let decision = evaluate(
            &registry,
            &merged,
            Uuid::new_v4(),
            "http_fetch",
            "get",
            &serde_json::json!({}),
            Some("evil.com"),
            Utc::now(),
            "UTC",
        );
        match decision {
            Decision::Deny { reason, .. } => assert_eq!(reason, DenyReason::GuardViolated),
            Decision::Allow { .. } => panic!("expected deny"),
        }
    }
}
