//! In-process metrics, rendered as Prometheus text exposition on scrape
//! (§11). There is no OTLP exporter here — shipping to a collector is an
//! explicit non-goal for this core — so unlike the ambient
//! `tower-otel-http-metrics` middleware pattern, counters and histograms
//! are held directly in atomics and rendered only when `GET /metrics` is
//! hit.
//!
//! Every metric is labelled the way §2/§4.9 requires: "a counter increment
//! with `{tool, action, outcome}` labels and a histogram observation for
//! latency" at every pipeline stage, plus the §4.4 retry counter labelled
//! `{tool, action, attempt}`. Labels are folded into the map key rather than
//! attached as a separate dimension so [`MetricsRegistry`] stays a set of
//! plain concurrent maps, matching the registry's own `DashMap`-per-entity
//! style.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Latency histogram buckets in milliseconds, matching the template's
/// default `otel` latency buckets so operators used to those dashboards
/// see familiar bucket boundaries.
const LATENCY_BUCKETS_MS: &[f64] = &[
    5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
];

#[derive(Debug, Default)]
struct Counter(AtomicU64);

impl Counter {
    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug)]
struct Histogram {
    buckets: Vec<AtomicU64>,
    sum_ms: AtomicU64,
    count: AtomicU64,
}

impl Default for Histogram {
    fn default() -> Self {
        Self {
            buckets: LATENCY_BUCKETS_MS.iter().map(|_| AtomicU64::new(0)).collect(),
            sum_ms: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }
}

impl Histogram {
    fn observe(&self, value_ms: u64) {
        for (bound, bucket) in LATENCY_BUCKETS_MS.iter().zip(self.buckets.iter()) {
            if (value_ms as f64) <= *bound {
                bucket.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.sum_ms.fetch_add(value_ms, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    fn render(&self, name: &str, labels: &str, out: &mut String) {
        let total = self.count.load(Ordering::Relaxed);
        for (bound, bucket) in LATENCY_BUCKETS_MS.iter().zip(self.buckets.iter()) {
            out.push_str(&format!(
                "{name}_bucket{{{labels},le=\"{bound}\"}} {}\n",
                bucket.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!("{name}_bucket{{{labels},le=\"+Inf\"}} {total}\n"));
        out.push_str(&format!("{name}_sum{{{labels}}} {}\n", self.sum_ms.load(Ordering::Relaxed)));
        out.push_str(&format!("{name}_count{{{labels}}} {total}\n"));
    }
}

type RequestKey = (String, String, String);
type RetryKey = (String, String, u32);
type LatencyKey = (String, String);

/// Process-wide counters and histograms exposed on `GET /metrics`, keyed by
/// the label tuples the pipeline observes at each stage.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    requests: DashMap<RequestKey, Counter>,
    retries: DashMap<RetryKey, Counter>,
    latency: DashMap<LatencyKey, Histogram>,
}

impl MetricsRegistry {
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// §2, §4.9: every pipeline stage increments a `{tool, action, outcome}`
    /// counter and observes a latency histogram — called once per proxy
    /// request, whichever stage it exits from (`"success"` on the happy
    /// path, or the error category otherwise: `"policy_denied"`,
    /// `"quota_exceeded"`, `"breaker_open"`, `"chaos_injected"`, ...).
    pub fn record_outcome(&self, tool: &str, action: &str, outcome: &str, duration_ms: u64) {
        self.requests
            .entry((tool.to_string(), action.to_string(), outcome.to_string()))
            .or_default()
            .inc();
        self.latency
            .entry((tool.to_string(), action.to_string()))
            .or_default()
            .observe(duration_ms);
    }

    /// §4.4: "every retry increments a counter labelled `{tool, action, attempt}`".
    pub fn record_retry(&self, tool: &str, action: &str, attempt: u32) {
        self.retries
            .entry((tool.to_string(), action.to_string(), attempt))
            .or_default()
            .inc();
    }

    /// Render every counter and histogram as Prometheus text exposition.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# HELP gateway_requests_total Proxy requests by tool, action, and outcome.\n");
        out.push_str("# TYPE gateway_requests_total counter\n");
        for entry in self.requests.iter() {
            let (tool, action, outcome) = entry.key();
            out.push_str(&format!(
                "gateway_requests_total{{tool=\"{tool}\",action=\"{action}\",outcome=\"{outcome}\"}} {}\n",
                entry.value().get()
            ));
        }

        out.push_str("# HELP gateway_retries_total Adapter call retries by tool, action, and attempt number.\n");
        out.push_str("# TYPE gateway_retries_total counter\n");
        for entry in self.retries.iter() {
            let (tool, action, attempt) = entry.key();
            out.push_str(&format!(
                "gateway_retries_total{{tool=\"{tool}\",action=\"{action}\",attempt=\"{attempt}\"}} {}\n",
                entry.value().get()
            ));
        }

        out.push_str("# HELP gateway_request_duration_ms Proxy request duration in milliseconds, by tool and action.\n");
        out.push_str("# TYPE gateway_request_duration_ms histogram\n");
        for entry in self.latency.iter() {
            let (tool, action) = entry.key();
            let labels = format!("tool=\"{tool}\",action=\"{action}\"");
            entry.value().render("gateway_request_duration_ms", &labels, &mut out);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_registry_renders_nothing() {
        let registry = MetricsRegistry::default();
        assert_eq!(registry.render().lines().filter(|l| !l.starts_with('#')).count(), 0);
    }

    #[test]
    fn record_outcome_labels_the_counter_and_histogram() {
        let registry = MetricsRegistry::default();
        registry.record_outcome("search", "query", "success", 42);
        registry.record_outcome("search", "query", "policy_denied", 3);
        let rendered = registry.render();
        assert!(rendered.contains(
            "gateway_requests_total{tool=\"search\",action=\"query\",outcome=\"success\"} 1"
        ));
        assert!(rendered.contains(
            "gateway_requests_total{tool=\"search\",action=\"query\",outcome=\"policy_denied\"} 1"
        ));
        assert!(rendered.contains("gateway_request_duration_ms_count{tool=\"search\",action=\"query\"} 2"));
    }

    #[test]
    fn distinct_outcomes_are_independent_counters() {
        let registry = MetricsRegistry::default();
        registry.record_outcome("chat", "complete", "breaker_open", 1);
        registry.record_outcome("chat", "complete", "breaker_open", 1);
        registry.record_outcome("chat", "complete", "chaos_injected", 1);
        let rendered = registry.render();
        assert!(rendered.contains(
            "gateway_requests_total{tool=\"chat\",action=\"complete\",outcome=\"breaker_open\"} 2"
        ));
        assert!(rendered.contains(
            "gateway_requests_total{tool=\"chat\",action=\"complete\",outcome=\"chaos_injected\"} 1"
        ));
    }

    #[test]
    fn record_retry_increments_by_attempt_number() {
        let registry = MetricsRegistry::default();
        registry.record_retry("search", "query", 1);
        registry.record_retry("search", "query", 1);
        registry.record_retry("search", "query", 2);
        let rendered = registry.render();
        assert!(rendered.contains(
            "gateway_retries_total{tool=\"search\",action=\"query\",attempt=\"1\"} 2"
        ));
        assert!(rendered.contains(
            "gateway_retries_total{tool=\"search\",action=\"query\",attempt=\"2\"} 1"
        ));
    }

    #[test]
    fn histogram_bucket_boundaries_are_cumulative() {
        let histogram = Histogram::default();
        histogram.observe(5);
        histogram.observe(4000);
        let mut out = String::new();
        histogram.render("test_metric", "tool=\"x\"", &mut out);
        assert!(out.contains("test_metric_bucket{tool=\"x\",le=\"5\"} 1"));
        assert!(out.contains("test_metric_bucket{tool=\"x\",le=\"+Inf\"} 2"));
    }
}
