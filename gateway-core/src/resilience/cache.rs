//! Fingerprinted response cache with at-most-one in-flight build per
//! fingerprint (§4.6, §5). A second caller for the same fingerprint awaits
//! the first caller's in-flight build rather than re-invoking the adapter.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

use crate::error::Error;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            max_entries: 1000,
        }
    }
}

/// Builds the cache key from `(tool, action, canonicalized params, agent scopes)`.
/// Params are canonicalized by re-serializing their sorted-key JSON form so
/// that key order in the caller's request doesn't change the fingerprint.
pub fn fingerprint(tool: &str, action: &str, params: &Value, scopes: &[String]) -> String {
    let canonical_params = canonicalize(params);
    let mut sorted_scopes = scopes.to_vec();
    sorted_scopes.sort();
    let mut hasher = Sha256::new();
    hasher.update(tool.as_bytes());
    hasher.update(b":");
    hasher.update(action.as_bytes());
    hasher.update(b":");
    hasher.update(canonical_params.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(sorted_scopes.join(",").as_bytes());
    format!("{:x}", hasher.finalize())
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted = serde_json::Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[derive(Clone)]
struct CachedEntry {
    value: Value,
    inserted_at: Instant,
}

/// A fingerprint-keyed response cache. `get_or_build` is the only entry
/// point: it either returns a fresh hit, awaits an in-flight build from
/// another caller, or runs `build` itself and publishes the result to both
/// the ready cache and any callers that arrived while it was running.
pub struct ResponseCache {
    config: CacheConfig,
    ready: DashMap<String, CachedEntry>,
    in_flight: DashMap<String, broadcast::Sender<Result<Value, String>>>,
    lru: std::sync::Mutex<VecDeque<String>>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            ready: DashMap::new(),
            in_flight: DashMap::new(),
            lru: std::sync::Mutex::new(VecDeque::new()),
        }
    }

    pub async fn get_or_build<F, Fut>(&self, key: &str, build: F) -> Result<Value, Error>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Value, Error>>,
    {
        if let Some(fresh) = self.fresh_hit(key) {
            return Ok(fresh);
        }

        // Become the builder, or subscribe to whoever already is one.
        let mut subscriber = None;
        let tx = match self.in_flight.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(occ) => {
                subscriber = Some(occ.get().subscribe());
                None
            }
            dashmap::mapref::entry::Entry::Vacant(vac) => {
                let (tx, _rx) = broadcast::channel(1);
                vac.insert(tx.clone());
                Some(tx)
            }
        };

        if let Some(tx) = tx {
            let result = build().await;
            self.in_flight.remove(key);
            match &result {
                Ok(value) => {
                    self.ready.insert(
                        key.to_string(),
                        CachedEntry {
                            value: value.clone(),
                            inserted_at: Instant::now(),
                        },
                    );
                    self.touch(key);
                    self.evict_if_needed();
                    let _ = tx.send(Ok(value.clone()));
                }
                Err(err) => {
                    let _ = tx.send(Err(err.to_string()));
                }
            }
            return result;
        }

        let mut rx = subscriber.expect("either became builder or subscribed");
        match rx.recv().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::ToolFailed(message)),
            // Builder dropped the sender without publishing (panicked); caller retries.
            Err(_) => Box::pin(self.get_or_build(key, build)).await,
        }
    }

    fn fresh_hit(&self, key: &str) -> Option<Value> {
        let entry = self.ready.get(key)?;
        if entry.inserted_at.elapsed() < self.config.ttl {
            let value = entry.value.clone();
            drop(entry);
            self.touch(key);
            Some(value)
        } else {
            None
        }
    }

    fn touch(&self, key: &str) {
        let mut lru = self.lru.lock().expect("cache lru mutex poisoned");
        lru.retain(|k| k != key);
        lru.push_back(key.to_string());
    }

    fn evict_if_needed(&self) {
        let mut lru = self.lru.lock().expect("cache lru mutex poisoned");
        while lru.len() > self.config.max_entries {
            if let Some(oldest) = lru.pop_front() {
                self.ready.remove(&oldest);
            } else {
                break;
            }
        }
    }
}

/// Actions that never participate in caching regardless of fingerprint
/// (§4.6: e.g. `gmail_send` always bypasses).
pub fn is_cache_bypassed(tool: &str, _action: &str) -> bool {
    matches!(tool, "send_mail")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn fingerprint_is_stable_across_key_order() {
        let a = serde_json::json!({"q": "ocean", "n": 5});
        let b = serde_json::json!({"n": 5, "q": "ocean"});
        let fp_a = fingerprint("search", "query", &a, &["search:query".into()]);
        let fp_b = fingerprint("search", "query", &b, &["search:query".into()]);
        assert_eq!(fp_a, fp_b);
    }

    #[test]
    fn fingerprint_differs_for_different_scopes() {
        let p = serde_json::json!({"q": "ocean"});
        let fp_a = fingerprint("search", "query", &p, &["search:query".into()]);
        let fp_b = fingerprint("search", "query", &p, &["search:query".into(), "admin".into()]);
        assert_ne!(fp_a, fp_b);
    }

    #[tokio::test]
    async fn concurrent_requests_coalesce_to_one_build() {
        let cache = Arc::new(ResponseCache::new(CacheConfig::default()));
        let calls = Arc::new(AtomicU32::new(0));
        let mut handles = Vec::new();
        for _ in 0..20 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build("fp-a", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(serde_json::json!({"v": 1}))
                    })
                    .await
            }));
        }
        for h in handles {
            let result = h.await.unwrap().unwrap();
            assert_eq!(result["v"], 1);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn second_call_after_ttl_expiry_rebuilds() {
        let cache = ResponseCache::new(CacheConfig {
            ttl: Duration::from_millis(10),
            max_entries: 10,
        });
        let calls = AtomicU32::new(0);
        let build = |calls: &AtomicU32| async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(serde_json::json!({"v": 1}))
        };
        let _ = cache.get_or_build("fp-b", || build(&calls)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let _ = cache.get_or_build("fp-b", || build(&calls)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn send_mail_always_bypasses_cache() {
        assert!(is_cache_bypassed("send_mail", "send"));
        assert!(!is_cache_bypassed("search", "query"));
    }
}
