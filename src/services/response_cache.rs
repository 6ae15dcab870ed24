//! The Response Cache (SPEC_FULL.md §4.K): memoizes a generated answer
//! against the exact set of chunks that grounded it, so identical
//! (query, citation-set) pairs are served without a further model call.
//! Entirely new — generalized from the teacher's embedding-level
//! `Arc<RwLock<HashMap<String, Vec<f32>>>>` cache in `embedding_service.rs`
//! into a `dashmap`-backed, TTL-bounded, lazily-evicted cache keyed on a
//! short hash rather than the raw text.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::config::CacheConfig;

struct Entry {
    value: String,
    expires_at: Instant,
}

pub struct ResponseCache {
    entries: DashMap<String, Entry>,
    ttl: Duration,
    enabled: bool,
}

impl ResponseCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self { entries: DashMap::new(), ttl: Duration::from_secs(config.ttl_seconds.max(1)), enabled: config.enabled }
    }

    pub fn key_for(query: &str, chunk_ids: &[uuid::Uuid]) -> String {
        let mut sorted: Vec<String> = chunk_ids.iter().map(|id| id.to_string()).collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        hasher.update(query.as_bytes());
        hasher.update(b"\0");
        hasher.update(sorted.join(",").as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Lazily evicts the entry if found but expired, rather than running a
    /// background sweep.
    pub fn get(&self, key: &str) -> Option<String> {
        if !self.enabled {
            return None;
        }

        let hit = self.entries.get(key).filter(|e| e.expires_at > Instant::now()).map(|e| e.value.clone());

        if hit.is_none() {
            self.entries.remove(key);
        }
        hit
    }

    pub fn put(&self, key: String, value: String) {
        if !self.enabled {
            return;
        }
        self.entries.insert(key, Entry { value, expires_at: Instant::now() + self.ttl });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_is_order_independent_over_chunk_ids() {
        let a = uuid::Uuid::new_v4();
        let b = uuid::Uuid::new_v4();
        let k1 = ResponseCache::key_for("query", &[a, b]);
        let k2 = ResponseCache::key_for("query", &[b, a]);
        assert_eq!(k1, k2);
    }

    #[test]
    fn disabled_cache_never_returns_hits() {
        let cache = ResponseCache::new(&CacheConfig { enabled: false, ttl_seconds: 60 });
        let key = ResponseCache::key_for("q", &[]);
        cache.put(key.clone(), "answer".to_string());
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn enabled_cache_round_trips_until_expiry() {
        let cache = ResponseCache::new(&CacheConfig { enabled: true, ttl_seconds: 60 });
        let key = ResponseCache::key_for("q", &[]);
        cache.put(key.clone(), "answer".to_string());
        assert_eq!(cache.get(&key), Some("answer".to_string()));
    }
}
