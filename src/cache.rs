//! TTL cache for search results.
//!
//! Keyed by `(normalized query, top_k, mode)` so a hybrid result set is
//! never served for a lexical-only query or vice versa. Entries expire
//! after the configured TTL; expired entries are dropped on access.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::models::RankedResult;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct CacheKey {
    query: String,
    top_k: i64,
    mode: &'static str,
}

struct CacheEntry {
    stored_at: Instant,
    results: Vec<RankedResult>,
}

pub struct SearchCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, query: &str, top_k: i64, mode: &'static str) -> Option<Vec<RankedResult>> {
        let key = CacheKey {
            query: query.to_string(),
            top_k,
            mode,
        };

        let mut entries = self.entries.lock().expect("cache poisoned");
        match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.results.clone()),
            Some(_) => {
                entries.remove(&key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, query: &str, top_k: i64, mode: &'static str, results: Vec<RankedResult>) {
        let key = CacheKey {
            query: query.to_string(),
            top_k,
            mode,
        };
        let mut entries = self.entries.lock().expect("cache poisoned");
        entries.insert(
            key,
            CacheEntry {
                stored_at: Instant::now(),
                results,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(chunk_id: i64) -> RankedResult {
        RankedResult {
            chunk_id,
            doc_id: 1,
            uri: "https://a.test/".to_string(),
            title: None,
            snippet: String::new(),
            score: 1.0,
            heading_path: vec![],
            token_count: 0,
        }
    }

    #[test]
    fn test_hit_within_ttl() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.put("query", 10, "hybrid", vec![result(1)]);

        let hit = cache.get("query", 10, "hybrid").unwrap();
        assert_eq!(hit.len(), 1);
        assert_eq!(hit[0].chunk_id, 1);
    }

    #[test]
    fn test_key_includes_top_k_and_mode() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.put("query", 10, "hybrid", vec![result(1)]);

        assert!(cache.get("query", 5, "hybrid").is_none());
        assert!(cache.get("query", 10, "lexical").is_none());
        assert!(cache.get("other", 10, "hybrid").is_none());
    }

    #[test]
    fn test_expired_entry_dropped() {
        let cache = SearchCache::new(Duration::from_millis(0));
        cache.put("query", 10, "hybrid", vec![result(1)]);

        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get("query", 10, "hybrid").is_none());
    }

    #[test]
    fn test_put_replaces_previous_entry() {
        let cache = SearchCache::new(Duration::from_secs(60));
        cache.put("query", 10, "hybrid", vec![result(1)]);
        cache.put("query", 10, "hybrid", vec![result(2), result(3)]);

        let hit = cache.get("query", 10, "hybrid").unwrap();
        assert_eq!(hit.len(), 2);
        assert_eq!(hit[0].chunk_id, 2);
    }
}
