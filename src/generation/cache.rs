use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// How long a cached response stays servable.
pub const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Hard cap on cached responses; the oldest insertion is evicted first.
pub const CACHE_CAPACITY: usize = 100;

type CacheKey = (String, String);

struct CacheEntry {
    text: String,
    created: Instant,
}

struct CacheInner {
    map: HashMap<CacheKey, CacheEntry>,
    /// Insertion order for FIFO eviction. Not an LRU: lookups do not
    /// reorder entries.
    order: VecDeque<CacheKey>,
}

/// Bounded TTL cache of full generation responses, keyed by
/// `(model, normalized prompt)`.
pub struct ResponseCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl ResponseCache {
    pub fn new() -> Self {
        Self::with_limits(CACHE_TTL, CACHE_CAPACITY)
    }

    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            ttl,
            capacity,
        }
    }

    /// Case-insensitive, trimmed prompt form used for keying.
    pub fn normalize(prompt: &str) -> String {
        prompt.trim().to_lowercase()
    }

    fn key(model: &str, prompt: &str) -> CacheKey {
        (model.to_string(), Self::normalize(prompt))
    }

    /// Fresh cached text for the prompt, or `None`. Expired entries are
    /// evicted lazily here.
    pub fn lookup(&self, model: &str, prompt: &str) -> Option<String> {
        let key = Self::key(model, prompt);
        let mut inner = self.inner.lock();

        let expired = match inner.map.get(&key) {
            Some(entry) => entry.created.elapsed() > self.ttl,
            None => return None,
        };

        if expired {
            debug!("Cache entry expired for model {}", model);
            inner.map.remove(&key);
            inner.order.retain(|k| k != &key);
            return None;
        }

        inner.map.get(&key).map(|entry| entry.text.clone())
    }

    /// Store a completed response. At capacity, the oldest insertion goes.
    pub fn insert(&self, model: &str, prompt: &str, text: String) {
        let key = Self::key(model, prompt);
        let mut inner = self.inner.lock();

        let entry = CacheEntry {
            text,
            created: Instant::now(),
        };
        if inner.map.insert(key.clone(), entry).is_none() {
            inner.order.push_back(key);
        }

        while inner.map.len() > self.capacity {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_round_trip_and_normalization() {
        let cache = ResponseCache::new();
        cache.insert("m", "  What Is Rust? ", "a language".to_string());

        assert_eq!(
            cache.lookup("m", "what is rust?").as_deref(),
            Some("a language")
        );
        assert_eq!(cache.lookup("other-model", "what is rust?"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire_after_ttl() {
        let cache = ResponseCache::new();
        cache.insert("m", "q", "answer".to_string());

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert!(cache.lookup("m", "q").is_some());

        tokio::time::advance(Duration::from_secs(2 * 60)).await;
        assert!(cache.lookup("m", "q").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest_insertion() {
        let cache = ResponseCache::new();
        for i in 0..101 {
            cache.insert("m", &format!("prompt {}", i), format!("answer {}", i));
        }

        assert_eq!(cache.len(), 100);
        assert!(cache.lookup("m", "prompt 0").is_none());
        assert!(cache.lookup("m", "prompt 1").is_some());
        assert!(cache.lookup("m", "prompt 100").is_some());
    }

    #[tokio::test]
    async fn test_reinsert_does_not_duplicate_order() {
        let cache = ResponseCache::with_limits(CACHE_TTL, 2);
        cache.insert("m", "a", "1".to_string());
        cache.insert("m", "a", "2".to_string());
        cache.insert("m", "b", "3".to_string());
        cache.insert("m", "c", "4".to_string());

        // "a" was the oldest insertion and goes first.
        assert_eq!(cache.len(), 2);
        assert!(cache.lookup("m", "a").is_none());
        assert!(cache.lookup("m", "b").is_some());
        assert!(cache.lookup("m", "c").is_some());
    }
}
