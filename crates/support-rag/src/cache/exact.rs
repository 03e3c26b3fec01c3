use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use super::CachedAnswer;
use crate::search::tokenize::cache_key;

struct Entry {
    answer: CachedAnswer,
    stored_at: Instant,
}

/// O(1) cache keyed by the normalized query, with TTL and LRU capacity.
pub struct ExactCache {
    entries: Mutex<lru::LruCache<String, Entry>>,
    ttl: Duration,
}

impl ExactCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(lru::LruCache::new(capacity)),
            ttl,
        }
    }

    pub fn get(&self, query: &str) -> Option<CachedAnswer> {
        let key = cache_key(query);
        let mut entries = self.entries.lock();
        let expired = match entries.get(&key) {
            Some(entry) if entry.stored_at.elapsed() <= self.ttl => return Some(entry.answer.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(&key);
        }
        None
    }

    pub fn put(&self, query: &str, answer: CachedAnswer) {
        let key = cache_key(query);
        if key.is_empty() {
            return;
        }
        self.entries.lock().put(
            key,
            Entry {
                answer,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn answer(text: &str) -> CachedAnswer {
        CachedAnswer {
            answer: text.into(),
            sources: vec!["Guía VPN".into()],
        }
    }

    #[test]
    fn test_normalized_hit() {
        let cache = ExactCache::new(8, Duration::from_secs(60));
        cache.put("¿Cómo configuro la VPN?", answer("Instala FortiClient"));
        assert_eq!(cache.get("como configuro la vpn").unwrap().answer, "Instala FortiClient");
        assert!(cache.get("como configuro outlook").is_none());
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ExactCache::new(8, Duration::from_millis(20));
        cache.put("vpn", answer("a"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("vpn").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_capacity_evicts_lru() {
        let cache = ExactCache::new(2, Duration::from_secs(60));
        cache.put("uno", answer("1"));
        cache.put("dos", answer("2"));
        cache.get("uno");
        cache.put("tres", answer("3"));
        assert!(cache.get("dos").is_none());
        assert!(cache.get("uno").is_some());
        assert_eq!(cache.len(), 2);
    }
}
