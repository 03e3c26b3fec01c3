use chrono::Utc;
use parking_lot::RwLock;

use super::CachedAnswer;
use crate::embeddings::cosine_similarity;
use crate::types::CachedResponse;

/// Drop entries until `capacity` remains, least used first, oldest on ties.
pub fn evict_least_used(entries: &mut Vec<CachedResponse>, capacity: usize) -> usize {
    let mut evicted = 0;
    while entries.len() > capacity {
        let victim = entries
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.use_count.cmp(&b.use_count).then(a.cached_at.cmp(&b.cached_at)))
            .map(|(i, _)| i);
        match victim {
            Some(i) => {
                entries.swap_remove(i);
                evicted += 1;
            }
            None => break,
        }
    }
    evicted
}

/// Nearest-neighbour cache over query embeddings.
pub struct SemanticCache {
    entries: RwLock<Vec<CachedResponse>>,
    capacity: usize,
    threshold: f32,
}

impl SemanticCache {
    pub fn new(capacity: usize, threshold: f32) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            capacity: capacity.max(1),
            threshold,
        }
    }

    /// Best entry with similarity at or above the threshold; bumps its use count.
    pub fn lookup(&self, embedding: &[f32]) -> Option<(CachedAnswer, f32)> {
        if embedding.is_empty() {
            return None;
        }
        let mut entries = self.entries.write();
        let (idx, similarity) = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(embedding, &e.embedding)))
            .filter(|(_, s)| *s >= self.threshold)
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))?;

        let entry = &mut entries[idx];
        entry.use_count += 1;
        Some((
            CachedAnswer {
                answer: entry.answer.clone(),
                sources: entry.sources.clone(),
            },
            similarity,
        ))
    }

    /// Store a response. A near-identical existing entry is refreshed in place.
    pub fn insert(&self, response: CachedResponse) {
        if response.embedding.is_empty() {
            return;
        }
        let mut entries = self.entries.write();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| cosine_similarity(&e.embedding, &response.embedding) >= 0.999)
        {
            existing.answer = response.answer;
            existing.sources = response.sources;
            existing.cached_at = Utc::now();
            return;
        }
        entries.push(response);
        let evicted = evict_least_used(&mut entries, self.capacity);
        if evicted > 0 {
            tracing::debug!(evicted, "Semantic cache evicted entries");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn response(query: &str, embedding: Vec<f32>) -> CachedResponse {
        CachedResponse::new(query, embedding, format!("answer for {}", query), vec![])
    }

    #[test]
    fn test_lookup_threshold() {
        let cache = SemanticCache::new(4, 0.95);
        cache.insert(response("vpn", vec![1.0, 0.0, 0.0]));

        let (hit, sim) = cache.lookup(&[0.99, 0.05, 0.0]).unwrap();
        assert_eq!(hit.answer, "answer for vpn");
        assert!(sim >= 0.95);
        assert!(cache.lookup(&[0.7, 0.7, 0.0]).is_none());
        assert!(cache.lookup(&[]).is_none());
    }

    #[test]
    fn test_evicts_least_used_then_oldest() {
        let mut entries = vec![
            response("old-unused", vec![1.0]),
            response("new-unused", vec![1.0]),
            response("used", vec![1.0]),
        ];
        entries[0].cached_at = Utc::now() - Duration::hours(2);
        entries[2].use_count = 3;
        entries[2].cached_at = Utc::now() - Duration::hours(5);

        assert_eq!(evict_least_used(&mut entries, 2), 1);
        let remaining: Vec<_> = entries.iter().map(|e| e.query.as_str()).collect();
        assert!(remaining.contains(&"used"));
        assert!(remaining.contains(&"new-unused"));
    }

    #[test]
    fn test_capacity_bound_and_hit_protection() {
        let cache = SemanticCache::new(2, 0.95);
        cache.insert(response("a", vec![1.0, 0.0, 0.0]));
        cache.insert(response("b", vec![0.0, 1.0, 0.0]));
        cache.lookup(&[1.0, 0.0, 0.0]).unwrap();
        cache.insert(response("c", vec![0.0, 0.0, 1.0]));

        assert_eq!(cache.len(), 2);
        assert!(cache.lookup(&[1.0, 0.0, 0.0]).is_some());
        assert!(cache.lookup(&[0.0, 1.0, 0.0]).is_none());
    }

    #[test]
    fn test_reinsert_refreshes() {
        let cache = SemanticCache::new(4, 0.95);
        cache.insert(response("a", vec![1.0, 0.0]));
        let mut again = response("a", vec![1.0, 0.0]);
        again.answer = "updated".into();
        cache.insert(again);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.lookup(&[1.0, 0.0]).unwrap().0.answer, "updated");
    }
}
