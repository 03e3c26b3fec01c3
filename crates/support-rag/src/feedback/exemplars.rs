//! Few-shot exemplars harvested from helpful answers.

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::cache::evict_least_used;
use crate::embeddings::cosine_similarity;
use crate::search::tokenize::cache_key;
use crate::storage::{load_collection, save_collection, BlobStore};
use crate::types::CachedResponse;

pub const EXEMPLAR_BLOB: &str = "exemplars";

pub struct ExemplarStore {
    blob: Arc<dyn BlobStore>,
    entries: RwLock<Vec<CachedResponse>>,
    loaded: OnceCell<()>,
    capacity: usize,
}

impl ExemplarStore {
    pub fn new(blob: Arc<dyn BlobStore>, capacity: usize) -> Self {
        Self {
            blob,
            entries: RwLock::new(Vec::new()),
            loaded: OnceCell::new(),
            capacity: capacity.max(1),
        }
    }

    pub async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                let stored: Vec<CachedResponse> = load_collection(self.blob.as_ref(), EXEMPLAR_BLOB).await?;
                tracing::debug!(count = stored.len(), "Exemplars loaded");
                let mut entries = self.entries.write();
                entries.extend(stored);
                evict_least_used(&mut entries, self.capacity);
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    /// Add or refresh the exemplar for a query. Returns the number of entries evicted.
    pub fn add(&self, response: CachedResponse) -> usize {
        if response.embedding.is_empty() {
            return 0;
        }
        let key = cache_key(&response.query);
        let mut entries = self.entries.write();
        if let Some(existing) = entries.iter_mut().find(|e| cache_key(&e.query) == key) {
            existing.query = response.query;
            existing.answer = response.answer;
            existing.sources = response.sources;
            existing.embedding = response.embedding;
            existing.cached_at = Utc::now();
            return 0;
        }
        entries.push(response);
        evict_least_used(&mut entries, self.capacity)
    }

    /// Up to `max` exemplars at or above `min_similarity`, most similar first.
    /// Each returned exemplar has its use count bumped.
    pub fn find_similar(&self, embedding: &[f32], min_similarity: f32, max: usize) -> Vec<CachedResponse> {
        if embedding.is_empty() || max == 0 {
            return Vec::new();
        }
        let mut entries = self.entries.write();
        let mut scored: Vec<(usize, f32)> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, cosine_similarity(embedding, &e.embedding)))
            .filter(|(_, s)| *s >= min_similarity)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max);

        scored
            .into_iter()
            .map(|(i, _)| {
                entries[i].use_count += 1;
                entries[i].clone()
            })
            .collect()
    }

    pub fn snapshot(&self) -> Vec<CachedResponse> {
        self.entries.read().clone()
    }

    pub async fn persist(&self) -> Result<()> {
        self.ensure_loaded().await?;
        let entries = self.snapshot();
        save_collection(self.blob.as_ref(), EXEMPLAR_BLOB, &entries).await
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStore;

    fn exemplar(query: &str, embedding: Vec<f32>) -> CachedResponse {
        CachedResponse::new(query, embedding, format!("answer to {}", query), vec![])
    }

    #[test]
    fn test_find_similar_threshold_and_order() {
        let store = ExemplarStore::new(Arc::new(MemoryBlobStore::new()), 10);
        store.add(exemplar("vpn", vec![1.0, 0.0]));
        store.add(exemplar("vpn lenta", vec![0.9, 0.1]));
        store.add(exemplar("impresora", vec![0.0, 1.0]));

        let hits = store.find_similar(&[1.0, 0.0], 0.80, 5);
        assert_eq!(hits.iter().map(|h| h.query.as_str()).collect::<Vec<_>>(), vec!["vpn", "vpn lenta"]);
        assert_eq!(hits[0].use_count, 1);
        assert_eq!(store.find_similar(&[1.0, 0.0], 0.80, 1).len(), 1);
    }

    #[test]
    fn test_same_query_refreshes_and_capacity_evicts() {
        let store = ExemplarStore::new(Arc::new(MemoryBlobStore::new()), 2);
        store.add(exemplar("VPN caída", vec![1.0, 0.0]));
        store.add(exemplar("vpn caida", vec![1.0, 0.1]));
        assert_eq!(store.len(), 1);

        store.find_similar(&[1.0, 0.0], 0.8, 1);
        store.add(exemplar("correo", vec![0.0, 1.0]));
        assert_eq!(store.add(exemplar("teclado", vec![0.5, 0.5])), 1);
        // The used exemplar survives.
        assert!(store.snapshot().iter().any(|e| e.query == "vpn caida"));
    }

    #[tokio::test]
    async fn test_persist_and_reload() {
        let blob = Arc::new(MemoryBlobStore::new());
        let store = ExemplarStore::new(blob.clone(), 10);
        store.ensure_loaded().await.unwrap();
        store.add(exemplar("vpn", vec![1.0, 0.0]));
        store.persist().await.unwrap();

        let reloaded = ExemplarStore::new(blob.clone(), 10);
        reloaded.ensure_loaded().await.unwrap();
        assert_eq!(reloaded.len(), 1);

        // A fresh store that never loaded merges the blob before writing.
        let untouched = ExemplarStore::new(blob.clone(), 10);
        untouched.persist().await.unwrap();
        let stored: Vec<CachedResponse> = load_collection(blob.as_ref(), EXEMPLAR_BLOB).await.unwrap();
        assert_eq!(stored.len(), 1);
    }
}
