use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::hash::{Hash, Hasher};
use std::num::NonZeroUsize;
use std::sync::Arc;

use super::EmbeddingProvider;

/// LRU memo in front of an embedding provider, keyed by a hash of the input text.
pub struct CachedEmbeddings {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Mutex<lru::LruCache<u64, Vec<f32>>>,
}

impl CachedEmbeddings {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner,
            cache: Mutex::new(lru::LruCache::new(capacity)),
        }
    }

    fn key(text: &str) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        text.trim().hash(&mut hasher);
        hasher.finish()
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let key = Self::key(text);
        if let Some(hit) = self.cache.lock().get(&key) {
            return Ok(hit.clone());
        }

        let embedding = self.inner.embed(text).await?;
        // Empty vectors mean "not computed" and are not worth remembering.
        if !embedding.is_empty() {
            self.cache.lock().put(key, embedding.clone());
        }
        Ok(embedding)
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HashEmbeddings;

    #[tokio::test]
    async fn test_repeated_text_hits_cache() {
        let stub = Arc::new(HashEmbeddings::new(16));
        let cached = CachedEmbeddings::new(stub.clone(), 8);

        let first = cached.embed("vpn no conecta").await.unwrap();
        let second = cached.embed("vpn no conecta").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(stub.calls(), 1);
        assert_eq!(cached.len(), 1);
    }

    #[tokio::test]
    async fn test_capacity_is_bounded() {
        let stub = Arc::new(HashEmbeddings::new(8));
        let cached = CachedEmbeddings::new(stub.clone(), 2);
        for text in ["uno", "dos", "tres"] {
            cached.embed(text).await.unwrap();
        }
        assert_eq!(cached.len(), 2);
        cached.embed("uno").await.unwrap();
        assert_eq!(stub.calls(), 4);
    }
}
