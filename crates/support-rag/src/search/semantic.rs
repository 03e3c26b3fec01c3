use anyhow::Result;

use super::{rank_descending, Ranked};
use crate::embeddings::{cosine_similarity, EmbeddingProvider};
use crate::storage::Retrievable;

/// Cosine-similarity ranking over documents that carry an embedding.
#[derive(Debug, Clone)]
pub struct SemanticScorer {
    floor: f32,
}

impl Default for SemanticScorer {
    fn default() -> Self {
        Self::new(0.20)
    }
}

impl SemanticScorer {
    pub fn new(floor: f32) -> Self {
        Self { floor }
    }

    pub fn floor(&self) -> f32 {
        self.floor
    }

    /// Embed `query` once and rank `docs` against it.
    pub async fn search<T: Retrievable>(
        &self,
        provider: &dyn EmbeddingProvider,
        query: &str,
        docs: &[T],
        max_results: usize,
    ) -> Result<Vec<Ranked<T>>> {
        let embedding = provider.embed(query).await?;
        Ok(self.score_with_embedding(&embedding, docs, max_results))
    }

    /// Rank against an already computed query embedding, so one embedding can
    /// serve every source of a request.
    pub fn score_with_embedding<T: Retrievable>(
        &self,
        query_embedding: &[f32],
        docs: &[T],
        max_results: usize,
    ) -> Vec<Ranked<T>> {
        if query_embedding.is_empty() || max_results == 0 {
            return Vec::new();
        }

        let scored: Vec<(T, f32)> = docs
            .iter()
            .filter(|d| !d.embedding().is_empty())
            .filter_map(|d| {
                let similarity = cosine_similarity(query_embedding, d.embedding());
                (similarity >= self.floor).then(|| (d.clone(), similarity))
            })
            .collect();

        rank_descending(scored, max_results)
    }
}
