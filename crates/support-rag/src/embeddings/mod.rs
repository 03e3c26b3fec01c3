pub mod cache;
pub mod http;

use anyhow::Result;
use async_trait::async_trait;

pub use cache::CachedEmbeddings;
pub use http::HttpEmbeddingProvider;

/// Remote or local text embedding backend.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Stable provider name used in logs and error classification.
    fn name(&self) -> &'static str {
        "embedding"
    }
}

/// Cosine similarity `dot(a,b) / (|a|·|b|)`.
///
/// Empty, zero-norm or dimension-mismatched inputs score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f32, 0.0f32, 0.0f32);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom <= f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_self_similarity_is_one() {
        let v = [0.3, -1.2, 4.0, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_symmetry() {
        let pairs: [(&[f32], &[f32]); 3] = [
            (&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]),
            (&[0.1, -0.5], &[-0.7, 0.2]),
            (&[5.0, 0.0, 0.0, 1.0], &[0.0, 1.0, 1.0, 0.0]),
        ];
        for (a, b) in pairs {
            assert!((cosine_similarity(a, b) - cosine_similarity(b, a)).abs() < 1e-7);
        }
    }

    #[test]
    fn test_mismatch_and_empty_are_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
