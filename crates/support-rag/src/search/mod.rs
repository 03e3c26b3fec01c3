pub mod hybrid;
pub mod lexical;
pub mod semantic;
pub mod tokenize;

pub use hybrid::{reciprocal_rank_fusion, rrf_term, FusedDocument, HybridSource};
pub use lexical::LexicalScorer;
pub use semantic::SemanticScorer;

/// A scored item with its 1-based position in a ranking.
#[derive(Debug, Clone)]
pub struct Ranked<T> {
    pub item: T,
    pub score: f32,
    pub rank: usize,
}

/// Sort by descending score, truncate and assign ranks 1..N.
pub(crate) fn rank_descending<T>(mut scored: Vec<(T, f32)>, max_results: usize) -> Vec<Ranked<T>> {
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(max_results);
    scored
        .into_iter()
        .enumerate()
        .map(|(i, (item, score))| Ranked { item, score, rank: i + 1 })
        .collect()
}
