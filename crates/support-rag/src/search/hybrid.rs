use std::collections::HashMap;

use super::Ranked;
use crate::storage::Retrievable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HybridSource {
    Lexical,
    Semantic,
    Both,
}

/// A document after rank fusion, keeping its component scores and ranks.
#[derive(Debug, Clone)]
pub struct FusedDocument<T> {
    pub item: T,
    pub fused_score: f32,
    /// `fused_score` divided by the best achievable score `2/(K+1)`.
    pub relevance: f32,
    pub lexical: Option<(f32, usize)>,
    pub semantic: Option<(f32, usize)>,
    pub source: HybridSource,
}

pub fn rrf_term(k: usize, rank: usize) -> f32 {
    1.0 / (k as f32 + rank as f32)
}

/// Score of a document ranked first in both lists.
pub fn max_fused_score(k: usize) -> f32 {
    2.0 / (k as f32 + 1.0)
}

/// Reciprocal Rank Fusion: merges ranked lists without score normalization.
/// Formula: rrf_score(doc) = Σ 1/(k + rank_i) for each list containing doc
pub fn reciprocal_rank_fusion<T: Retrievable>(
    lexical: Vec<Ranked<T>>,
    semantic: Vec<Ranked<T>>,
    k: usize,
    top_n: usize,
) -> Vec<FusedDocument<T>> {
    let mut order: Vec<String> = Vec::new();
    let mut fused: HashMap<String, FusedDocument<T>> = HashMap::new();

    for hit in lexical {
        let id = hit.item.doc_id().to_string();
        let rrf = rrf_term(k, hit.rank);
        fused
            .entry(id.clone())
            .and_modify(|f| {
                f.fused_score += rrf;
                f.lexical = Some((hit.score, hit.rank));
                f.source = HybridSource::Both;
            })
            .or_insert_with(|| {
                order.push(id);
                FusedDocument {
                    item: hit.item.clone(),
                    fused_score: rrf,
                    relevance: 0.0,
                    lexical: Some((hit.score, hit.rank)),
                    semantic: None,
                    source: HybridSource::Lexical,
                }
            });
    }

    for hit in semantic {
        let id = hit.item.doc_id().to_string();
        let rrf = rrf_term(k, hit.rank);
        fused
            .entry(id.clone())
            .and_modify(|f| {
                f.fused_score += rrf;
                f.semantic = Some((hit.score, hit.rank));
                f.source = HybridSource::Both;
            })
            .or_insert_with(|| {
                order.push(id);
                FusedDocument {
                    item: hit.item.clone(),
                    fused_score: rrf,
                    relevance: 0.0,
                    lexical: None,
                    semantic: Some((hit.score, hit.rank)),
                    source: HybridSource::Semantic,
                }
            });
    }

    let max = max_fused_score(k);
    let mut merged: Vec<FusedDocument<T>> = order
        .into_iter()
        .filter_map(|id| fused.remove(&id))
        .map(|mut f| {
            f.relevance = f.fused_score / max;
            f
        })
        .collect();

    // Stable sort keeps first-seen order on ties.
    merged.sort_by(|a, b| {
        b.fused_score
            .partial_cmp(&a.fused_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    merged.truncate(top_n);
    merged
}
