//! Keyword-overlap scoring over an in-memory document collection.

use rayon::prelude::*;

use super::tokenize::{normalize, tokenize};
use super::{rank_descending, Ranked};
use crate::storage::Retrievable;

pub const CATEGORY_WEIGHT: f32 = 2.5;
pub const KEYWORD_WEIGHT: f32 = 2.0;
pub const BODY_WEIGHT: f32 = 1.0;

#[derive(Debug, Clone)]
pub struct LexicalScorer {
    max_usage_boost: f32,
}

impl Default for LexicalScorer {
    fn default() -> Self {
        Self::new(1.5)
    }
}

impl LexicalScorer {
    pub fn new(max_usage_boost: f32) -> Self {
        Self { max_usage_boost }
    }

    pub fn usage_boost(&self, count: u32) -> f32 {
        (1.0 + 0.1 * count as f32).min(self.max_usage_boost)
    }

    /// Score one document against pre-tokenized terms. For each term only the
    /// first matching tier counts: category, then keywords, then body.
    pub fn score_document<T: Retrievable>(&self, terms: &[String], doc: &T) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }

        let category = normalize(doc.category_field());
        let keywords = normalize(doc.keywords());
        let body = normalize(&doc.body_text());

        let mut score = 0.0;
        let mut matched = 0usize;
        for term in terms {
            let tier = if !category.is_empty() && category.contains(term.as_str()) {
                CATEGORY_WEIGHT
            } else if keywords.contains(term.as_str()) {
                KEYWORD_WEIGHT
            } else if body.contains(term.as_str()) {
                BODY_WEIGHT
            } else {
                continue;
            };
            score += tier;
            matched += 1;
        }

        if matched == 0 {
            return 0.0;
        }

        score *= 1.0 + matched as f32 / terms.len() as f32;
        score * self.usage_boost(doc.usage_count())
    }

    pub fn search<T: Retrievable>(&self, query: &str, docs: &[T], max_results: usize) -> Vec<Ranked<T>> {
        self.search_terms(&tokenize(query), docs, max_results)
    }

    pub fn search_terms<T: Retrievable>(&self, terms: &[String], docs: &[T], max_results: usize) -> Vec<Ranked<T>> {
        if terms.is_empty() || max_results == 0 {
            return Vec::new();
        }

        let scored: Vec<(T, f32)> = docs
            .par_iter()
            .filter_map(|doc| {
                let score = self.score_document(terms, doc);
                (score > 0.0).then(|| (doc.clone(), score))
            })
            .collect();

        rank_descending(scored, max_results)
    }
}
