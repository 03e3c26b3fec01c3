//! Keyword enrichment driven by repeated unhelpful feedback.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::embeddings::EmbeddingProvider;
use crate::knowledge::KnowledgeBase;
use crate::types::SourceKind;
use crate::worker::BackgroundQueue;

#[derive(Default)]
struct FrequencyState {
    counts: HashMap<String, u32>,
    /// Keywords already enriched, or claimed by an enrichment in flight.
    applied: HashSet<String>,
}

/// Keyword counts across all unhelpful feedback.
pub struct KeywordFrequency {
    state: Mutex<FrequencyState>,
    threshold: u32,
}

impl KeywordFrequency {
    pub fn new(threshold: u32) -> Self {
        Self {
            state: Mutex::new(FrequencyState::default()),
            threshold: threshold.max(1),
        }
    }

    /// Count `keywords` and claim the ones that reached the threshold and were
    /// never applied. A claimed keyword is not returned again unless released.
    pub fn record(&self, keywords: &[String]) -> Vec<String> {
        let mut state = self.state.lock();
        let mut claimed = Vec::new();
        for kw in keywords {
            let count = {
                let c = state.counts.entry(kw.clone()).or_insert(0);
                *c += 1;
                *c
            };
            if count >= self.threshold && state.applied.insert(kw.clone()) {
                claimed.push(kw.clone());
            }
        }
        claimed
    }

    /// Rebuild counts from persisted feedback without claiming anything.
    /// Keywords already past the threshold are treated as applied.
    pub fn restore<'a>(&self, keywords: impl IntoIterator<Item = &'a String>) {
        let mut state = self.state.lock();
        for kw in keywords {
            *state.counts.entry(kw.clone()).or_insert(0) += 1;
        }
        let threshold = self.threshold;
        let crossed: Vec<String> = state
            .counts
            .iter()
            .filter(|(_, c)| **c >= threshold)
            .map(|(k, _)| k.clone())
            .collect();
        state.applied.extend(crossed);
    }

    pub fn mark_applied(&self, keyword: &str) {
        self.state.lock().applied.insert(keyword.to_string());
    }

    /// Give a claim back so a later crossing can retry it.
    pub fn release(&self, keyword: &str) {
        self.state.lock().applied.remove(keyword);
    }

    pub fn count(&self, keyword: &str) -> u32 {
        self.state.lock().counts.get(keyword).copied().unwrap_or(0)
    }

    pub fn is_applied(&self, keyword: &str) -> bool {
        self.state.lock().applied.contains(keyword)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct EnrichmentTarget {
    pub keyword: String,
    pub source: SourceKind,
    pub document_id: String,
    /// False when the document already carried the keyword.
    pub appended: bool,
}

/// Appends keywords to the document the retrieval pipeline ranks best for a query.
pub struct Enricher {
    kb: Arc<KnowledgeBase>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    queue: BackgroundQueue,
}

impl Enricher {
    pub fn new(kb: Arc<KnowledgeBase>, embedder: Option<Arc<dyn EmbeddingProvider>>, queue: BackgroundQueue) -> Self {
        Self { kb, embedder, queue }
    }

    async fn query_embedding(&self, query: &str) -> Option<Vec<f32>> {
        let provider = self.embedder.as_ref()?;
        match provider.embed(query).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed during enrichment, using lexical match only");
                None
            }
        }
    }

    /// Append each keyword to the best match for `query`. Keywords with no
    /// matching document are skipped. Persistence runs on the background queue.
    pub async fn enrich(&self, query: &str, keywords: &[String]) -> anyhow::Result<Vec<EnrichmentTarget>> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }
        self.kb.ensure_initialized().await?;

        let embedding = self.query_embedding(query).await;
        let Some(best) = self.kb.best_match(query, embedding.as_deref()) else {
            tracing::info!(query = %query, "No document matches failing query, enrichment skipped");
            return Ok(Vec::new());
        };

        let mut targets = Vec::with_capacity(keywords.len());
        for kw in keywords {
            let appended = self.kb.append_keyword(best.source, &best.id, kw).await?;
            tracing::info!(
                keyword = %kw,
                source = %best.source,
                document = %best.id,
                appended,
                "Keyword enrichment"
            );
            targets.push(EnrichmentTarget {
                keyword: kw.clone(),
                source: best.source,
                document_id: best.id.clone(),
                appended,
            });
        }

        if targets.iter().any(|t| t.appended) {
            let kb = self.kb.clone();
            let source = best.source;
            self.queue.submit("enrichment_persist", async move { kb.persist(source).await });
        }
        Ok(targets)
    }
}
