//! The local knowledge stores and the hybrid retrieval that runs over them.

use anyhow::Result;
use std::sync::Arc;

use crate::config::SearchConfig;
use crate::rag::context_assembler::ContextItem;
use crate::search::tokenize::tokenize;
use crate::search::{reciprocal_rank_fusion, FusedDocument, LexicalScorer, SemanticScorer};
use crate::storage::{BlobStore, DocumentStore, Retrievable};
use crate::types::{SourceDocument, SourceKind, TicketSolution};

/// Sources served from local document stores. Tickets only come from the
/// external ticket system.
pub const LOCAL_SOURCES: [SourceKind; 4] = [
    SourceKind::TicketSolutions,
    SourceKind::Documentation,
    SourceKind::Articles,
    SourceKind::Reference,
];

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub source: SourceKind,
    pub documents: usize,
    pub embedded: usize,
    pub ready: bool,
}

pub struct KnowledgeBase {
    solutions: DocumentStore<TicketSolution>,
    documentation: DocumentStore<SourceDocument>,
    articles: DocumentStore<SourceDocument>,
    reference: DocumentStore<SourceDocument>,
    lexical: LexicalScorer,
    semantic: SemanticScorer,
    rrf_k: usize,
    candidate_multiplier: usize,
}

impl KnowledgeBase {
    pub fn new(blob: Arc<dyn BlobStore>, search: &SearchConfig) -> Self {
        Self {
            solutions: DocumentStore::new(SourceKind::TicketSolutions, blob.clone()),
            documentation: DocumentStore::new(SourceKind::Documentation, blob.clone()),
            articles: DocumentStore::new(SourceKind::Articles, blob.clone()),
            reference: DocumentStore::new(SourceKind::Reference, blob),
            lexical: LexicalScorer::new(search.max_usage_boost),
            semantic: SemanticScorer::new(search.semantic_floor),
            rrf_k: search.rrf_k,
            candidate_multiplier: search.candidate_multiplier.max(1),
        }
    }

    /// Load every store once; concurrent callers share the same loads.
    pub async fn ensure_initialized(&self) -> Result<()> {
        futures::try_join!(
            self.solutions.ensure_initialized(),
            self.documentation.ensure_initialized(),
            self.articles.ensure_initialized(),
            self.reference.ensure_initialized(),
        )?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.solutions.is_ready()
            && self.documentation.is_ready()
            && self.articles.is_ready()
            && self.reference.is_ready()
    }

    pub fn solutions(&self) -> &DocumentStore<TicketSolution> {
        &self.solutions
    }

    /// Document store for a `SourceDocument`-backed source.
    pub fn documents(&self, kind: SourceKind) -> Option<&DocumentStore<SourceDocument>> {
        match kind {
            SourceKind::Documentation => Some(&self.documentation),
            SourceKind::Articles => Some(&self.articles),
            SourceKind::Reference => Some(&self.reference),
            SourceKind::Tickets | SourceKind::TicketSolutions => None,
        }
    }

    fn fuse<T: Retrievable>(
        &self,
        store: &DocumentStore<T>,
        terms: &[String],
        embedding: Option<&[f32]>,
        top_n: usize,
    ) -> Vec<FusedDocument<T>> {
        let docs = store.snapshot();
        let candidates = top_n * self.candidate_multiplier;
        let lexical = self.lexical.search_terms(terms, &docs, candidates);
        let semantic = embedding
            .map(|e| self.semantic.score_with_embedding(e, &docs, candidates))
            .unwrap_or_default();
        reciprocal_rank_fusion(lexical, semantic, self.rrf_k, top_n)
    }

    /// Lexical + semantic ranking of one local source, fused with RRF.
    pub fn search(&self, kind: SourceKind, query: &str, embedding: Option<&[f32]>, top_n: usize) -> Vec<ContextItem> {
        let terms = tokenize(query);
        let items: Vec<ContextItem> = match kind {
            SourceKind::TicketSolutions => self
                .fuse(&self.solutions, &terms, embedding, top_n)
                .iter()
                .map(|f| ContextItem::from_fused(kind, f))
                .collect(),
            other => match self.documents(other) {
                Some(store) => self
                    .fuse(store, &terms, embedding, top_n)
                    .iter()
                    .map(|f| ContextItem::from_fused(kind, f))
                    .collect(),
                None => Vec::new(),
            },
        };
        tracing::debug!(source = %kind, hits = items.len(), "Local source searched");
        items
    }

    /// The single most relevant local document for `query`, across all local sources.
    pub fn best_match(&self, query: &str, embedding: Option<&[f32]>) -> Option<ContextItem> {
        LOCAL_SOURCES
            .iter()
            .filter_map(|kind| self.search(*kind, query, embedding, 1).into_iter().next())
            .max_by(|a, b| {
                a.relevance
                    .unwrap_or(0.0)
                    .partial_cmp(&b.relevance.unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
                    // Equal relevance keeps the higher-priority source.
                    .then(b.source.cmp(&a.source))
            })
    }

    pub async fn append_keyword(&self, kind: SourceKind, id: &str, keyword: &str) -> Result<bool> {
        match kind {
            SourceKind::TicketSolutions => self.solutions.append_keyword(id, keyword).await,
            other => match self.documents(other) {
                Some(store) => store.append_keyword(id, keyword).await,
                None => Ok(false),
            },
        }
    }

    pub async fn persist(&self, kind: SourceKind) -> Result<()> {
        match kind {
            SourceKind::TicketSolutions => self.solutions.persist().await,
            other => match self.documents(other) {
                Some(store) => store.persist().await,
                None => Ok(()),
            },
        }
    }

    pub async fn persist_all(&self) -> Result<()> {
        for kind in LOCAL_SOURCES {
            self.persist(kind).await?;
        }
        Ok(())
    }

    pub fn stats(&self) -> Vec<StoreStats> {
        let mut stats = vec![store_stats(&self.solutions)];
        stats.extend([&self.documentation, &self.articles, &self.reference].into_iter().map(store_stats));
        stats
    }
}

fn store_stats<T: Retrievable>(store: &DocumentStore<T>) -> StoreStats {
    let docs = store.snapshot();
    StoreStats {
        source: store.kind(),
        documents: docs.len(),
        embedded: docs.iter().filter(|d| !d.embedding().is_empty()).count(),
        ready: store.is_ready(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SupportConfig;
    use crate::storage::MemoryBlobStore;

    async fn kb() -> KnowledgeBase {
        let kb = KnowledgeBase::new(Arc::new(MemoryBlobStore::new()), &SupportConfig::default().search);
        let mut vpn = SourceDocument::new("doc-vpn", "Configurar VPN");
        vpn.category = "Red".into();
        vpn.keywords = "vpn, forticlient".into();
        vpn.description = "Pasos para instalar el cliente VPN".into();
        kb.documents(SourceKind::Documentation).unwrap().upsert(vpn).await.unwrap();

        let mut sol = TicketSolution::new("MT-10", "Outlook no sincroniza");
        sol.system = "Correo".into();
        sol.keywords = "outlook, ost".into();
        sol.solution = "Regenerar el archivo OST".into();
        kb.solutions().upsert(sol).await.unwrap();
        kb
    }

    #[tokio::test]
    async fn test_search_returns_fused_items() {
        let kb = kb().await;
        kb.ensure_initialized().await.unwrap();
        assert!(kb.is_ready());

        let items = kb.search(SourceKind::Documentation, "instalar vpn", None, 5);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "doc-vpn");
        // Lexical rank 1 only: (1/61) / (2/61)
        assert!((items[0].relevance.unwrap() - 0.5).abs() < 1e-6);

        assert!(kb.search(SourceKind::Tickets, "vpn", None, 5).is_empty());
    }

    #[tokio::test]
    async fn test_best_match_across_sources() {
        let kb = kb().await;
        let best = kb.best_match("outlook no sincroniza", None).unwrap();
        assert_eq!(best.source, SourceKind::TicketSolutions);
        assert_eq!(best.id, "MT-10");
    }

    #[tokio::test]
    async fn test_append_and_stats() {
        let kb = kb().await;
        assert!(kb.append_keyword(SourceKind::Documentation, "doc-vpn", "anyconnect").await.unwrap());
        assert!(!kb.append_keyword(SourceKind::Documentation, "doc-vpn", "anyconnect").await.unwrap());
        assert!(!kb.append_keyword(SourceKind::Tickets, "x", "y").await.unwrap());

        let stats = kb.stats();
        assert_eq!(stats.len(), 4);
        assert_eq!(stats.iter().map(|s| s.documents).sum::<usize>(), 2);
    }
}
