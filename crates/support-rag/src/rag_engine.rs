use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::{CacheTier, CachedAnswer, ExactCache, SemanticCache};
use crate::cancellation::CancellationToken;
use crate::clients::{text_search_jql, DocumentationSystem, TicketSystem};
use crate::config::SupportConfig;
use crate::embeddings::{CachedEmbeddings, EmbeddingProvider};
use crate::error::{SupportError, SupportResult};
use crate::feedback::{EnrichmentTarget, FeedbackInput, FeedbackLoop, FeedbackOutcome, FeedbackStats};
use crate::knowledge::{KnowledgeBase, StoreStats, LOCAL_SOURCES};
use crate::llm::{token_channel, ChatMessage, GenerationOptions, GenerationProvider, TokenStream};
use crate::rag::{
    decompose_query, Classification, ConfidenceGate, ContextAssembler, ContextItem, GateDecision,
    IntentClassifier, LlmIntentClassifier, QueryExpander, SearchWeights,
};
use crate::search::tokenize::tokenize;
use crate::storage::{BlobStore, FileBlobStore};
use crate::types::{CachedResponse, ConversationTurn, FailurePattern, SourceDocument, SourceKind, TicketSolution};
use crate::worker::{BackgroundQueue, QueueStats};

const DEFAULT_SYSTEM_PROMPT: &str = "Eres un asistente de soporte de TI. Responde solo con la \
información del contexto proporcionado. Copia los enlaces exactamente como aparecen. \
Si el contexto no alcanza, dilo y sugiere abrir un ticket.";

/// External collaborators of the engine. Everything is optional; missing
/// providers disable the features that need them.
#[derive(Default, Clone)]
pub struct Providers {
    pub blob_store: Option<Arc<dyn BlobStore>>,
    pub embedder: Option<Arc<dyn EmbeddingProvider>>,
    pub generator: Option<Arc<dyn GenerationProvider>>,
    pub ticket_system: Option<Arc<dyn TicketSystem>>,
    pub documentation: Option<Arc<dyn DocumentationSystem>>,
}

impl Providers {
    pub fn with_blob_store(mut self, store: Arc<dyn BlobStore>) -> Self {
        self.blob_store = Some(store);
        self
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn with_generator(mut self, generator: Arc<dyn GenerationProvider>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn with_ticket_system(mut self, tickets: Arc<dyn TicketSystem>) -> Self {
        self.ticket_system = Some(tickets);
        self
    }

    pub fn with_documentation(mut self, docs: Arc<dyn DocumentationSystem>) -> Self {
        self.documentation = Some(docs);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportAnswer {
    pub answer: String,
    /// `None` when served from the exact cache before classification.
    pub classification: Option<Classification>,
    pub sources: Vec<String>,
    pub cache_tier: Option<CacheTier>,
    /// The confidence gate refused generation; `answer` is the canned message.
    pub gated: bool,
    /// Generation was unavailable or failed; `answer` is the canned message.
    pub degraded: bool,
    pub confidence: f32,
}

impl SupportAnswer {
    fn cached(hit: CachedAnswer, tier: CacheTier, classification: Option<Classification>) -> Self {
        Self {
            answer: hit.answer,
            classification,
            sources: hit.sources,
            cache_tier: Some(tier),
            gated: false,
            degraded: false,
            confidence: 1.0,
        }
    }
}

/// Streamed counterpart of [`SupportAnswer`]. Gated and cached answers arrive
/// as a single chunk.
pub struct AnswerStream {
    pub classification: Option<Classification>,
    pub sources: Vec<String>,
    pub cache_tier: Option<CacheTier>,
    pub gated: bool,
    pub degraded: bool,
    pub confidence: f32,
    /// Check [`TokenStream::failure`] after the stream ends; a broken
    /// generation leaves the answer truncated and uncached.
    pub tokens: TokenStream,
}

impl From<SupportAnswer> for AnswerStream {
    fn from(answer: SupportAnswer) -> Self {
        Self {
            classification: answer.classification,
            sources: answer.sources,
            cache_tier: answer.cache_tier,
            gated: answer.gated,
            degraded: answer.degraded,
            confidence: answer.confidence,
            tokens: TokenStream::once(answer.answer),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub stores: Vec<StoreStats>,
    pub exact_cache_entries: usize,
    pub semantic_cache_entries: usize,
    pub background: QueueStats,
    pub feedback: FeedbackStats,
}

/// Everything needed to run generation once retrieval has passed the gate.
struct GenerationPlan {
    messages: Vec<ChatMessage>,
    classification: Classification,
    sources: Vec<String>,
    confidence: f32,
    embedding: Option<Vec<f32>>,
    cacheable: bool,
    /// Canned answer used when generation cannot produce one.
    fallback: String,
}

impl GenerationPlan {
    fn degraded(self, error: &SupportError) -> SupportAnswer {
        tracing::warn!(
            code = error.code(),
            error = %error,
            intent = %self.classification.intent,
            "Generation unavailable, answering with fallback"
        );
        SupportAnswer {
            answer: self.fallback,
            classification: Some(self.classification),
            sources: self.sources,
            cache_tier: None,
            gated: false,
            degraded: true,
            confidence: self.confidence,
        }
    }
}

enum Prepared {
    Done(SupportAnswer),
    Generate(GenerationPlan),
}

pub struct SupportEngine {
    config: SupportConfig,
    kb: Arc<KnowledgeBase>,
    classifier: IntentClassifier,
    expander: QueryExpander,
    assembler: ContextAssembler,
    gate: ConfidenceGate,
    exact_cache: Arc<ExactCache>,
    semantic_cache: Arc<SemanticCache>,
    feedback: FeedbackLoop,
    queue: BackgroundQueue,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    generator: Option<Arc<dyn GenerationProvider>>,
    ticket_system: Option<Arc<dyn TicketSystem>>,
    documentation: Option<Arc<dyn DocumentationSystem>>,
    provider_timeout: Duration,
}

impl SupportEngine {
    /// Build an engine on the current Tokio runtime.
    pub fn new(config: SupportConfig, providers: Providers) -> SupportResult<Self> {
        config.validate().map_err(SupportError::InvalidConfig)?;

        let blob: Arc<dyn BlobStore> = match providers.blob_store {
            Some(store) => store,
            None => Arc::new(FileBlobStore::new(config.data_dir.join("stores"))),
        };

        let embedder: Option<Arc<dyn EmbeddingProvider>> = match providers.embedder {
            Some(inner) if config.cache.embedding_cache_size > 0 => {
                Some(Arc::new(CachedEmbeddings::new(inner, config.cache.embedding_cache_size)))
            }
            other => other,
        };

        let mut classifier = IntentClassifier::from_config(&config.classifier)?;
        if config.classifier.llm_fallback {
            if let Some(generator) = &providers.generator {
                classifier = classifier.with_fallback(Arc::new(LlmIntentClassifier::new(
                    generator.clone(),
                    config.generation.classification_max_tokens,
                )));
            }
        }

        let queue = BackgroundQueue::spawn(config.learning.background_queue_capacity)?;
        let kb = Arc::new(KnowledgeBase::new(blob.clone(), &config.search));
        let feedback = FeedbackLoop::new(
            &config.learning,
            config.classifier.domain_rules.clone(),
            blob,
            kb.clone(),
            embedder.clone(),
            queue.clone(),
        );

        tracing::info!(
            embedder = embedder.is_some(),
            generator = providers.generator.is_some(),
            tickets = providers.ticket_system.is_some(),
            documentation = providers.documentation.is_some(),
            "Support engine created"
        );

        Ok(Self {
            kb,
            classifier,
            expander: QueryExpander::default(),
            assembler: ContextAssembler::new(
                config.context.max_items_per_source,
                config.context.max_chars_per_item,
            ),
            gate: ConfidenceGate::from_config(&config.gate),
            exact_cache: Arc::new(ExactCache::new(
                config.cache.exact_capacity,
                Duration::from_secs(config.cache.exact_ttl_secs),
            )),
            semantic_cache: Arc::new(SemanticCache::new(
                config.cache.semantic_capacity,
                config.cache.semantic_threshold,
            )),
            feedback,
            queue,
            embedder,
            generator: providers.generator,
            ticket_system: providers.ticket_system,
            documentation: providers.documentation,
            provider_timeout: Duration::from_secs(config.search.provider_timeout_secs),
            config,
        })
    }

    pub fn config(&self) -> &SupportConfig {
        &self.config
    }

    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.kb
    }

    /// Load every local store and the feedback state.
    pub async fn ensure_initialized(&self) -> SupportResult<()> {
        self.kb.ensure_initialized().await.map_err(storage_error)?;
        self.feedback.ensure_loaded().await.map_err(storage_error)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Answering
    // ------------------------------------------------------------------

    pub async fn answer(
        &self,
        query: &str,
        history: &[ConversationTurn],
        cancel: Option<&CancellationToken>,
    ) -> SupportResult<SupportAnswer> {
        let plan = match self.prepare(query, history, cancel).await? {
            Prepared::Done(answer) => return Ok(answer),
            Prepared::Generate(plan) => plan,
        };
        let Some(generator) = self.generator.as_ref() else {
            return Ok(plan.degraded(&SupportError::ConfigurationMissing("generation provider")));
        };

        let options = self.generation_options();
        let call = self.with_timeout(generator.name(), generator.generate(&plan.messages, &options));
        let generated = cancellable(cancel, call).await?;
        let text = match generated {
            Ok(text) => text,
            Err(e) => return Ok(plan.degraded(&e)),
        };

        if plan.cacheable {
            store_in_caches(
                &self.exact_cache,
                &self.semantic_cache,
                &self.queue,
                query,
                &text,
                &plan.sources,
                plan.embedding.clone(),
            );
        }

        tracing::info!(
            intent = %plan.classification.intent,
            confidence = plan.confidence,
            sources = plan.sources.len(),
            "Answer generated"
        );
        Ok(SupportAnswer {
            answer: text,
            classification: Some(plan.classification),
            sources: plan.sources,
            cache_tier: None,
            gated: false,
            degraded: false,
            confidence: plan.confidence,
        })
    }

    /// Like [`answer`](Self::answer) but streams the generated text. Caches
    /// are written only when the stream completes without error.
    pub async fn answer_stream(
        &self,
        query: &str,
        history: &[ConversationTurn],
        cancel: Option<&CancellationToken>,
    ) -> SupportResult<AnswerStream> {
        let plan = match self.prepare(query, history, cancel).await? {
            Prepared::Done(answer) => return Ok(answer.into()),
            Prepared::Generate(plan) => plan,
        };
        let Some(generator) = self.generator.as_ref() else {
            return Ok(plan.degraded(&SupportError::ConfigurationMissing("generation provider")).into());
        };

        let options = self.generation_options();
        let call = self.with_timeout(generator.name(), generator.generate_stream(&plan.messages, &options));
        let opened = cancellable(cancel, call).await?;
        let mut upstream = match opened {
            Ok(stream) => stream,
            Err(e) => return Ok(plan.degraded(&e).into()),
        };

        let (tx, tokens) = token_channel();
        let exact = self.exact_cache.clone();
        let semantic = self.semantic_cache.clone();
        let queue = self.queue.clone();
        let cache_query = plan.cacheable.then(|| query.to_string());
        let sources = plan.sources.clone();
        let embedding = plan.embedding.clone();
        tokio::spawn(async move {
            let mut full = String::new();
            let mut receiver_alive = true;
            while let Some(chunk) = upstream.next().await {
                full.push_str(&chunk);
                if receiver_alive && tx.send(Ok(chunk)).await.is_err() {
                    receiver_alive = false;
                }
            }
            match upstream.failure().map(str::to_string) {
                Some(reason) => {
                    tracing::warn!(error = %reason, chars = full.len(), "Generation stream broke, answer not cached");
                    let _ = tx.send(Err(anyhow::anyhow!("generation stream interrupted: {}", reason))).await;
                }
                None => {
                    if let Some(query) = cache_query {
                        if receiver_alive && !full.trim().is_empty() {
                            store_in_caches(&exact, &semantic, &queue, &query, &full, &sources, embedding);
                        }
                    }
                }
            }
            // Dropping the sender ends the caller's stream after the cache decision.
            drop(tx);
        });

        Ok(AnswerStream {
            classification: Some(plan.classification),
            sources: plan.sources,
            cache_tier: None,
            gated: false,
            degraded: false,
            confidence: plan.confidence,
            tokens,
        })
    }

    async fn prepare(
        &self,
        query: &str,
        history: &[ConversationTurn],
        cancel: Option<&CancellationToken>,
    ) -> SupportResult<Prepared> {
        let query = query.trim();
        if query.is_empty() {
            return Err(SupportError::ValidationFailure("empty query".to_string()));
        }
        if cancel.is_some_and(|t| t.is_cancelled()) {
            return Err(SupportError::Cancelled);
        }

        let use_cache = self.config.cache.enabled && history.is_empty();
        if use_cache {
            if let Some(hit) = self.exact_cache.get(query) {
                tracing::info!(query = %query, tier = "exact", "Cache hit");
                return Ok(Prepared::Done(SupportAnswer::cached(hit, CacheTier::Exact, None)));
            }
        }

        let classification = cancellable(cancel, self.classifier.classify(query, history)).await?;
        let weights = SearchWeights::for_intent(classification.intent, self.config.context.max_items_per_source);
        tracing::info!(
            query = %query,
            intent = %classification.intent,
            rule = ?classification.source,
            tickets = classification.ticket_ids.len(),
            "Query classified"
        );

        // Network-bound calls run together and are abandoned as a whole on cancel.
        let fanout = async {
            tokio::join!(
                self.embed_query(query),
                self.search_documentation(query, &weights),
                self.lookup_tickets(&classification.ticket_ids),
                self.search_tickets(query, &weights),
            )
        };
        let (embedding, remote_docs, referenced, searched) = cancellable(cancel, fanout).await?;

        if use_cache {
            if let Some(emb) = embedding.as_deref() {
                if let Some((hit, similarity)) = self.semantic_cache.lookup(emb) {
                    tracing::info!(query = %query, tier = "semantic", similarity, "Cache hit");
                    return Ok(Prepared::Done(SupportAnswer::cached(
                        hit,
                        CacheTier::Semantic,
                        Some(classification),
                    )));
                }
            }
        }

        // Stores and feedback state (exemplars included) load once.
        self.ensure_initialized().await?;
        let variants = self.query_variants(query);

        let mut items: Vec<ContextItem> = Vec::new();
        items.extend(referenced);
        items.extend(searched);
        for kind in LOCAL_SOURCES {
            let budget = weights.budget(kind);
            if budget == 0 {
                continue;
            }
            items.extend(self.kb.search(kind, query, embedding.as_deref(), budget));
            for variant in &variants {
                items.extend(self.kb.search(kind, variant, None, budget));
            }
        }
        items.extend(remote_docs);

        let context = self.assembler.assemble(items, &weights);
        let evidence: Vec<&ContextItem> = context.items().collect();
        let decision = self.gate.evaluate(evidence.iter().copied());
        tracing::debug!(
            items = evidence.len(),
            sections = context.sections.len(),
            best = decision.best(),
            "Context assembled"
        );

        let best = decision.best();
        let fallback = self.gate.no_information(&self.gate.fallback_link(evidence.iter().copied()));
        if let GateDecision::Refuse { message, .. } = decision {
            return Ok(Prepared::Done(SupportAnswer {
                answer: message,
                classification: Some(classification),
                sources: context.source_refs(),
                cache_tier: None,
                gated: true,
                degraded: false,
                confidence: best,
            }));
        }

        let exemplars = match embedding.as_deref() {
            Some(emb) => self.feedback.exemplars().find_similar(
                emb,
                self.config.search.exemplar_similarity,
                self.config.search.max_exemplars,
            ),
            None => Vec::new(),
        };

        let system_prompt = self
            .config
            .generation
            .system_prompt
            .as_deref()
            .unwrap_or(DEFAULT_SYSTEM_PROMPT);
        let messages = build_answer_messages(system_prompt, &exemplars, history, &context.text, query);

        Ok(Prepared::Generate(GenerationPlan {
            messages,
            sources: context.source_refs(),
            classification,
            confidence: best,
            embedding,
            cacheable: use_cache,
            fallback,
        }))
    }

    fn generation_options(&self) -> GenerationOptions {
        GenerationOptions::new(self.config.generation.max_tokens, self.config.generation.temperature)
    }

    /// Synonym-expanded and decomposed forms of the query, original excluded.
    fn query_variants(&self, query: &str) -> Vec<String> {
        let mut variants = Vec::new();
        if self.config.search.enable_query_expansion {
            if let Some(expanded) = self.expander.expand(query).variant() {
                variants.push(expanded);
            }
        }
        if self.config.search.enable_decomposition {
            let decomposed = decompose_query(query);
            if decomposed.is_decomposed() {
                tracing::debug!(strategy = ?decomposed.strategy, parts = decomposed.sub_queries.len(), "Query decomposed");
                variants.extend(decomposed.sub_queries);
            }
        }
        variants.retain(|v| v.trim() != query);
        variants
    }

    async fn with_timeout<T>(
        &self,
        provider: &'static str,
        call: impl Future<Output = anyhow::Result<T>>,
    ) -> SupportResult<T> {
        match tokio::time::timeout(self.provider_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(SupportError::from_provider(provider, &e)),
            Err(elapsed) => Err(SupportError::ProviderTimeout {
                provider,
                message: elapsed.to_string(),
            }),
        }
    }

    async fn embed_query(&self, query: &str) -> Option<Vec<f32>> {
        let provider = self.embedder.as_ref()?;
        match self.with_timeout(provider.name(), provider.embed(query)).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Query embedding failed, lexical only");
                None
            }
        }
    }

    async fn search_documentation(&self, query: &str, weights: &SearchWeights) -> Vec<ContextItem> {
        let Some(docs) = self.documentation.as_ref() else {
            return Vec::new();
        };
        if weights.budget(SourceKind::Documentation) == 0 {
            return Vec::new();
        }
        match self
            .with_timeout("documentation", docs.search(query, self.config.search.documentation_top))
            .await
        {
            Ok(hits) => hits
                .iter()
                .map(|h| ContextItem::from_documentation(SourceKind::Documentation, h))
                .collect(),
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Documentation search failed");
                Vec::new()
            }
        }
    }

    /// Fetch referenced tickets concurrently. Only ids that pass validation are requested.
    async fn lookup_tickets(&self, ids: &[String]) -> Vec<ContextItem> {
        let Some(tickets) = self.ticket_system.as_ref() else {
            return Vec::new();
        };
        let detector = self.classifier.detector();
        let valid: Vec<String> = ids
            .iter()
            .filter_map(|id| match detector.validate(id) {
                Ok(v) => Some(v),
                Err(e) => {
                    tracing::warn!(ticket = %id, error = %e, "Skipping invalid ticket id");
                    None
                }
            })
            .collect();

        let lookups = valid.iter().map(|id| self.with_timeout("ticket_system", tickets.get_ticket(id)));
        futures::future::join_all(lookups)
            .await
            .into_iter()
            .zip(&valid)
            .filter_map(|(result, id)| match result {
                Ok(Some(ticket)) => Some(ContextItem::from_ticket(&ticket)),
                Ok(None) => {
                    tracing::info!(ticket = %id, "Referenced ticket not found");
                    None
                }
                Err(e) => {
                    tracing::warn!(ticket = %id, code = e.code(), error = %e, "Ticket lookup failed");
                    None
                }
            })
            .collect()
    }

    /// Full-text search of resolved tickets, only for intents that boost tickets.
    async fn search_tickets(&self, query: &str, weights: &SearchWeights) -> Vec<ContextItem> {
        let Some(tickets) = self.ticket_system.as_ref() else {
            return Vec::new();
        };
        if weights.weight(SourceKind::Tickets) <= 1.0 {
            return Vec::new();
        }
        let Some(jql) = text_search_jql(&tokenize(query)) else {
            return Vec::new();
        };
        let max = self.config.search.ticket_search_max.min(weights.budget(SourceKind::Tickets));
        match self.with_timeout("ticket_system", tickets.search(&jql, max)).await {
            Ok(batch) => batch.tickets.iter().map(ContextItem::from_ticket).collect(),
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "Ticket search failed");
                Vec::new()
            }
        }
    }

    // ------------------------------------------------------------------
    // Feedback
    // ------------------------------------------------------------------

    pub async fn submit_feedback(&self, input: FeedbackInput) -> SupportResult<FeedbackOutcome> {
        self.feedback.submit(input).await.map_err(storage_error)
    }

    pub async fn mark_feedback_reviewed(&self, id: uuid::Uuid) -> SupportResult<()> {
        self.feedback.mark_reviewed(id).await
    }

    pub async fn apply_feedback(&self, id: uuid::Uuid) -> SupportResult<Vec<EnrichmentTarget>> {
        self.feedback.apply(id).await
    }

    pub async fn dismiss_feedback(&self, id: uuid::Uuid) -> SupportResult<()> {
        self.feedback.dismiss(id).await
    }

    pub fn reset_pattern_alert(&self, signature: &str) -> SupportResult<()> {
        self.feedback.reset_alert(signature)
    }

    pub fn alerted_patterns(&self) -> Vec<FailurePattern> {
        self.feedback.alerted_patterns()
    }

    pub fn feedback_stats(&self) -> FeedbackStats {
        self.feedback.stats()
    }

    // ------------------------------------------------------------------
    // Store maintenance
    // ------------------------------------------------------------------

    /// Increment a solution's validation count and persist. Returns the new count.
    pub async fn validate_solution(&self, ticket_id: &str) -> SupportResult<u32> {
        let count = self
            .kb
            .solutions()
            .update(ticket_id, |s| {
                s.validation_count += 1;
                s.validation_count
            })
            .await
            .map_err(storage_error)?
            .ok_or_else(|| SupportError::NotFound(format!("ticket solution {}", ticket_id)))?;
        self.kb.persist(SourceKind::TicketSolutions).await.map_err(storage_error)?;
        tracing::info!(ticket = %ticket_id, validations = count, "Solution validated");
        Ok(count)
    }

    pub async fn promote_solution(&self, ticket_id: &str) -> SupportResult<()> {
        self.kb
            .solutions()
            .update(ticket_id, |s| s.promoted = true)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| SupportError::NotFound(format!("ticket solution {}", ticket_id)))?;
        self.kb.persist(SourceKind::TicketSolutions).await.map_err(storage_error)?;
        tracing::info!(ticket = %ticket_id, "Solution promoted");
        Ok(())
    }

    /// Insert or replace a document, embedding it first when it has no vector.
    pub async fn upsert_document(&self, kind: SourceKind, mut doc: SourceDocument) -> SupportResult<bool> {
        let store = self
            .kb
            .documents(kind)
            .ok_or_else(|| SupportError::ValidationFailure(format!("{} does not hold documents", kind)))?;
        if doc.embedding.is_empty() {
            if let Some(v) = self.embed_query(&format!("{} {}", doc.name, doc.description)).await {
                doc.embedding = v;
            }
        }
        let replaced = store.upsert(doc).await.map_err(storage_error)?;
        self.exact_cache.clear();
        self.semantic_cache.clear();
        Ok(replaced)
    }

    pub async fn upsert_solution(&self, mut solution: TicketSolution) -> SupportResult<bool> {
        if solution.embedding.is_empty() {
            let text = format!("{} {} {}", solution.title, solution.problem, solution.solution);
            if let Some(v) = self.embed_query(&text).await {
                solution.embedding = v;
            }
        }
        let replaced = self.kb.solutions().upsert(solution).await.map_err(storage_error)?;
        self.exact_cache.clear();
        self.semantic_cache.clear();
        Ok(replaced)
    }

    pub async fn delete_document(&self, kind: SourceKind, id: &str) -> SupportResult<bool> {
        let removed = match kind {
            SourceKind::TicketSolutions => self.kb.solutions().delete(id).await,
            other => match self.kb.documents(other) {
                Some(store) => store.delete(id).await,
                None => return Err(SupportError::ValidationFailure(format!("{} does not hold documents", kind))),
            },
        }
        .map_err(storage_error)?;
        if removed {
            self.exact_cache.clear();
            self.semantic_cache.clear();
        }
        Ok(removed)
    }

    /// Write every store and the feedback state now.
    pub async fn persist(&self) -> SupportResult<()> {
        self.kb.persist_all().await.map_err(storage_error)?;
        self.feedback.persist().await.map_err(storage_error)
    }

    pub fn clear_caches(&self) {
        self.exact_cache.clear();
        self.semantic_cache.clear();
    }

    /// Wait for queued background work (cache population, persistence).
    pub async fn drain_background(&self) {
        self.queue.drain().await;
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            stores: self.kb.stats(),
            exact_cache_entries: self.exact_cache.len(),
            semantic_cache_entries: self.semantic_cache.len(),
            background: self.queue.stats(),
            feedback: self.feedback.stats(),
        }
    }
}

fn storage_error(e: anyhow::Error) -> SupportError {
    SupportError::Storage(format!("{:#}", e))
}

/// Await `fut` unless the token fires first.
async fn cancellable<T>(cancel: Option<&CancellationToken>, fut: impl Future<Output = T>) -> SupportResult<T> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!("Request cancelled");
                Err(SupportError::Cancelled)
            }
            value = fut => Ok(value),
        },
        None => Ok(fut.await),
    }
}

/// Exact tier synchronously, semantic tier through the background queue.
fn store_in_caches(
    exact: &ExactCache,
    semantic: &Arc<SemanticCache>,
    queue: &BackgroundQueue,
    query: &str,
    answer: &str,
    sources: &[String],
    embedding: Option<Vec<f32>>,
) {
    exact.put(
        query,
        CachedAnswer {
            answer: answer.to_string(),
            sources: sources.to_vec(),
        },
    );
    if let Some(embedding) = embedding {
        let semantic = semantic.clone();
        let response = CachedResponse::new(query, embedding, answer, sources.to_vec());
        queue.submit("semantic_cache_insert", async move {
            semantic.insert(response);
            Ok(())
        });
    }
}

fn build_answer_messages(
    system_prompt: &str,
    exemplars: &[CachedResponse],
    history: &[ConversationTurn],
    context: &str,
    query: &str,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2 + exemplars.len() * 2 + history.len() * 2);
    messages.push(ChatMessage::system(system_prompt));
    for ex in exemplars {
        messages.push(ChatMessage::user(ex.query.clone()));
        messages.push(ChatMessage::assistant(ex.answer.clone()));
    }
    for turn in history {
        messages.push(ChatMessage::user(turn.user.clone()));
        messages.push(ChatMessage::assistant(turn.assistant.clone()));
    }
    messages.push(ChatMessage::user(format!("Contexto:\n{}\n\nPregunta: {}", context, query)));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::DocumentationHit;
    use crate::rag::IntentSource;
    use crate::feedback::exemplars::EXEMPLAR_BLOB;
    use crate::storage::{load_collection, save_collection, MemoryBlobStore};
    use crate::test_support::{HashEmbeddings, MemoryDocumentationSystem, MemoryTicketSystem, ScriptedGenerator};
    use crate::types::Intent;

    struct Harness {
        engine: SupportEngine,
        generator: Arc<ScriptedGenerator>,
        tickets: Arc<MemoryTicketSystem>,
        docs: Arc<MemoryDocumentationSystem>,
    }

    async fn harness_with(config: SupportConfig, generator: ScriptedGenerator) -> Harness {
        harness_on(Arc::new(MemoryBlobStore::new()), config, generator).await
    }

    async fn harness_on(blob: Arc<MemoryBlobStore>, config: SupportConfig, generator: ScriptedGenerator) -> Harness {
        let embedder = Arc::new(HashEmbeddings::new(64));
        let generator = Arc::new(generator);
        let tickets = Arc::new(
            MemoryTicketSystem::new()
                .with_ticket("MT-799225", "VPN cae cada hora", "Se actualizo FortiClient a 7.2")
                .with_search_results(&["MT-799225"]),
        );
        let docs = Arc::new(MemoryDocumentationSystem::new(Vec::new()));

        let providers = Providers::default()
            .with_blob_store(blob)
            .with_embedder(embedder.clone())
            .with_generator(generator.clone())
            .with_ticket_system(tickets.clone())
            .with_documentation(docs.clone());
        let engine = SupportEngine::new(config, providers).unwrap();

        let mut vpn = SourceDocument::new("doc-vpn", "Configurar VPN FortiClient");
        vpn.keywords = "vpn, forticlient".into();
        vpn.link = Some("https://wiki.example.com/vpn".into());
        vpn.embedding = embedder.vector_for("configurar vpn forticlient");
        engine.upsert_document(SourceKind::Documentation, vpn).await.unwrap();

        let mut sol = TicketSolution::new("MT-100", "Outlook no sincroniza");
        sol.system = "Correo".into();
        sol.solution = "Regenerar el archivo OST".into();
        engine.upsert_solution(sol).await.unwrap();

        Harness { engine, generator, tickets, docs }
    }

    async fn harness() -> Harness {
        harness_with(SupportConfig::default(), ScriptedGenerator::new(Vec::new())).await
    }

    #[tokio::test]
    async fn test_repeated_query_served_from_exact_cache() {
        let h = harness().await;
        let first = h.engine.answer("como configuro la vpn forticlient", &[], None).await.unwrap();
        assert!(!first.gated);
        assert_eq!(first.cache_tier, None);
        assert!(first.sources.iter().any(|s| s.contains("https://wiki.example.com/vpn")));

        let second = h.engine.answer("Cómo configuro la VPN FortiClient?", &[], None).await.unwrap();
        assert_eq!(second.cache_tier, Some(CacheTier::Exact));
        assert_eq!(second.answer, first.answer);
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_reordered_query_served_from_semantic_cache() {
        let h = harness().await;
        h.engine.answer("como configuro la vpn forticlient", &[], None).await.unwrap();
        h.engine.drain_background().await;
        assert_eq!(h.engine.stats().semantic_cache_entries, 1);

        let hit = h.engine.answer("forticlient vpn configuro", &[], None).await.unwrap();
        assert_eq!(hit.cache_tier, Some(CacheTier::Semantic));
        assert_eq!(hit.classification.unwrap().intent, Intent::Network);
        assert_eq!(h.generator.calls(), 1);
    }

    #[tokio::test]
    async fn test_history_bypasses_cache() {
        let h = harness().await;
        let history = vec![ConversationTurn::new("hola", "Hola, en que te ayudo?")];
        h.engine.answer("como configuro la vpn forticlient", &history, None).await.unwrap();
        let again = h.engine.answer("como configuro la vpn forticlient", &history, None).await.unwrap();
        assert_eq!(again.cache_tier, None);
        assert_eq!(h.generator.calls(), 2);
        assert_eq!(h.engine.stats().exact_cache_entries, 0);

        let call = h.generator.last_call().unwrap();
        assert_eq!(call.messages[1].content, "hola");
    }

    #[tokio::test]
    async fn test_weak_evidence_refuses_without_generation() {
        let mut config = SupportConfig::default();
        config.classifier.llm_fallback = false;
        let h = harness_with(config, ScriptedGenerator::new(Vec::new())).await;

        let answer = h.engine.answer("el comedor cierra tarde hoy", &[], None).await.unwrap();
        assert!(answer.gated);
        assert!(answer.confidence < 0.65);
        let gate = &h.engine.config().gate;
        assert_eq!(
            answer.answer,
            format!("{}\n{}", gate.no_information_message, gate.default_ticket_link)
        );
        assert_eq!(h.generator.calls(), 0);
        assert_eq!(h.tickets.searches(), 0);
        assert_eq!(h.engine.stats().exact_cache_entries, 0);
    }

    #[tokio::test]
    async fn test_ticket_reference_overrides_domain() {
        let h = harness().await;
        let answer = h
            .engine
            .answer("la vpn sigue cayendo, ver MT-799225", &[], None)
            .await
            .unwrap();
        let classification = answer.classification.unwrap();
        assert_eq!(classification.intent, Intent::TicketLookup);
        assert_eq!(classification.source, IntentSource::TicketReference);
        assert_eq!(h.tickets.lookups(), 1);
        assert_eq!(h.tickets.searches(), 1);
        assert_eq!(h.docs.calls(), 1);

        let call = h.generator.last_call().unwrap();
        let prompt = &call.messages.last().unwrap().content;
        assert!(prompt.starts_with("Contexto:\n=== REFERENCED TICKETS ===\n[1] MT-799225 VPN cae cada hora"));
        assert!(prompt.contains("Link: https://tickets.example.com/browse/MT-799225"));
        // Looked up and searched, rendered once.
        assert_eq!(prompt.matches("[1] MT-799225").count(), 1);
    }

    #[tokio::test]
    async fn test_remote_documentation_reaches_context() {
        let h = harness().await;
        let hits = vec![DocumentationHit {
            title: "Impresoras de planta".into(),
            url: "https://docs.example.com/printers".into(),
            excerpt: "Agregar impresora por IP".into(),
            score: Some(0.9),
        }];
        let docs = Arc::new(MemoryDocumentationSystem::new(hits));
        let providers = Providers::default()
            .with_blob_store(Arc::new(MemoryBlobStore::new()))
            .with_generator(h.generator.clone())
            .with_documentation(docs);
        let engine = SupportEngine::new(SupportConfig::default(), providers).unwrap();

        let answer = engine.answer("agregar impresora de planta", &[], None).await.unwrap();
        assert!(!answer.gated);
        assert!(answer.sources.contains(&"Impresoras de planta (https://docs.example.com/printers)".to_string()));
    }

    #[tokio::test]
    async fn test_cancelled_token_aborts() {
        let h = harness().await;
        let token = CancellationToken::new();
        token.cancel();
        let result = h.engine.answer("como configuro la vpn forticlient", &[], Some(&token)).await;
        assert!(matches!(result, Err(SupportError::Cancelled)));
        assert_eq!(h.generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_slow_fanout_cancelled_midway() {
        let embedder = Arc::new(HashEmbeddings::new(16).with_delay(Duration::from_secs(30)));
        let generator = Arc::new(ScriptedGenerator::new(Vec::new()));
        let providers = Providers::default()
            .with_blob_store(Arc::new(MemoryBlobStore::new()))
            .with_embedder(embedder)
            .with_generator(generator.clone());
        let engine = SupportEngine::new(SupportConfig::default(), providers).unwrap();

        let token = CancellationToken::new();
        let canceller = {
            let token = token.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                token.cancel();
            })
        };
        let result = engine.answer("la vpn no conecta", &[], Some(&token)).await;
        canceller.await.unwrap();
        assert!(matches!(result, Err(SupportError::Cancelled)));
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn test_generation_failure_degrades_to_fallback() {
        let h = harness_with(SupportConfig::default(), ScriptedGenerator::failing()).await;
        let answer = h
            .engine
            .answer("como configuro la vpn forticlient", &[], None)
            .await
            .unwrap();
        assert!(answer.degraded);
        assert!(!answer.gated);
        assert!(answer.answer.starts_with(&h.engine.config().gate.no_information_message));
        assert_eq!(h.generator.calls(), 1);
        h.engine.drain_background().await;
        assert_eq!(h.engine.stats().exact_cache_entries, 0);
        assert_eq!(h.engine.stats().semantic_cache_entries, 0);

        let streamed = h
            .engine
            .answer_stream("como configuro la vpn forticlient", &[], None)
            .await
            .unwrap();
        assert!(streamed.degraded);
        assert!(streamed.tokens.collect().await.starts_with(&h.engine.config().gate.no_information_message));
    }

    #[tokio::test]
    async fn test_broken_stream_is_not_cached() {
        let h = harness_with(
            SupportConfig::default(),
            ScriptedGenerator::new(vec!["Abre FortiClient y conecta".into()]).with_broken_stream(),
        )
        .await;
        let mut stream = h
            .engine
            .answer_stream("como configuro la vpn forticlient", &[], None)
            .await
            .unwrap();
        let mut partial = String::new();
        while let Some(chunk) = stream.tokens.next().await {
            partial.push_str(&chunk);
        }
        assert_eq!(partial, "Abre FortiCli");
        assert!(stream.tokens.failure().is_some());

        h.engine.drain_background().await;
        assert_eq!(h.engine.stats().exact_cache_entries, 0);
        assert_eq!(h.engine.stats().semantic_cache_entries, 0);

        let again = h
            .engine
            .answer_stream("como configuro la vpn forticlient", &[], None)
            .await
            .unwrap();
        assert_eq!(again.cache_tier, None);
        assert_eq!(h.generator.calls(), 2);
    }

    #[tokio::test]
    async fn test_persisted_exemplar_used_after_restart() {
        let blob = Arc::new(MemoryBlobStore::new());
        let query = "como configuro la vpn forticlient";
        let exemplar = CachedResponse::new(
            query,
            HashEmbeddings::new(64).vector_for(query),
            "Descarga FortiClient del portal y usa tu usuario de red",
            Vec::new(),
        );
        save_collection(blob.as_ref(), EXEMPLAR_BLOB, &[exemplar]).await.unwrap();

        let h = harness_on(blob, SupportConfig::default(), ScriptedGenerator::new(Vec::new())).await;
        h.engine.answer(query, &[], None).await.unwrap();

        let call = h.generator.last_call().unwrap();
        assert_eq!(call.messages[1].content, query);
        assert_eq!(call.messages[2].content, "Descarga FortiClient del portal y usa tu usuario de red");
    }

    #[tokio::test]
    async fn test_persist_on_fresh_engine_keeps_stored_data() {
        let blob = Arc::new(MemoryBlobStore::new());
        let mut stored = SourceDocument::new("doc-printer", "Agregar impresora por IP");
        stored.keywords = "impresora".into();
        save_collection(blob.as_ref(), SourceKind::Documentation.blob_name(), &[stored])
            .await
            .unwrap();
        let exemplar = CachedResponse::new("vpn", vec![1.0, 0.0], "Abre FortiClient", Vec::new());
        save_collection(blob.as_ref(), EXEMPLAR_BLOB, &[exemplar]).await.unwrap();

        let providers = Providers::default().with_blob_store(blob.clone());
        let engine = SupportEngine::new(SupportConfig::default(), providers).unwrap();
        engine.persist().await.unwrap();

        let docs: Vec<SourceDocument> = load_collection(blob.as_ref(), SourceKind::Documentation.blob_name())
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        let exemplars: Vec<CachedResponse> = load_collection(blob.as_ref(), EXEMPLAR_BLOB).await.unwrap();
        assert_eq!(exemplars.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_yields_text_and_fills_cache() {
        let h = harness_with(
            SupportConfig::default(),
            ScriptedGenerator::new(vec!["Abre FortiClient y conecta".into()]),
        )
        .await;
        let stream = h
            .engine
            .answer_stream("como configuro la vpn forticlient", &[], None)
            .await
            .unwrap();
        assert_eq!(stream.tokens.collect().await, "Abre FortiClient y conecta");

        let cached = h
            .engine
            .answer_stream("como configuro la vpn forticlient", &[], None)
            .await
            .unwrap();
        assert_eq!(cached.cache_tier, Some(CacheTier::Exact));
        assert_eq!(cached.tokens.collect().await, "Abre FortiClient y conecta");
    }

    #[tokio::test]
    async fn test_unhelpful_feedback_enriches_once() {
        let h = harness().await;
        for _ in 0..4 {
            h.engine
                .submit_feedback(FeedbackInput::new("forticlient intermitente", "respuesta", false))
                .await
                .unwrap();
        }
        h.engine.drain_background().await;

        let doc = h
            .engine
            .knowledge()
            .documents(SourceKind::Documentation)
            .unwrap()
            .get("doc-vpn")
            .unwrap();
        assert_eq!(doc.keywords, "vpn, forticlient, intermitente");
        assert_eq!(h.engine.alerted_patterns().len(), 1);
        assert_eq!(h.engine.feedback_stats().unhelpful, 4);
    }

    #[tokio::test]
    async fn test_solution_lifecycle() {
        let h = harness().await;
        assert_eq!(h.engine.validate_solution("MT-100").await.unwrap(), 1);
        assert_eq!(h.engine.validate_solution("MT-100").await.unwrap(), 2);
        h.engine.promote_solution("MT-100").await.unwrap();

        let sol = h.engine.knowledge().solutions().get("MT-100").unwrap();
        assert!(sol.promoted);
        assert_eq!(sol.validation_count, 2);
        assert!(matches!(
            h.engine.validate_solution("MT-404").await,
            Err(SupportError::NotFound(_))
        ));

        assert!(h.engine.delete_document(SourceKind::TicketSolutions, "MT-100").await.unwrap());
        assert!(matches!(
            h.engine.delete_document(SourceKind::Tickets, "x").await,
            Err(SupportError::ValidationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_generator_degrades() {
        let providers = Providers::default().with_blob_store(Arc::new(MemoryBlobStore::new()));
        let engine = SupportEngine::new(SupportConfig::default(), providers).unwrap();
        let mut doc = SourceDocument::new("doc-1", "Configurar VPN");
        doc.keywords = "vpn".into();
        engine.upsert_document(SourceKind::Documentation, doc).await.unwrap();

        // Lexical-only retrieval tops out at half relevance, so the gate refuses.
        let gated = engine.answer("configurar vpn", &[], None).await.unwrap();
        assert!(gated.gated);
        assert!((gated.confidence - 0.5).abs() < 1e-6);

        assert!(matches!(
            engine.answer("   ", &[], None).await,
            Err(SupportError::ValidationFailure(_))
        ));

        // Strong remote evidence passes the gate, but nothing can generate.
        let hits = vec![DocumentationHit {
            title: "Impresoras de planta".into(),
            url: "https://docs.example.com/printers".into(),
            excerpt: "Agregar impresora por IP".into(),
            score: Some(0.9),
        }];
        let providers = Providers::default()
            .with_blob_store(Arc::new(MemoryBlobStore::new()))
            .with_documentation(Arc::new(MemoryDocumentationSystem::new(hits)));
        let engine = SupportEngine::new(SupportConfig::default(), providers).unwrap();
        let degraded = engine.answer("agregar impresora de planta", &[], None).await.unwrap();
        assert!(degraded.degraded);
        assert!(!degraded.gated);
        let gate = &engine.config().gate;
        assert_eq!(
            degraded.answer,
            format!("{}\n{}", gate.no_information_message, gate.default_ticket_link)
        );
    }
}
