//! Feedback-driven learning: failure pattern alerts, keyword enrichment of
//! the local stores, and few-shot exemplars from helpful answers.

pub mod enrichment;
pub mod exemplars;
pub mod patterns;

use anyhow::Result;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::{DomainRule, LearningConfig};
use crate::embeddings::EmbeddingProvider;
use crate::error::{SupportError, SupportResult};
use crate::knowledge::KnowledgeBase;
use crate::search::tokenize::tokenize;
use crate::storage::{load_collection, save_collection, BlobStore};
use crate::types::{CachedResponse, FailurePattern, FeedbackRecord};
use crate::worker::BackgroundQueue;

pub use enrichment::{EnrichmentTarget, Enricher, KeywordFrequency};
pub use exemplars::ExemplarStore;
pub use patterns::{extract_keywords, failure_signature, FailurePatternTracker, PatternUpdate};

pub const FEEDBACK_BLOB: &str = "feedback";
pub const PATTERN_BLOB: &str = "failure_patterns";
const MAX_EXTRACTED_KEYWORDS: usize = 8;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeedbackInput {
    pub query: String,
    pub answer: String,
    pub helpful: bool,
    #[serde(default)]
    pub user_correction: Option<String>,
    #[serde(default)]
    pub agent: String,
    #[serde(default)]
    pub confident: bool,
}

impl FeedbackInput {
    pub fn new(query: impl Into<String>, answer: impl Into<String>, helpful: bool) -> Self {
        Self {
            query: query.into(),
            answer: answer.into(),
            helpful,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedbackOutcome {
    pub record_id: Uuid,
    pub pattern: Option<PatternUpdate>,
    pub enriched: Vec<EnrichmentTarget>,
    pub exemplar_cached: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackStats {
    pub total: usize,
    pub helpful: usize,
    pub unhelpful: usize,
    pub reviewed: usize,
    pub applied: usize,
    pub dismissed: usize,
    pub patterns: usize,
    pub alerted_patterns: usize,
    pub exemplars: usize,
}

/// Keywords an unhelpful answer should have matched: correction terms the
/// query lacked, or the query's own keywords when there is no correction.
fn suggested_keywords(query_keywords: &[String], correction: Option<&str>) -> Vec<String> {
    let from_correction: Vec<String> = correction
        .map(tokenize)
        .unwrap_or_default()
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !query_keywords.contains(t))
        .take(MAX_EXTRACTED_KEYWORDS)
        .collect();
    if from_correction.is_empty() {
        query_keywords.to_vec()
    } else {
        from_correction
    }
}

pub struct FeedbackLoop {
    blob: Arc<dyn BlobStore>,
    records: Arc<RwLock<Vec<FeedbackRecord>>>,
    loaded: OnceCell<()>,
    patterns: Arc<FailurePatternTracker>,
    frequency: KeywordFrequency,
    exemplars: Arc<ExemplarStore>,
    enricher: Enricher,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    queue: BackgroundQueue,
}

impl FeedbackLoop {
    pub fn new(
        config: &LearningConfig,
        rules: Vec<DomainRule>,
        blob: Arc<dyn BlobStore>,
        kb: Arc<KnowledgeBase>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        queue: BackgroundQueue,
    ) -> Self {
        Self {
            records: Arc::new(RwLock::new(Vec::new())),
            loaded: OnceCell::new(),
            patterns: Arc::new(FailurePatternTracker::new(
                config.alert_threshold,
                config.max_sample_queries,
                rules,
            )),
            frequency: KeywordFrequency::new(config.enrichment_threshold),
            exemplars: Arc::new(ExemplarStore::new(blob.clone(), config.exemplar_capacity)),
            enricher: Enricher::new(kb, embedder.clone(), queue.clone()),
            embedder,
            queue,
            blob,
        }
    }

    /// Load persisted feedback, patterns and exemplars once.
    pub async fn ensure_loaded(&self) -> Result<()> {
        self.loaded
            .get_or_try_init(|| async {
                let records: Vec<FeedbackRecord> = load_collection(self.blob.as_ref(), FEEDBACK_BLOB).await?;
                let patterns: Vec<FailurePattern> = load_collection(self.blob.as_ref(), PATTERN_BLOB).await?;
                self.exemplars.ensure_loaded().await?;

                self.frequency.restore(
                    records
                        .iter()
                        .filter(|r| !r.helpful)
                        .flat_map(|r| r.extracted_keywords.iter()),
                );
                self.patterns.load(patterns);
                tracing::info!(records = records.len(), patterns = self.patterns.len(), "Feedback state loaded");
                *self.records.write() = records;
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    pub fn exemplars(&self) -> &ExemplarStore {
        &self.exemplars
    }

    pub async fn submit(&self, input: FeedbackInput) -> Result<FeedbackOutcome> {
        self.ensure_loaded().await?;

        let extracted = extract_keywords(&input.query, MAX_EXTRACTED_KEYWORDS);
        let mut outcome = FeedbackOutcome {
            record_id: Uuid::new_v4(),
            pattern: None,
            enriched: Vec::new(),
            exemplar_cached: false,
        };

        let suggested = if input.helpful {
            outcome.exemplar_cached = self.cache_exemplar(&input).await;
            Vec::new()
        } else {
            outcome.pattern = Some(self.patterns.record(&input.query, &extracted));
            let claimed = self.frequency.record(&extracted);
            if !claimed.is_empty() {
                match self.enricher.enrich(&input.query, &claimed).await {
                    Ok(targets) => {
                        for kw in claimed.iter().filter(|kw| !targets.iter().any(|t| &t.keyword == *kw)) {
                            self.frequency.release(kw);
                        }
                        outcome.enriched = targets;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Keyword enrichment failed");
                        claimed.iter().for_each(|kw| self.frequency.release(kw));
                    }
                }
            }
            suggested_keywords(&extracted, input.user_correction.as_deref())
        };

        let record = FeedbackRecord {
            id: outcome.record_id,
            query: input.query,
            answer: input.answer,
            helpful: input.helpful,
            user_correction: input.user_correction,
            extracted_keywords: extracted,
            suggested_keywords: suggested,
            agent: input.agent,
            confident: input.confident,
            reviewed: false,
            applied: false,
            dismissed: false,
            timestamp: Utc::now(),
        };
        tracing::info!(
            id = %record.id,
            helpful = record.helpful,
            keywords = record.extracted_keywords.len(),
            "Feedback recorded"
        );
        self.records.write().push(record);
        self.schedule_persist();
        Ok(outcome)
    }

    async fn cache_exemplar(&self, input: &FeedbackInput) -> bool {
        let Some(provider) = self.embedder.as_ref() else {
            return false;
        };
        match provider.embed(&input.query).await {
            Ok(embedding) if !embedding.is_empty() => {
                self.exemplars
                    .add(CachedResponse::new(input.query.clone(), embedding, input.answer.clone(), Vec::new()));
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Embedding failed, exemplar not cached");
                false
            }
        }
    }

    /// Queue a write of the current state. The records are read when the job
    /// runs, so the last queued write always carries every record.
    fn schedule_persist(&self) {
        let blob = self.blob.clone();
        let records = self.records.clone();
        let patterns = self.patterns.clone();
        let exemplars = self.exemplars.clone();
        self.queue.submit("feedback_persist", async move {
            let records = records.read().clone();
            save_collection(blob.as_ref(), FEEDBACK_BLOB, &records).await?;
            save_collection(blob.as_ref(), PATTERN_BLOB, &patterns.all()).await?;
            exemplars.persist().await
        });
    }

    fn update_record<R>(&self, id: Uuid, f: impl FnOnce(&mut FeedbackRecord) -> R) -> SupportResult<R> {
        let result = {
            let mut records = self.records.write();
            let record = records
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| SupportError::NotFound(format!("feedback {}", id)))?;
            f(record)
        };
        self.schedule_persist();
        Ok(result)
    }

    pub async fn mark_reviewed(&self, id: Uuid) -> SupportResult<()> {
        self.ensure_loaded().await.map_err(|e| SupportError::Storage(e.to_string()))?;
        self.update_record(id, |r| r.reviewed = true)
    }

    pub async fn dismiss(&self, id: Uuid) -> SupportResult<()> {
        self.ensure_loaded().await.map_err(|e| SupportError::Storage(e.to_string()))?;
        self.update_record(id, |r| {
            r.reviewed = true;
            r.dismissed = true;
        })
    }

    /// Apply a record's suggested keywords through the enrichment path.
    pub async fn apply(&self, id: Uuid) -> SupportResult<Vec<EnrichmentTarget>> {
        self.ensure_loaded().await.map_err(|e| SupportError::Storage(e.to_string()))?;
        let (query, keywords) = {
            let records = self.records.read();
            let record = records
                .iter()
                .find(|r| r.id == id)
                .ok_or_else(|| SupportError::NotFound(format!("feedback {}", id)))?;
            if record.dismissed {
                return Err(SupportError::ValidationFailure(format!("feedback {} was dismissed", id)));
            }
            (record.query.clone(), record.suggested_keywords.clone())
        };

        let targets = self
            .enricher
            .enrich(&query, &keywords)
            .await
            .map_err(|e| SupportError::Storage(e.to_string()))?;
        for t in &targets {
            self.frequency.mark_applied(&t.keyword);
        }
        self.update_record(id, |r| {
            r.reviewed = true;
            r.applied = true;
        })?;
        Ok(targets)
    }

    pub fn reset_alert(&self, signature: &str) -> SupportResult<()> {
        if self.patterns.reset_alert(signature) {
            self.schedule_persist();
            Ok(())
        } else {
            Err(SupportError::NotFound(format!("failure pattern {}", signature)))
        }
    }

    pub fn alerted_patterns(&self) -> Vec<FailurePattern> {
        self.patterns.alerted()
    }

    pub fn pattern(&self, signature: &str) -> Option<FailurePattern> {
        self.patterns.get(signature)
    }

    pub fn records(&self) -> Vec<FeedbackRecord> {
        self.records.read().clone()
    }

    pub fn stats(&self) -> FeedbackStats {
        let records = self.records.read();
        let helpful = records.iter().filter(|r| r.helpful).count();
        FeedbackStats {
            total: records.len(),
            helpful,
            unhelpful: records.len() - helpful,
            reviewed: records.iter().filter(|r| r.reviewed).count(),
            applied: records.iter().filter(|r| r.applied).count(),
            dismissed: records.iter().filter(|r| r.dismissed).count(),
            patterns: self.patterns.len(),
            alerted_patterns: self.patterns.alerted().len(),
            exemplars: self.exemplars.len(),
        }
    }

    /// Write feedback, patterns and exemplars now, bypassing the queue.
    pub async fn persist(&self) -> Result<()> {
        self.ensure_loaded().await?;
        let records = self.records.read().clone();
        save_collection(self.blob.as_ref(), FEEDBACK_BLOB, &records).await?;
        save_collection(self.blob.as_ref(), PATTERN_BLOB, &self.patterns.all()).await?;
        self.exemplars.persist().await
    }
}
