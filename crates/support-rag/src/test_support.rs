//! Deterministic stand-ins for the external providers, shared by unit tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::clients::{DocumentationHit, DocumentationSystem, Ticket, TicketBatch, TicketSystem};
use crate::embeddings::EmbeddingProvider;
use crate::llm::{token_channel, ChatMessage, GenerationOptions, GenerationProvider, TokenStream};
use crate::rag::intent::IntentFallback;
use crate::search::tokenize::tokenize;
use crate::types::Intent;

/// Bag-of-tokens embeddings: each token adds weight to a hashed dimension.
/// Texts with the same terms get identical vectors.
pub struct HashEmbeddings {
    dim: usize,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl HashEmbeddings {
    pub fn new(dim: usize) -> Self {
        Self {
            dim: dim.max(1),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0.0f32; self.dim];
        for token in tokenize(text) {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            v[(hasher.finish() as usize) % self.dim] += 1.0;
        }
        v
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.vector_for(text))
    }
}

pub struct FixedIntent {
    intent: Intent,
    calls: AtomicUsize,
}

impl FixedIntent {
    pub fn new(intent: Intent) -> Self {
        Self { intent, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IntentFallback for FixedIntent {
    async fn classify(&self, _text: &str) -> Intent {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.intent
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub options: GenerationOptions,
}

/// Replies from a script, then a fixed default reply. Records every call.
pub struct ScriptedGenerator {
    replies: Mutex<Vec<String>>,
    calls: Mutex<Vec<RecordedCall>>,
    fail: bool,
    break_stream: bool,
}

impl ScriptedGenerator {
    pub const DEFAULT_REPLY: &'static str = "Respuesta generada";

    pub fn new(mut replies: Vec<String>) -> Self {
        replies.reverse();
        Self {
            replies: Mutex::new(replies),
            calls: Mutex::new(Vec::new()),
            fail: false,
            break_stream: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Vec::new())
        }
    }

    /// Streams the first half of each reply, then reports a broken connection.
    pub fn with_broken_stream(mut self) -> Self {
        self.break_stream = true;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn last_call(&self) -> Option<RecordedCall> {
        self.calls.lock().last().cloned()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedGenerator {
    async fn generate(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String> {
        self.calls.lock().push(RecordedCall {
            messages: messages.to_vec(),
            options: options.clone(),
        });
        if self.fail {
            return Err(anyhow!("HTTP 503 from scripted generator"));
        }
        Ok(self
            .replies
            .lock()
            .pop()
            .unwrap_or_else(|| Self::DEFAULT_REPLY.to_string()))
    }

    async fn generate_stream(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<TokenStream> {
        let text = self.generate(messages, options).await?;
        if !self.break_stream {
            return Ok(TokenStream::once(text));
        }
        let cut = text
            .char_indices()
            .nth(text.chars().count() / 2)
            .map_or(0, |(i, _)| i);
        let (tx, stream) = token_channel();
        let _ = tx.try_send(Ok(text[..cut].to_string()));
        let _ = tx.try_send(Err(anyhow!("connection reset by scripted generator")));
        Ok(stream)
    }
}

#[derive(Default)]
pub struct MemoryTicketSystem {
    tickets: HashMap<String, Ticket>,
    search_results: Vec<Ticket>,
    lookups: AtomicUsize,
    searches: AtomicUsize,
}

impl MemoryTicketSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ticket(mut self, id: &str, summary: &str, resolution: &str) -> Self {
        let ticket = Ticket {
            id: id.to_string(),
            summary: summary.to_string(),
            description: String::new(),
            status: "Done".to_string(),
            resolution: Some(resolution.to_string()),
            url: Some(format!("https://tickets.example.com/browse/{}", id)),
            updated: None,
        };
        self.tickets.insert(id.to_string(), ticket);
        self
    }

    /// Tickets returned by every text search.
    pub fn with_search_results(mut self, ids: &[&str]) -> Self {
        self.search_results = ids.iter().filter_map(|id| self.tickets.get(*id).cloned()).collect();
        self
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn searches(&self) -> usize {
        self.searches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TicketSystem for MemoryTicketSystem {
    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.tickets.get(id).cloned())
    }

    async fn search(&self, _jql: &str, max_results: usize) -> Result<TicketBatch> {
        self.searches.fetch_add(1, Ordering::SeqCst);
        let tickets: Vec<Ticket> = self.search_results.iter().take(max_results).cloned().collect();
        Ok(TicketBatch {
            total: tickets.len(),
            start_at: 0,
            tickets,
        })
    }
}

#[derive(Default)]
pub struct MemoryDocumentationSystem {
    hits: Vec<DocumentationHit>,
    calls: AtomicUsize,
}

impl MemoryDocumentationSystem {
    pub fn new(hits: Vec<DocumentationHit>) -> Self {
        Self { hits, calls: AtomicUsize::new(0) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentationSystem for MemoryDocumentationSystem {
    async fn search(&self, _query: &str, top: usize) -> Result<Vec<DocumentationHit>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.hits.iter().take(top).cloned().collect())
    }
}
