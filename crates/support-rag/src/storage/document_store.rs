use anyhow::Result;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;

use super::blob::{load_collection, save_collection, BlobStore};
use crate::search::tokenize::normalize;
use crate::types::{SourceDocument, SourceKind, TicketSolution};

/// Field access the scorers and the context assembler need from a stored item.
pub trait Retrievable: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    fn doc_id(&self) -> &str;
    fn title(&self) -> &str;
    /// The system/category field, matched with the highest lexical weight.
    fn category_field(&self) -> &str;
    fn keywords(&self) -> &str;
    fn keywords_mut(&mut self) -> &mut String;
    fn body_text(&self) -> String;
    fn embedding(&self) -> &[f32];
    /// Validation count for solutions, recorded use count for documents.
    fn usage_count(&self) -> u32;
    fn link(&self) -> Option<&str>;
}

impl Retrievable for SourceDocument {
    fn doc_id(&self) -> &str {
        &self.id
    }

    fn title(&self) -> &str {
        &self.name
    }

    fn category_field(&self) -> &str {
        &self.category
    }

    fn keywords(&self) -> &str {
        &self.keywords
    }

    fn keywords_mut(&mut self) -> &mut String {
        &mut self.keywords
    }

    fn body_text(&self) -> String {
        let mut body = format!("{} {}", self.name, self.description);
        for value in self.attributes.values() {
            body.push(' ');
            body.push_str(value);
        }
        body
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn usage_count(&self) -> u32 {
        self.use_count()
    }

    fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
}

impl Retrievable for TicketSolution {
    fn doc_id(&self) -> &str {
        &self.ticket_id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn category_field(&self) -> &str {
        &self.system
    }

    fn keywords(&self) -> &str {
        &self.keywords
    }

    fn keywords_mut(&mut self) -> &mut String {
        &mut self.keywords
    }

    fn body_text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.title,
            self.problem,
            self.root_cause,
            self.solution,
            self.steps.join(" ")
        )
    }

    fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    fn usage_count(&self) -> u32 {
        self.validation_count
    }

    fn link(&self) -> Option<&str> {
        self.link.as_deref()
    }
}

/// Append `keyword` to a comma-joined list unless an accent/case-insensitive
/// equal entry already exists. Returns whether the list changed.
pub fn append_keyword(keywords: &mut String, keyword: &str) -> bool {
    let keyword = keyword.trim();
    if keyword.is_empty() {
        return false;
    }
    let wanted = normalize(keyword);
    if keywords.split(',').any(|k| normalize(k.trim()) == wanted) {
        return false;
    }
    if !keywords.trim().is_empty() {
        keywords.push_str(", ");
    }
    keywords.push_str(keyword);
    true
}

/// In-memory collection for one knowledge source, lazily loaded from its blob.
///
/// Readers take an `Arc` snapshot and never wait on I/O; writers replace the
/// snapshot copy-on-write.
pub struct DocumentStore<T: Retrievable> {
    kind: SourceKind,
    blob: Arc<dyn BlobStore>,
    docs: RwLock<Arc<Vec<T>>>,
    init: OnceCell<()>,
    ready: AtomicBool,
    loads: AtomicUsize,
}

impl<T: Retrievable> DocumentStore<T> {
    pub fn new(kind: SourceKind, blob: Arc<dyn BlobStore>) -> Self {
        Self {
            kind,
            blob,
            docs: RwLock::new(Arc::new(Vec::new())),
            init: OnceCell::new(),
            ready: AtomicBool::new(false),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    /// Load the backing blob exactly once. Concurrent callers wait for the
    /// same load; a failed load leaves the store uninitialized for a retry.
    pub async fn ensure_initialized(&self) -> Result<()> {
        self.init
            .get_or_try_init(|| async {
                self.loads.fetch_add(1, Ordering::SeqCst);
                let items: Vec<T> = load_collection(self.blob.as_ref(), self.kind.blob_name()).await?;
                tracing::info!(source = %self.kind, documents = items.len(), "Loaded document store");
                *self.docs.write() = Arc::new(items);
                self.ready.store(true, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            })
            .await?;
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Number of blob loads performed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> Arc<Vec<T>> {
        self.docs.read().clone()
    }

    pub fn len(&self) -> usize {
        self.docs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.docs.read().iter().find(|d| d.doc_id() == id).cloned()
    }

    /// Insert or replace by id. Returns true when an existing item was replaced.
    pub async fn upsert(&self, item: T) -> Result<bool> {
        self.ensure_initialized().await?;
        let mut guard = self.docs.write();
        let docs = Arc::make_mut(&mut *guard);
        match docs.iter_mut().find(|d| d.doc_id() == item.doc_id()) {
            Some(existing) => {
                *existing = item;
                Ok(true)
            }
            None => {
                docs.push(item);
                Ok(false)
            }
        }
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        self.ensure_initialized().await?;
        let mut guard = self.docs.write();
        let before = guard.len();
        Arc::make_mut(&mut *guard).retain(|d| d.doc_id() != id);
        Ok(guard.len() != before)
    }

    /// Mutate one item in place. `None` when the id is unknown.
    pub async fn update<R>(&self, id: &str, f: impl FnOnce(&mut T) -> R) -> Result<Option<R>> {
        self.ensure_initialized().await?;
        let mut guard = self.docs.write();
        let docs = Arc::make_mut(&mut *guard);
        Ok(docs.iter_mut().find(|d| d.doc_id() == id).map(f))
    }

    /// Idempotent keyword append on one item.
    pub async fn append_keyword(&self, id: &str, keyword: &str) -> Result<bool> {
        Ok(self
            .update(id, |doc| append_keyword(doc.keywords_mut(), keyword))
            .await?
            .unwrap_or(false))
    }

    /// Replace the whole collection, e.g. after an external import.
    pub async fn replace_all(&self, items: Vec<T>) -> Result<()> {
        self.ensure_initialized().await?;
        *self.docs.write() = Arc::new(items);
        Ok(())
    }

    /// Write the current snapshot to the backing blob. Loads first so an
    /// untouched store never overwrites its blob with an empty collection.
    pub async fn persist(&self) -> Result<()> {
        self.ensure_initialized().await?;
        let snapshot = self.snapshot();
        save_collection(self.blob.as_ref(), self.kind.blob_name(), &snapshot).await?;
        tracing::debug!(source = %self.kind, documents = snapshot.len(), "Persisted document store");
        Ok(())
    }
}
