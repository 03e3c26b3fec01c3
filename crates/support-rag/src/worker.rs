//! Bounded queue for best-effort background work (semantic cache writes,
//! enrichment persistence). Jobs run one at a time on a single worker task;
//! failures are logged and never reach the request path.

use futures::future::BoxFuture;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use crate::error::{SupportError, SupportResult};

enum Message {
    Run { name: &'static str, job: BoxFuture<'static, anyhow::Result<()>> },
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Clone)]
pub struct BackgroundQueue {
    tx: mpsc::Sender<Message>,
    counters: Arc<Counters>,
}

impl BackgroundQueue {
    /// Start the worker on the current Tokio runtime.
    pub fn spawn(capacity: usize) -> SupportResult<Self> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| SupportError::ConfigurationMissing("tokio runtime"))?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let counters = Arc::new(Counters::default());
        handle.spawn(run_worker(rx, counters.clone()));
        Ok(Self { tx, counters })
    }

    /// Enqueue a job without waiting. Returns false when the queue is full or closed.
    pub fn submit<F>(&self, name: &'static str, job: F) -> bool
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        match self.tx.try_send(Message::Run { name, job: Box::pin(job) }) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(job = name, "Background queue full, dropping job");
                false
            }
        }
    }

    /// Wait until every job submitted before this call has finished.
    pub async fn drain(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(Message::Flush(done_tx)).await.is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

async fn run_worker(mut rx: mpsc::Receiver<Message>, counters: Arc<Counters>) {
    while let Some(message) = rx.recv().await {
        match message {
            Message::Run { name, job } => match job.await {
                Ok(()) => {
                    counters.completed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    counters.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(job = name, error = %e, "Background job failed");
                }
            },
            Message::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    tracing::debug!("Background worker stopped");
}
