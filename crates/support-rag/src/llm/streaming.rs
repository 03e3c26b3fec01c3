//! Streaming response handling for generation

use anyhow::Result;
use futures::Stream;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Token stream for streaming generation.
///
/// Producers send `Err` to mark the stream as broken. The stream then ends
/// and [`failure`](Self::failure) reports why; a stream that simply closes
/// completed normally.
pub struct TokenStream {
    receiver: mpsc::Receiver<Result<String>>,
    failure: Option<String>,
}

impl TokenStream {
    pub fn new(receiver: mpsc::Receiver<Result<String>>) -> Self {
        Self { receiver, failure: None }
    }

    /// A stream that yields `text` as its only chunk.
    pub fn once(text: String) -> Self {
        let (tx, rx) = mpsc::channel(1);
        // Capacity 1 on a fresh channel cannot be full.
        let _ = tx.try_send(Ok(text));
        Self::new(rx)
    }

    /// Get next token
    pub async fn next(&mut self) -> Option<String> {
        if self.failure.is_some() {
            return None;
        }
        let item = self.receiver.recv().await;
        self.accept(item)
    }

    /// Why the producer gave up, once the stream has ended on an error.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Collect all tokens into a string
    pub async fn collect(mut self) -> String {
        let mut result = String::new();
        while let Some(token) = self.next().await {
            result.push_str(&token);
        }
        result
    }

    /// Like [`collect`](Self::collect) but fails when the stream broke.
    pub async fn try_collect(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(token) = self.next().await {
            result.push_str(&token);
        }
        match self.failure {
            Some(reason) => Err(anyhow::anyhow!(reason)),
            None => Ok(result),
        }
    }

    fn accept(&mut self, item: Option<Result<String>>) -> Option<String> {
        match item {
            Some(Ok(token)) => Some(token),
            Some(Err(e)) => {
                self.failure = Some(format!("{:#}", e));
                self.receiver.close();
                None
            }
            None => None,
        }
    }
}

impl Stream for TokenStream {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.failure.is_some() {
            return Poll::Ready(None);
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(item) => Poll::Ready(self.accept(item)),
            Poll::Pending => Poll::Pending,
        }
    }
}
