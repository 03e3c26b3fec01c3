//! Text generation providers.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod external;
pub mod streaming;

pub use external::OpenAiCompatibleProvider;
pub use streaming::TokenStream;

/// Sampling options for one generation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: usize,
    pub temperature: f32,
}

impl GenerationOptions {
    pub fn new(max_tokens: usize, temperature: f32) -> Self {
        Self { max_tokens, temperature }
    }
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: ChatRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: ChatRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: ChatRole::Assistant, content: content.into() }
    }
}

/// Chat-style generation backend, used for final answers and for the
/// one-word intent classification fallback.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String>;

    /// Streamed generation. The default implementation emits the full
    /// completion as a single chunk.
    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let text = self.generate(messages, options).await?;
        Ok(TokenStream::once(text))
    }

    fn name(&self) -> &'static str {
        "generation"
    }
}

/// Channel pair used by streaming providers.
pub(crate) fn token_channel() -> (mpsc::Sender<Result<String>>, TokenStream) {
    let (tx, rx) = mpsc::channel(100);
    (tx, TokenStream::new(rx))
}
