//! OpenAI-compatible chat completion client (OpenAI, Azure-style gateways,
//! Ollama, vLLM and similar endpoints).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tokio::sync::mpsc;

use super::{token_channel, ChatMessage, GenerationOptions, GenerationProvider, TokenStream};

/// Parse a response body as JSON, returning a clear error if the server returned HTML.
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;
    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}), service may be down. Response: {}",
            endpoint,
            status,
            preview
        ));
    }
    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!("Failed to parse JSON from {} (HTTP {}): {}. Body: {}", endpoint, status, e, preview)
    })
}

pub struct OpenAiCompatibleProvider {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

/// One decoded server-sent-events line.
#[derive(Debug, PartialEq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data: ") else {
        return SseEvent::Skip;
    };
    if data == "[DONE]" {
        return SseEvent::Done;
    }
    serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|parsed| {
            parsed["choices"][0]["delta"]["content"]
                .as_str()
                .filter(|s| !s.is_empty())
                .map(|s| SseEvent::Delta(s.to_string()))
        })
        .unwrap_or(SseEvent::Skip)
}

impl OpenAiCompatibleProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_nodelay(true)
            .build()?;

        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            client,
        })
    }

    fn request(&self, messages: &[ChatMessage], options: &GenerationOptions, stream: bool) -> reqwest::RequestBuilder {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": stream,
        });
        let mut builder = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }
        builder
    }

    fn map_send_error(&self, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow::Error::new(e).context(format!("Request to {} timed out", self.endpoint))
        } else if e.is_connect() {
            anyhow!("Failed to connect to {}, check network/proxy: {}", self.endpoint, e)
        } else {
            anyhow!("Request to {} failed: {}", self.endpoint, e)
        }
    }
}

#[async_trait]
impl GenerationProvider for OpenAiCompatibleProvider {
    async fn generate(&self, messages: &[ChatMessage], options: &GenerationOptions) -> Result<String> {
        let response = self
            .request(messages, options, false)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error = response.text().await.unwrap_or_default();
            return Err(anyhow!("API error ({}): {}", status, error));
        }

        let result: CompletionResponse = parse_json_response(response, &self.endpoint).await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("Completion endpoint returned empty choices array"))
    }

    async fn generate_stream(
        &self,
        messages: &[ChatMessage],
        options: &GenerationOptions,
    ) -> Result<TokenStream> {
        let response = self
            .request(messages, options, true)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        if !response.status().is_success() {
            return Err(anyhow!("Streaming API error: {}", response.status()));
        }

        let (tx, stream) = token_channel();
        tokio::spawn(forward_sse(response, tx));
        Ok(stream)
    }
}

async fn forward_sse(response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut body = response.bytes_stream();
    let mut pending = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(error = %e, "Stream chunk error");
                let _ = tx.send(Err(anyhow!("stream interrupted: {}", e))).await;
                return;
            }
        };
        pending.push_str(&String::from_utf8_lossy(&chunk));

        // Lines may straddle chunk boundaries; keep the unterminated tail.
        while let Some(pos) = pending.find('\n') {
            let line: String = pending.drain(..=pos).collect();
            match parse_sse_line(line.trim_end_matches('\n')) {
                SseEvent::Delta(text) => {
                    if tx.send(Ok(text)).await.is_err() {
                        return;
                    }
                }
                SseEvent::Done => return,
                SseEvent::Skip => {}
            }
        }
    }
}
