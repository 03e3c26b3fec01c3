//! OpenAI-compatible `/embeddings` client.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use super::EmbeddingProvider;
use crate::llm::external::parse_json_response;

pub struct HttpEmbeddingProvider {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
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
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = json!({
            "model": self.model,
            "input": text,
        });

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {}", key));
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow::Error::new(e).context(format!("Embedding request to {} timed out", self.endpoint))
            } else {
                anyhow!("Embedding request to {} failed: {}", self.endpoint, e)
            }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Embedding API error ({}): {}", status, body));
        }

        let parsed: EmbeddingResponse = parse_json_response(response, &self.endpoint).await?;
        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("Embedding endpoint returned no vectors"))
    }
}
