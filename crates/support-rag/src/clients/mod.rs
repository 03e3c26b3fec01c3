//! Interfaces to the external ticket and documentation systems.
//!
//! Only the traits live here; deployments provide HTTP implementations.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: String,
    pub summary: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

/// One page of ticket search results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TicketBatch {
    pub tickets: Vec<Ticket>,
    pub start_at: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentationHit {
    pub title: String,
    pub url: String,
    pub excerpt: String,
    /// Relevance reported by the remote system, when it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

#[async_trait]
pub trait TicketSystem: Send + Sync {
    /// Fetch one ticket. Callers must validate `id` first.
    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>>;

    async fn search(&self, jql: &str, max_results: usize) -> Result<TicketBatch>;
}

#[async_trait]
pub trait DocumentationSystem: Send + Sync {
    async fn search(&self, query: &str, top: usize) -> Result<Vec<DocumentationHit>>;
}

/// Full-text ticket query over resolved tickets for the given terms, with
/// quoting applied so user input cannot alter the query structure.
pub fn text_search_jql(terms: &[String]) -> Option<String> {
    let cleaned: Vec<String> = terms
        .iter()
        .map(|t| {
            t.chars()
                .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_' || c.is_whitespace())
                .collect::<String>()
        })
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    Some(format!(
        "text ~ \"{}\" AND statusCategory = Done ORDER BY updated DESC",
        cleaned.join(" ")
    ))
}
