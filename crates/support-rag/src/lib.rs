//! Hybrid retrieval, intent routing and confidence gating for IT support answers.

pub mod cache;
pub mod cancellation;
pub mod clients;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod feedback;
pub mod knowledge;
pub mod llm;
pub mod rag;
pub mod rag_engine;
pub mod search;
pub mod storage;
pub mod telemetry;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export primary types for convenience
pub use cancellation::CancellationToken;
pub use config::SupportConfig;
pub use error::{SupportError, SupportResult};
pub use feedback::{FeedbackInput, FeedbackOutcome, FeedbackStats};
pub use rag::{Classification, GateDecision, IntentSource};
pub use rag_engine::{AnswerStream, EngineStats, Providers, SupportAnswer, SupportEngine};
pub use types::{
    CachedResponse, ConversationTurn, FailurePattern, FeedbackRecord, Intent, SourceDocument, SourceKind,
    TicketSolution,
};

// Re-export common types
pub use anyhow::{Error, Result};
pub use uuid::Uuid;
