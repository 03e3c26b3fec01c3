//! Generation-provider fallback for intent classification.
//!
//! Used only when no deterministic rule fired. The model is asked for a
//! single label; anything that does not parse maps to `General`.

use async_trait::async_trait;
use std::sync::Arc;

use super::intent::IntentFallback;
use crate::llm::{ChatMessage, GenerationOptions, GenerationProvider};
use crate::types::Intent;

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

const CLASSIFY_SYSTEM_PROMPT: &str = "You classify IT support requests. \
Reply with exactly one word from this list and nothing else: \
ticket_lookup, network, erp, access, email, hardware, software, incident, general.";

fn build_classify_messages(text: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(CLASSIFY_SYSTEM_PROMPT),
        ChatMessage::user(text.trim()),
    ]
}

/// Map a raw completion to an intent. Only the first word is considered.
pub fn parse_intent_reply(raw: &str) -> Intent {
    raw.split_whitespace()
        .next()
        .and_then(Intent::from_label)
        .unwrap_or(Intent::General)
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

pub struct LlmIntentClassifier {
    provider: Arc<dyn GenerationProvider>,
    options: GenerationOptions,
}

impl LlmIntentClassifier {
    pub fn new(provider: Arc<dyn GenerationProvider>, max_tokens: usize) -> Self {
        Self {
            provider,
            options: GenerationOptions::new(max_tokens, 0.0),
        }
    }
}

#[async_trait]
impl IntentFallback for LlmIntentClassifier {
    async fn classify(&self, text: &str) -> Intent {
        let messages = build_classify_messages(text);
        match self.provider.generate(&messages, &self.options).await {
            Ok(raw) => {
                let intent = parse_intent_reply(&raw);
                if intent == Intent::General && !raw.trim().eq_ignore_ascii_case("general") {
                    tracing::debug!(reply = %raw.trim(), "Unparseable classification reply");
                }
                intent
            }
            Err(e) => {
                tracing::warn!(error = %e, "Classification call failed, using general");
                Intent::General
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
