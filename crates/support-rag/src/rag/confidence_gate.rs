//! Refuses generation when retrieval produced no convincing evidence.

use serde::{Deserialize, Serialize};

use super::context_assembler::ContextItem;
use crate::config::GateConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GateDecision {
    Generate {
        best: f32,
    },
    Refuse {
        best: f32,
        message: String,
        link: String,
    },
}

impl GateDecision {
    pub fn allows_generation(&self) -> bool {
        matches!(self, GateDecision::Generate { .. })
    }

    pub fn best(&self) -> f32 {
        match self {
            GateDecision::Generate { best } | GateDecision::Refuse { best, .. } => *best,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfidenceGate {
    threshold: f32,
    placeholder: f32,
    default_link: String,
    message: String,
}

impl ConfidenceGate {
    pub fn from_config(config: &GateConfig) -> Self {
        Self {
            threshold: config.threshold,
            placeholder: config.placeholder_score,
            default_link: config.default_ticket_link.clone(),
            message: config.no_information_message.clone(),
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Highest normalized relevance over all items; unscored hits count as the placeholder.
    pub fn best_score<'a>(&self, items: impl IntoIterator<Item = &'a ContextItem>) -> f32 {
        items
            .into_iter()
            .map(|i| i.effective_relevance(self.placeholder))
            .fold(0.0, f32::max)
    }

    /// Documentation and article hits need no separate clause: any of them at
    /// or above the threshold already lifts `best` over it.
    pub fn evaluate<'a>(&self, items: impl IntoIterator<Item = &'a ContextItem> + Clone) -> GateDecision {
        let best = self.best_score(items.clone());
        if best >= self.threshold {
            return GateDecision::Generate { best };
        }

        let link = self.fallback_link(items);
        tracing::info!(best, threshold = self.threshold, "Confidence gate refused generation");
        GateDecision::Refuse {
            best,
            message: self.no_information(&link),
            link,
        }
    }

    /// Link of the most relevant ticket-like hit, or the configured default.
    pub fn fallback_link<'a>(&self, items: impl IntoIterator<Item = &'a ContextItem>) -> String {
        items
            .into_iter()
            .filter(|i| i.source.is_ticket_like())
            .filter_map(|i| i.link.as_ref().map(|l| (i.effective_relevance(self.placeholder), l)))
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, l)| l.clone())
            .unwrap_or_else(|| self.default_link.clone())
    }

    /// The canned "no information" answer pointing at `link`.
    pub fn no_information(&self, link: &str) -> String {
        format!("{}\n{}", self.message, link)
    }
}
