//! Builds the generation context from per-source retrieval results.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use super::search_weights::SearchWeights;
use crate::clients::{DocumentationHit, Ticket};
use crate::search::FusedDocument;
use crate::storage::Retrievable;
use crate::types::SourceKind;

/// One retrieved item, normalized across local stores and remote systems.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextItem {
    pub source: SourceKind,
    pub id: String,
    pub title: String,
    pub body: String,
    pub link: Option<String>,
    /// Normalized relevance in [0, 1]; `None` when the source reports no score.
    pub relevance: Option<f32>,
    /// Relevance after the intent weight was applied, for diagnostics.
    pub weighted: Option<f32>,
}

impl ContextItem {
    pub fn from_fused<T: Retrievable>(source: SourceKind, fused: &FusedDocument<T>) -> Self {
        let doc = &fused.item;
        let mut body = doc.body_text();
        if !doc.keywords().is_empty() {
            body.push_str("\nKeywords: ");
            body.push_str(doc.keywords());
        }
        Self {
            source,
            id: doc.doc_id().to_string(),
            title: doc.title().to_string(),
            body,
            link: doc.link().map(str::to_string),
            relevance: Some(fused.relevance),
            weighted: None,
        }
    }

    pub fn from_documentation(source: SourceKind, hit: &DocumentationHit) -> Self {
        Self {
            source,
            id: hit.url.clone(),
            title: hit.title.clone(),
            body: hit.excerpt.clone(),
            link: Some(hit.url.clone()),
            relevance: hit.score,
            weighted: None,
        }
    }

    pub fn from_ticket(ticket: &Ticket) -> Self {
        let mut body = format!("Status: {}\n{}", ticket.status, ticket.description);
        if let Some(resolution) = &ticket.resolution {
            body.push_str("\nResolution: ");
            body.push_str(resolution);
        }
        Self {
            source: SourceKind::Tickets,
            id: ticket.id.clone(),
            title: format!("{} {}", ticket.id, ticket.summary),
            body,
            link: ticket.url.clone(),
            relevance: None,
            weighted: None,
        }
    }

    /// Relevance used by the gate, substituting `placeholder` for unscored hits.
    pub fn effective_relevance(&self, placeholder: f32) -> f32 {
        self.relevance.unwrap_or(placeholder)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSection {
    pub source: SourceKind,
    pub weight: f32,
    pub items: Vec<ContextItem>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub sections: Vec<ContextSection>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.sections.iter().all(|s| s.items.is_empty())
    }

    pub fn items(&self) -> impl Iterator<Item = &ContextItem> {
        self.sections.iter().flat_map(|s| s.items.iter())
    }

    /// Titles (with links when present) of everything that made it into the context.
    pub fn source_refs(&self) -> Vec<String> {
        self.items()
            .map(|i| match &i.link {
                Some(link) => format!("{} ({})", i.title, link),
                None => i.title.clone(),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    max_items_per_source: usize,
    max_chars_per_item: usize,
}

impl ContextAssembler {
    pub fn new(max_items_per_source: usize, max_chars_per_item: usize) -> Self {
        Self {
            max_items_per_source,
            max_chars_per_item,
        }
    }

    /// Deduplicate by `(source, id)` keeping the first occurrence, so callers
    /// pass the original query's results before expansion and sub-query results.
    pub fn dedupe(items: impl IntoIterator<Item = ContextItem>) -> Vec<ContextItem> {
        let mut seen: HashSet<(SourceKind, String)> = HashSet::new();
        items
            .into_iter()
            .filter(|i| seen.insert((i.source, i.id.clone())))
            .collect()
    }

    pub fn assemble(&self, items: impl IntoIterator<Item = ContextItem>, weights: &SearchWeights) -> AssembledContext {
        let mut by_source: BTreeMap<SourceKind, Vec<ContextItem>> = BTreeMap::new();
        for mut item in Self::dedupe(items) {
            let weight = weights.weight(item.source);
            item.weighted = item.relevance.map(|r| r * weight);
            by_source.entry(item.source).or_default().push(item);
        }

        let mut context = AssembledContext::default();
        for kind in weights.ordered_sources() {
            let Some(mut items) = by_source.remove(&kind) else {
                continue;
            };
            let cap = weights.budget(kind).min(self.max_items_per_source);
            if cap == 0 || weights.weight(kind) <= 0.0 {
                continue;
            }
            items.truncate(cap);
            context.sections.push(ContextSection {
                source: kind,
                weight: weights.weight(kind),
                items,
            });
        }

        context.text = self.render(&context.sections);
        context
    }

    fn render(&self, sections: &[ContextSection]) -> String {
        let mut out = String::new();
        for section in sections.iter().filter(|s| !s.items.is_empty()) {
            out.push_str(&format!("=== {} ===\n", section.source.label()));
            for (i, item) in section.items.iter().enumerate() {
                out.push_str(&format!("[{}] {}\n", i + 1, item.title.trim()));
                let body = truncate_chars(item.body.trim(), self.max_chars_per_item);
                if !body.is_empty() {
                    out.push_str(&body);
                    out.push('\n');
                }
                // Links go out byte-for-byte so the answer can quote them.
                if let Some(link) = &item.link {
                    out.push_str("Link: ");
                    out.push_str(link);
                    out.push('\n');
                }
            }
            out.push('\n');
        }
        out.trim_end().to_string()
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}
