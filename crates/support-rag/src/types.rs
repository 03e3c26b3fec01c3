use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Knowledge sources the engine retrieves from, in fixed priority order.
///
/// The declaration order is the tie-break used by the context assembler when
/// two sources carry the same weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Tickets,
    TicketSolutions,
    Documentation,
    Articles,
    Reference,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::Tickets,
        SourceKind::TicketSolutions,
        SourceKind::Documentation,
        SourceKind::Articles,
        SourceKind::Reference,
    ];

    /// Section header used in the assembled context.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Tickets => "REFERENCED TICKETS",
            Self::TicketSolutions => "SOLVED TICKETS",
            Self::Documentation => "DOCUMENTATION",
            Self::Articles => "KNOWLEDGE ARTICLES",
            Self::Reference => "REFERENCE DATA",
        }
    }

    /// Name of the persistent blob backing a local store of this source.
    pub fn blob_name(&self) -> &'static str {
        match self {
            Self::Tickets => "tickets",
            Self::TicketSolutions => "ticket_solutions",
            Self::Documentation => "documentation",
            Self::Articles => "articles",
            Self::Reference => "reference",
        }
    }

    /// Whether hits from this source count as documentation evidence for the gate.
    pub fn is_documentation(&self) -> bool {
        matches!(self, Self::Documentation | Self::Articles)
    }

    /// Whether hits from this source can provide a ticket-style fallback link.
    pub fn is_ticket_like(&self) -> bool {
        matches!(self, Self::Tickets | Self::TicketSolutions)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.blob_name())
    }
}

/// Closed set of query intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    TicketLookup,
    Network,
    Erp,
    Access,
    Email,
    Hardware,
    Software,
    Incident,
    General,
}

impl Intent {
    pub const ALL: [Intent; 9] = [
        Intent::TicketLookup,
        Intent::Network,
        Intent::Erp,
        Intent::Access,
        Intent::Email,
        Intent::Hardware,
        Intent::Software,
        Intent::Incident,
        Intent::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TicketLookup => "ticket_lookup",
            Self::Network => "network",
            Self::Erp => "erp",
            Self::Access => "access",
            Self::Email => "email",
            Self::Hardware => "hardware",
            Self::Software => "software",
            Self::Incident => "incident",
            Self::General => "general",
        }
    }

    /// Parse a one-word label, tolerating case, punctuation and a few aliases.
    pub fn from_label(label: &str) -> Option<Self> {
        let cleaned: String = label
            .trim()
            .trim_matches(|c: char| !c.is_alphanumeric() && c != '_')
            .to_lowercase();
        match cleaned.as_str() {
            "ticket_lookup" | "ticket" | "tickets" => Some(Self::TicketLookup),
            "network" | "networking" | "red" => Some(Self::Network),
            "erp" | "sap" => Some(Self::Erp),
            "access" | "accounts" | "acceso" => Some(Self::Access),
            "email" | "mail" | "correo" => Some(Self::Email),
            "hardware" => Some(Self::Hardware),
            "software" | "application" => Some(Self::Software),
            "incident" | "problem" => Some(Self::Incident),
            "general" => Some(Self::General),
            _ => None,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A knowledge document from reference data, documentation pages or articles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub source_file: String,
    pub category: String,
    pub name: String,
    pub description: String,
    /// Comma-joined, ordered keyword list.
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(skip)]
    pub search_score: f32,
}

impl SourceDocument {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source_file: String::new(),
            category: String::new(),
            name: name.into(),
            description: String::new(),
            keywords: String::new(),
            link: None,
            embedding: Vec::new(),
            attributes: HashMap::new(),
            search_score: 0.0,
        }
    }

    /// Usage count recorded by the import process, if any.
    pub fn use_count(&self) -> u32 {
        self.attributes
            .get("use_count")
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}

/// A harvested resolution of a past ticket.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketSolution {
    pub ticket_id: String,
    pub title: String,
    pub problem: String,
    pub root_cause: String,
    pub solution: String,
    #[serde(default)]
    pub steps: Vec<String>,
    pub system: String,
    /// Comma-joined, ordered keyword list.
    pub keywords: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub validation_count: u32,
    #[serde(default)]
    pub promoted: bool,
    pub harvested_date: DateTime<Utc>,
}

impl TicketSolution {
    pub fn new(ticket_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            ticket_id: ticket_id.into(),
            title: title.into(),
            problem: String::new(),
            root_cause: String::new(),
            solution: String::new(),
            steps: Vec::new(),
            system: String::new(),
            keywords: String::new(),
            link: None,
            embedding: Vec::new(),
            validation_count: 0,
            promoted: false,
            harvested_date: Utc::now(),
        }
    }
}

/// A cached (query, answer) pair, used by the semantic cache and the exemplar store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub query: String,
    pub embedding: Vec<f32>,
    pub answer: String,
    pub sources: Vec<String>,
    pub cached_at: DateTime<Utc>,
    pub use_count: u32,
}

impl CachedResponse {
    pub fn new(query: impl Into<String>, embedding: Vec<f32>, answer: impl Into<String>, sources: Vec<String>) -> Self {
        Self {
            query: query.into(),
            embedding,
            answer: answer.into(),
            sources,
            cached_at: Utc::now(),
            use_count: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: Uuid,
    pub query: String,
    pub answer: String,
    pub helpful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_correction: Option<String>,
    pub extracted_keywords: Vec<String>,
    /// Only populated for unhelpful feedback.
    #[serde(default)]
    pub suggested_keywords: Vec<String>,
    pub agent: String,
    pub confident: bool,
    #[serde(default)]
    pub reviewed: bool,
    #[serde(default)]
    pub applied: bool,
    #[serde(default)]
    pub dismissed: bool,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailurePattern {
    pub signature: String,
    pub sample_queries: Vec<String>,
    pub failure_count: u32,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub is_alerted: bool,
    #[serde(default)]
    pub suggested_action: String,
}

/// One prior exchange of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user: String,
    pub assistant: String,
}

impl ConversationTurn {
    pub fn new(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            assistant: assistant.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_label_parsing() {
        assert_eq!(Intent::from_label("Network"), Some(Intent::Network));
        assert_eq!(Intent::from_label(" erp.\n"), Some(Intent::Erp));
        assert_eq!(Intent::from_label("\"ticket_lookup\""), Some(Intent::TicketLookup));
        assert_eq!(Intent::from_label("I think it's network"), None);
        assert_eq!(Intent::from_label(""), None);
    }

    #[test]
    fn test_source_document_round_trip_drops_score() {
        let mut doc = SourceDocument::new("doc-1", "VPN setup");
        doc.search_score = 3.5;
        doc.attributes.insert("use_count".into(), "4".into());
        let json = serde_json::to_string(&doc).unwrap();
        let back: SourceDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(back.search_score, 0.0);
        assert_eq!(back.use_count(), 4);
    }

    #[test]
    fn test_source_priority_order() {
        let mut kinds = vec![SourceKind::Reference, SourceKind::Tickets, SourceKind::Articles];
        kinds.sort();
        assert_eq!(kinds, vec![SourceKind::Tickets, SourceKind::Articles, SourceKind::Reference]);
    }
}
