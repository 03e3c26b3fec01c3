//! Query Decomposition Module
//!
//! Splits multi-part support requests into independent sub-queries so each
//! part gets its own retrieval pass. Handles enumerations, several questions
//! in one message, comparisons and conjunctions, in Spanish and English.

use std::sync::LazyLock;

static ENUMERATION_MARKER_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?:^|\s)(?:\d{1,2}[.)]|[-•])\s+").expect("enumeration regex is valid")
});

static QUESTION_SPLIT_RE: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"\?\s*¿?|¿").expect("question split regex is valid"));

static COMPARATIVE_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(?:compar(?:e|ar)|difference between|diferencia(?:s)? entre|versus|vs\.?)\b")
        .expect("comparative regex is valid")
});

static BETWEEN_ENTITIES_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)(?:between|entre)\s+(.+?)\s+(?:and|y|e)\s+(.+?)(?:[?.,]|$)")
        .expect("between entities regex is valid")
});

static CONJUNCTION_SPLIT_RE: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"(?i)\b(?:and also|and then|additionally|y también|y tambien|y además|y ademas|y luego|además|ademas|and|y)\b")
        .expect("conjunction regex is valid")
});

/// Phrases where "and"/"y" joins a single concept.
const NON_SPLIT_PHRASES: [&str; 8] = [
    "usuario y contrasena",
    "usuario y contraseña",
    "copiar y pegar",
    "copy and paste",
    "user and password",
    "entrada y salida",
    "pros and cons",
    "ida y vuelta",
];

/// Queries shorter than this are never decomposed.
const MIN_WORDS: usize = 5;

#[derive(Debug, Clone)]
pub struct DecomposedQuery {
    pub original: String,
    pub sub_queries: Vec<String>,
    pub strategy: DecompositionStrategy,
}

impl DecomposedQuery {
    pub fn is_decomposed(&self) -> bool {
        self.strategy != DecompositionStrategy::Single
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecompositionStrategy {
    /// Query was not decomposed (single intent)
    Single,
    /// Enumerated items ("1. X 2. Y")
    Enumerated,
    /// Several questions in one message
    MultiQuestion,
    /// Comparison decomposed into per-entity searches
    Comparative,
    /// Split on conjunctions ("X y Y")
    Conjunction,
}

/// Decompose a query into sub-queries for independent retrieval.
///
/// Returns the original query unchanged if it represents a single request.
pub fn decompose_query(query: &str) -> DecomposedQuery {
    let query = query.trim();

    if query.split_whitespace().count() < MIN_WORDS {
        return single(query);
    }

    let enumerated = split_enumerated(query);
    if enumerated.len() >= 2 {
        return decomposed(query, enumerated, DecompositionStrategy::Enumerated);
    }

    let questions = split_questions(query);
    if questions.len() >= 2 {
        return decomposed(query, questions, DecompositionStrategy::MultiQuestion);
    }

    if let Some(parts) = split_comparative(query) {
        return decomposed(query, parts, DecompositionStrategy::Comparative);
    }

    if let Some(parts) = split_conjunction(query) {
        return decomposed(query, parts, DecompositionStrategy::Conjunction);
    }

    single(query)
}

fn single(query: &str) -> DecomposedQuery {
    DecomposedQuery {
        original: query.to_string(),
        sub_queries: vec![query.to_string()],
        strategy: DecompositionStrategy::Single,
    }
}

fn decomposed(query: &str, sub_queries: Vec<String>, strategy: DecompositionStrategy) -> DecomposedQuery {
    DecomposedQuery {
        original: query.to_string(),
        sub_queries,
        strategy,
    }
}

fn substantial(part: &str, min_words: usize) -> bool {
    part.split_whitespace().count() >= min_words
}

fn split_enumerated(query: &str) -> Vec<String> {
    // Only a message that opens with a marker is treated as a list.
    match ENUMERATION_MARKER_RE.find(query) {
        Some(m) if m.start() == 0 => {}
        _ => return Vec::new(),
    }
    ENUMERATION_MARKER_RE
        .split(query)
        .map(|p| p.trim().to_string())
        .filter(|p| substantial(p, 2))
        .collect()
}

fn split_questions(query: &str) -> Vec<String> {
    QUESTION_SPLIT_RE
        .split(query)
        .map(|p| p.trim().trim_end_matches('?').trim())
        .filter(|p| substantial(p, 2))
        .map(|p| format!("{}?", p))
        .collect()
}

fn split_comparative(query: &str) -> Option<Vec<String>> {
    if !COMPARATIVE_RE.is_match(query) {
        return None;
    }
    let cap = BETWEEN_ENTITIES_RE.captures(query)?;
    let a = cap.get(1)?.as_str().trim();
    let b = cap.get(2)?.as_str().trim();
    if a.is_empty() || b.is_empty() || !(substantial(a, 1) && a.split_whitespace().count() <= 5) {
        return None;
    }
    if b.split_whitespace().count() > 5 {
        return None;
    }
    // The original stays in the list for direct comparison matches.
    Some(vec![a.to_string(), b.to_string(), query.to_string()])
}

fn split_conjunction(query: &str) -> Option<Vec<String>> {
    let lower = query.to_lowercase();
    if NON_SPLIT_PHRASES.iter().any(|p| lower.contains(p)) {
        return None;
    }

    let parts: Vec<String> = CONJUNCTION_SPLIT_RE
        .split(query)
        .map(|p| p.trim().trim_matches(',').trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.len() < 2 {
        return None;
    }

    // Every part must stand alone as a request.
    if parts.iter().all(|p| substantial(p, 3)) {
        Some(parts)
    } else {
        None
    }
}
