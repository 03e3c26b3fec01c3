//! Query and document text normalization shared by the scorers, the intent
//! classifier and the feedback loop.

use std::collections::HashSet;
use std::sync::LazyLock;
use unicode_normalization::UnicodeNormalization;

static STOP_WORDS: LazyLock<HashSet<&'static str>> = LazyLock::new(|| {
    [
        // Spanish
        "el", "la", "los", "las", "un", "una", "unos", "unas", "de", "del", "al", "en", "con",
        "por", "para", "que", "se", "es", "son", "esta", "este", "estos", "esto", "eso", "esa",
        "mi", "mis", "tu", "su", "sus", "me", "te", "le", "lo", "les", "nos", "yo", "ya", "hay",
        "como", "cuando", "donde", "pero", "sin", "sobre", "muy", "mas", "tambien", "y", "o",
        "ni", "si", "no", "ayuda", "hola", "favor", "puedo", "puede", "tengo", "tiene", "hacer",
        "quiero", "necesito", "algo", "porque", "cual", "estoy", "esta", "fue", "ser", "han",
        // English
        "the", "a", "an", "and", "or", "of", "to", "in", "on", "for", "with", "is", "are", "was",
        "be", "it", "its", "this", "that", "my", "i", "me", "we", "you", "can", "how", "what",
        "why", "do", "does", "not", "at", "by", "from", "as", "have", "has", "help", "please",
        "need", "want", "get", "there", "about", "when", "where", "which", "will", "would",
    ]
    .into_iter()
    .collect()
});

/// Lowercase and strip combining marks ("Contraseña" -> "contrasena").
pub fn normalize(text: &str) -> String {
    text.nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(token)
}

/// Normalized, stop-word filtered terms of at least two characters,
/// deduplicated in first-seen order.
pub fn tokenize(text: &str) -> Vec<String> {
    let normalized = normalize(text);
    let mut seen = HashSet::new();
    normalized
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 2 && !is_stop_word(t))
        .filter(|t| seen.insert(*t))
        .map(str::to_string)
        .collect()
}

/// Number of whitespace separated words, stop words included.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Cache key form of a query: normalized, punctuation trimmed, whitespace collapsed.
pub fn cache_key(text: &str) -> String {
    normalize(text)
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| c.is_ascii_punctuation() || c == '¿' || c == '¡'))
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
