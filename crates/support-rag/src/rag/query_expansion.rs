//! Synonym-based query expansion for bilingual IT vocabulary.

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::search::tokenize::{normalize, tokenize};

/// Default synonym groups; every member expands to the others.
const DEFAULT_GROUPS: &[&[&str]] = &[
    &["contrasena", "password", "clave"],
    &["correo", "email", "outlook"],
    &["usuario", "user", "cuenta"],
    &["impresora", "printer"],
    &["portatil", "laptop", "notebook"],
    &["red", "network"],
    &["wifi", "inalambrica", "wireless"],
    &["bloqueado", "bloqueada", "locked"],
    &["acceso", "access", "permiso"],
    &["instalar", "install", "instalacion"],
    &["pantalla", "monitor", "screen"],
    &["error", "falla", "fallo"],
    &["sap", "erp"],
];

#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedQuery {
    pub original: String,
    /// Synonym terms appended to the original, in query order.
    pub added_terms: Vec<String>,
}

impl ExpandedQuery {
    pub fn was_expanded(&self) -> bool {
        !self.added_terms.is_empty()
    }

    /// The single expanded variant used for an extra retrieval pass.
    pub fn variant(&self) -> Option<String> {
        self.was_expanded()
            .then(|| format!("{} {}", self.original, self.added_terms.join(" ")))
    }
}

pub struct QueryExpander {
    synonyms: RwLock<HashMap<String, Vec<String>>>,
    max_expansions_per_term: usize,
}

impl Default for QueryExpander {
    fn default() -> Self {
        let expander = Self::new(2);
        for group in DEFAULT_GROUPS {
            expander.add_group(group);
        }
        expander
    }
}

impl QueryExpander {
    pub fn new(max_expansions_per_term: usize) -> Self {
        Self {
            synonyms: RwLock::new(HashMap::new()),
            max_expansions_per_term,
        }
    }

    /// Register a synonym group; each member maps to all others.
    pub fn add_group(&self, group: &[&str]) {
        let normalized: Vec<String> = group.iter().map(|t| normalize(t.trim())).collect();
        let mut synonyms = self.synonyms.write();
        for term in &normalized {
            let entry = synonyms.entry(term.clone()).or_default();
            for other in normalized.iter().filter(|o| *o != term) {
                if !entry.contains(other) {
                    entry.push(other.clone());
                }
            }
        }
    }

    pub fn expand(&self, query: &str) -> ExpandedQuery {
        let terms = tokenize(query);
        let synonyms = self.synonyms.read();
        let mut added: Vec<String> = Vec::new();

        for term in &terms {
            let Some(options) = synonyms.get(term) else {
                continue;
            };
            let fresh = options
                .iter()
                .filter(|s| !terms.contains(s) && !added.contains(s))
                .take(self.max_expansions_per_term)
                .cloned()
                .collect::<Vec<_>>();
            added.extend(fresh);
        }

        ExpandedQuery {
            original: query.trim().to_string(),
            added_terms: added,
        }
    }

    pub fn len(&self) -> usize {
        self.synonyms.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expands_bilingual_synonyms() {
        let expanded = QueryExpander::default().expand("Cambiar la contraseña del correo");
        assert_eq!(expanded.added_terms, vec!["password", "clave", "email", "outlook"]);
        assert_eq!(
            expanded.variant().unwrap(),
            "Cambiar la contraseña del correo password clave email outlook"
        );
    }

    #[test]
    fn test_no_variant_without_synonyms() {
        let expanded = QueryExpander::default().expand("horario del comedor");
        assert!(!expanded.was_expanded());
        assert!(expanded.variant().is_none());
    }

    #[test]
    fn test_terms_already_present_are_not_added() {
        let expanded = QueryExpander::default().expand("outlook correo email");
        assert!(expanded.added_terms.is_empty());
    }

    #[test]
    fn test_custom_group() {
        let expander = QueryExpander::new(1);
        expander.add_group(&["VPN", "FortiClient"]);
        assert_eq!(expander.expand("la vpn no conecta").added_terms, vec!["forticlient"]);
    }
}
