//! Rule-cascade intent classification.
//!
//! Rules run in a fixed order and the first one that fires decides:
//! ticket reference, history override for ambiguous follow-ups, domain
//! keyword table, structured code patterns, then the generation-provider
//! fallback. Keyword sets and code dictionaries come from configuration.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::LazyLock;

use super::ticket_refs::TicketRefDetector;
use crate::config::ClassifierConfig;
use crate::error::SupportResult;
use crate::search::tokenize::{normalize, word_count};
use crate::types::{ConversationTurn, Intent};

/// Narrow interface to whatever model answers the one-word classification prompt.
#[async_trait]
pub trait IntentFallback: Send + Sync {
    async fn classify(&self, text: &str) -> Intent;
}

/// Which rule produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentSource {
    TicketReference,
    History,
    DomainKeywords,
    CodePattern,
    LlmFallback,
    Default,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub intent: Intent,
    pub source: IntentSource,
    /// Ticket ids found in the query, in first-seen order.
    pub ticket_ids: Vec<String>,
    /// The keyword or code that fired, when a deterministic rule decided.
    pub matched: Option<String>,
}

impl Classification {
    fn new(intent: Intent, source: IntentSource) -> Self {
        Self {
            intent,
            source,
            ticket_ids: Vec::new(),
            matched: None,
        }
    }

    fn with_match(mut self, matched: impl Into<String>) -> Self {
        self.matched = Some(matched.into());
        self
    }
}

// ============================================================================
// Keyword rules
// ============================================================================

#[derive(Debug, Clone)]
struct KeywordRule {
    intent: Intent,
    keywords: Vec<String>,
}

impl KeywordRule {
    /// First keyword present in `text`. Keywords of three characters or fewer
    /// must match a whole token ("red" must not fire on "credencial").
    fn first_hit(&self, text: &str, tokens: &HashSet<&str>) -> Option<&str> {
        self.keywords
            .iter()
            .find(|kw| {
                if kw.chars().count() <= 3 {
                    tokens.contains(kw.as_str())
                } else {
                    text.contains(kw.as_str())
                }
            })
            .map(String::as_str)
    }
}

fn token_set(text: &str) -> HashSet<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

// ============================================================================
// Code patterns
// ============================================================================

static TRANSACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Za-z][A-Za-z0-9]{2,5}\b").expect("transaction regex is valid"));
static ROLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[zy]_[a-z0-9_]{3,40}\b").expect("role regex is valid"));
static POSITION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:pos|puesto)[-_ ]?\d{6,8}\b").expect("position regex is valid"));

#[derive(Debug, Clone)]
struct CodePattern {
    name: &'static str,
    intent: Intent,
    regex: &'static LazyLock<Regex>,
    /// When present, a match only counts if its uppercase form is listed.
    dictionary: Option<HashSet<String>>,
}

impl CodePattern {
    fn first_hit(&self, query: &str) -> Option<String> {
        self.regex.find_iter(query).find_map(|m| {
            let code = m.as_str().to_uppercase();
            match &self.dictionary {
                Some(known) => known.contains(&code).then_some(code),
                None => Some(code),
            }
        })
    }
}

// ============================================================================
// Classifier
// ============================================================================

pub struct IntentClassifier {
    detector: TicketRefDetector,
    rules: Vec<KeywordRule>,
    history_priority: Vec<Intent>,
    ambiguity_phrases: Vec<String>,
    ambiguous_max_tokens: usize,
    history_window: usize,
    code_patterns: Vec<CodePattern>,
    fallback: Option<Arc<dyn IntentFallback>>,
}

impl IntentClassifier {
    pub fn from_config(config: &ClassifierConfig) -> SupportResult<Self> {
        let rules = config
            .domain_rules
            .iter()
            .map(|r| KeywordRule {
                intent: r.intent,
                keywords: r
                    .keywords
                    .iter()
                    .map(|k| normalize(k.trim()))
                    .filter(|k| !k.is_empty())
                    .collect(),
            })
            .collect();

        let known: HashSet<String> = config
            .known_transactions
            .iter()
            .map(|t| t.trim().to_uppercase())
            .collect();

        Ok(Self {
            detector: TicketRefDetector::from_config(config)?,
            rules,
            history_priority: config.history_priority.clone(),
            ambiguity_phrases: config.ambiguity_phrases.iter().map(|p| normalize(p)).collect(),
            ambiguous_max_tokens: config.ambiguous_max_tokens,
            history_window: config.history_window,
            code_patterns: vec![
                CodePattern {
                    name: "transaction",
                    intent: Intent::Erp,
                    regex: &TRANSACTION_RE,
                    dictionary: Some(known),
                },
                CodePattern {
                    name: "role",
                    intent: Intent::Access,
                    regex: &ROLE_RE,
                    dictionary: None,
                },
                CodePattern {
                    name: "position",
                    intent: Intent::Erp,
                    regex: &POSITION_RE,
                    dictionary: None,
                },
            ],
            fallback: None,
        })
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn IntentFallback>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn detector(&self) -> &TicketRefDetector {
        &self.detector
    }

    pub fn is_ambiguous(&self, query: &str) -> bool {
        if word_count(query) <= self.ambiguous_max_tokens {
            return true;
        }
        let normalized = normalize(query);
        self.ambiguity_phrases.iter().any(|p| normalized.contains(p.as_str()))
    }

    /// First intent in keyword-table order whose keywords appear in `text`.
    pub fn keyword_intent(&self, text: &str) -> Option<(Intent, String)> {
        let normalized = normalize(text);
        let tokens = token_set(&normalized);
        self.rules
            .iter()
            .find_map(|rule| rule.first_hit(&normalized, &tokens).map(|kw| (rule.intent, kw.to_string())))
    }

    fn history_intent(&self, history: &[ConversationTurn]) -> Option<(Intent, String)> {
        let start = history.len().saturating_sub(self.history_window);
        let recent = history[start..]
            .iter()
            .map(|t| format!("{} {}", t.user, t.assistant))
            .collect::<Vec<_>>()
            .join(" ");
        let normalized = normalize(&recent);
        let tokens = token_set(&normalized);

        for intent in &self.history_priority {
            let hit = self
                .rules
                .iter()
                .filter(|r| r.intent == *intent)
                .find_map(|r| r.first_hit(&normalized, &tokens));
            if let Some(kw) = hit {
                return Some((*intent, kw.to_string()));
            }
        }
        None
    }

    /// Rules 1-4. `None` means only the fallback is left.
    pub fn classify_rules(&self, query: &str, history: &[ConversationTurn]) -> Option<Classification> {
        let ticket_ids = self.detector.extract_ids(query);
        if let Some(first) = ticket_ids.first().cloned() {
            let mut c = Classification::new(Intent::TicketLookup, IntentSource::TicketReference).with_match(first);
            c.ticket_ids = ticket_ids;
            return Some(c);
        }

        if !history.is_empty() && self.is_ambiguous(query) {
            if let Some((intent, kw)) = self.history_intent(history) {
                return Some(Classification::new(intent, IntentSource::History).with_match(kw));
            }
        }

        if let Some((intent, kw)) = self.keyword_intent(query) {
            return Some(Classification::new(intent, IntentSource::DomainKeywords).with_match(kw));
        }

        self.code_patterns.iter().find_map(|p| {
            p.first_hit(query).map(|code| {
                tracing::debug!(pattern = p.name, code = %code, "Code pattern matched");
                Classification::new(p.intent, IntentSource::CodePattern).with_match(code)
            })
        })
    }

    pub async fn classify(&self, query: &str, history: &[ConversationTurn]) -> Classification {
        if let Some(c) = self.classify_rules(query, history) {
            tracing::debug!(intent = %c.intent, source = ?c.source, matched = ?c.matched, "Intent classified");
            return c;
        }

        match &self.fallback {
            Some(fallback) => {
                let intent = fallback.classify(query).await;
                tracing::debug!(intent = %intent, "Intent from generation fallback");
                Classification::new(intent, IntentSource::LlmFallback)
            }
            None => Classification::new(Intent::General, IntentSource::Default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainRule;
    use crate::test_support::FixedIntent;

    fn classifier() -> IntentClassifier {
        IntentClassifier::from_config(&ClassifierConfig::default()).unwrap()
    }

    fn rules_intent(query: &str) -> Option<Intent> {
        classifier().classify_rules(query, &[]).map(|c| c.intent)
    }

    #[test]
    fn test_ticket_reference_overrides_domain_keywords() {
        let c = classifier()
            .classify_rules("la VPN falla otra vez, ver MT-799225 y el correo", &[])
            .unwrap();
        assert_eq!(c.intent, Intent::TicketLookup);
        assert_eq!(c.source, IntentSource::TicketReference);
        assert_eq!(c.ticket_ids, vec!["MT-799225"]);
    }

    #[test]
    fn test_domain_table_order() {
        assert_eq!(rules_intent("la vpn tiene un problema de conexión"), Some(Intent::Network));
        assert_eq!(rules_intent("no puedo entrar a SAP para crear la factura"), Some(Intent::Erp));
        assert_eq!(rules_intent("olvidé mi contraseña de windows"), Some(Intent::Access));
        assert_eq!(rules_intent("Outlook no sincroniza el calendario"), Some(Intent::Email));
        assert_eq!(rules_intent("la impresora del piso 3 no imprime"), Some(Intent::Hardware));
        assert_eq!(rules_intent("necesito instalar una licencia nueva"), Some(Intent::Software));
        assert_eq!(rules_intent("tengo un error raro desde ayer"), Some(Intent::Incident));
    }

    #[test]
    fn test_short_keywords_need_whole_token() {
        // "red" must not fire inside "credencial"; "credencial" itself is an access keyword.
        let c = classifier().classify_rules("mis credenciales expiraron", &[]).unwrap();
        assert_eq!(c.intent, Intent::Access);
        assert_eq!(c.matched.as_deref(), Some("credencial"));
    }

    #[test]
    fn test_accent_insensitive_matching() {
        assert_eq!(rules_intent("CONEXIÓN inestable en la oficina"), Some(Intent::Network));
    }

    #[test]
    fn test_history_override_for_ambiguous_followup() {
        let history = vec![
            ConversationTurn::new("hola", "¿en qué te ayudo?"),
            ConversationTurn::new("la vpn se desconecta", "Prueba reinstalar el cliente"),
        ];
        let c = classifier().classify_rules("sigue igual", &history).unwrap();
        assert_eq!(c.intent, Intent::Network);
        assert_eq!(c.source, IntentSource::History);
    }

    #[test]
    fn test_history_window_is_bounded() {
        let mut history = vec![ConversationTurn::new("la vpn no conecta", "reinicia")];
        for _ in 0..3 {
            history.push(ConversationTurn::new("gracias", "de nada"));
        }
        assert!(classifier().classify_rules("¿y ahora?", &history).is_none());
    }

    #[test]
    fn test_history_priority_order() {
        let history = vec![ConversationTurn::new(
            "outlook no abre y la impresora tampoco",
            "revisa la conexión de red",
        )];
        let c = classifier().classify_rules("sigue igual", &history).unwrap();
        assert_eq!(c.intent, Intent::Network);
    }

    #[test]
    fn test_long_specific_query_ignores_history() {
        let history = vec![ConversationTurn::new("la vpn falla", "ok")];
        let c = classifier()
            .classify_rules("ahora tambien falla la impresora del segundo piso", &history)
            .unwrap();
        assert_eq!(c.intent, Intent::Hardware);
        assert_eq!(c.source, IntentSource::DomainKeywords);
    }

    #[test]
    fn test_transaction_codes_are_validated() {
        let c = classifier().classify_rules("me sale un mensaje en ME21N al grabar", &[]).unwrap();
        assert_eq!(c.intent, Intent::Erp);
        assert_eq!(c.source, IntentSource::CodePattern);
        assert_eq!(c.matched.as_deref(), Some("ME21N"));

        assert!(classifier().classify_rules("me sale XY99Z al grabar", &[]).is_none());
    }

    #[test]
    fn test_role_and_position_patterns_need_no_dictionary() {
        let role = classifier().classify_rules("asignar rol Z_FI_AP_CLERK a Juan", &[]).unwrap();
        assert_eq!(role.intent, Intent::Access);
        assert_eq!(role.source, IntentSource::CodePattern);

        let position = classifier().classify_rules("cambio de puesto 50001234 a otra unidad", &[]).unwrap();
        assert_eq!(position.source, IntentSource::CodePattern);
    }

    #[test]
    fn test_rules_are_data_driven() {
        let mut config = ClassifierConfig::default();
        config.domain_rules.insert(
            0,
            DomainRule {
                intent: Intent::Hardware,
                keywords: vec!["Teléfono".into()],
            },
        );
        let c = IntentClassifier::from_config(&config)
            .unwrap()
            .classify_rules("el telefono de la vpn", &[])
            .unwrap();
        assert_eq!(c.intent, Intent::Hardware);
    }

    #[tokio::test]
    async fn test_fallback_only_when_rules_are_silent() {
        let stub = Arc::new(FixedIntent::new(Intent::Software));
        let classifier = classifier().with_fallback(stub.clone());

        let c = classifier.classify("quiero saber algo sobre el comedor", &[]).await;
        assert_eq!(c.intent, Intent::Software);
        assert_eq!(c.source, IntentSource::LlmFallback);

        classifier.classify("la vpn no conecta desde casa", &[]).await;
        assert_eq!(stub.calls(), 1);
    }

    #[tokio::test]
    async fn test_no_fallback_defaults_to_general() {
        let c = classifier().classify("quiero saber algo sobre el comedor", &[]).await;
        assert_eq!(c.intent, Intent::General);
        assert_eq!(c.source, IntentSource::Default);
    }
}
