use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::types::Intent;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportConfig {
    pub data_dir: PathBuf,
    pub search: SearchConfig,
    pub gate: GateConfig,
    pub cache: CacheConfig,
    pub learning: LearningConfig,
    pub classifier: ClassifierConfig,
    pub context: ContextConfig,
    pub generation: GenerationSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub default_k: usize,
    pub candidate_multiplier: usize,
    /// Cosine similarity below which semantic hits are dropped.
    pub semantic_floor: f32,
    pub rrf_k: usize,
    /// Upper bound of the usage boost applied by the lexical scorer.
    pub max_usage_boost: f32,
    pub enable_query_expansion: bool,
    pub enable_decomposition: bool,
    /// Results requested from the external documentation system.
    pub documentation_top: usize,
    /// Results requested from the external ticket system.
    pub ticket_search_max: usize,
    /// Minimum similarity for a helpful exemplar to be injected as a few-shot turn.
    pub exemplar_similarity: f32,
    pub max_exemplars: usize,
    /// Applied to every external call (embedding, ticket, documentation).
    pub provider_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateConfig {
    pub threshold: f32,
    /// Relevance assigned to sources that return hits without a numeric score.
    pub placeholder_score: f32,
    pub default_ticket_link: String,
    pub no_information_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub exact_ttl_secs: u64,
    pub exact_capacity: usize,
    pub semantic_capacity: usize,
    pub semantic_threshold: f32,
    pub embedding_cache_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    pub alert_threshold: u32,
    pub enrichment_threshold: u32,
    pub exemplar_capacity: usize,
    pub max_sample_queries: usize,
    pub background_queue_capacity: usize,
}

/// Keyword set tested by substring containment; first rule with a hit wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainRule {
    pub intent: Intent,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    pub ticket_prefixes: Vec<String>,
    pub max_ticket_ids: usize,
    /// Wall-clock budget for ticket-reference scanning.
    pub ticket_scan_budget_ms: u64,
    /// Input beyond this many bytes is not scanned for ticket references.
    pub max_scan_bytes: usize,
    pub ambiguous_max_tokens: usize,
    pub ambiguity_phrases: Vec<String>,
    pub history_window: usize,
    /// Domain precedence used when resolving an ambiguous query from history.
    pub history_priority: Vec<Intent>,
    pub domain_rules: Vec<DomainRule>,
    /// Transaction codes accepted by the transaction-code matcher.
    pub known_transactions: Vec<String>,
    pub llm_fallback: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    pub max_items_per_source: usize,
    pub max_chars_per_item: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationSettings {
    pub max_tokens: usize,
    pub temperature: f32,
    pub classification_max_tokens: usize,
    pub system_prompt: Option<String>,
}

impl SupportConfig {
    /// Validate config values, returning errors for clearly broken configurations.
    pub fn validate(&self) -> Result<(), String> {
        if self.search.default_k == 0 {
            return Err("search.default_k must be > 0".into());
        }
        if self.search.candidate_multiplier == 0 {
            return Err("search.candidate_multiplier must be > 0".into());
        }
        if self.search.rrf_k == 0 {
            return Err("search.rrf_k must be > 0".into());
        }
        if !(0.0..=1.0).contains(&self.search.semantic_floor) {
            return Err("search.semantic_floor must be in [0.0, 1.0]".into());
        }
        if self.search.max_usage_boost < 1.0 {
            return Err("search.max_usage_boost must be >= 1.0".into());
        }
        if !(0.0..=1.0).contains(&self.gate.threshold) {
            return Err("gate.threshold must be in [0.0, 1.0]".into());
        }
        if !(0.0..=1.0).contains(&self.gate.placeholder_score) {
            return Err("gate.placeholder_score must be in [0.0, 1.0]".into());
        }
        if self.gate.default_ticket_link.trim().is_empty() {
            return Err("gate.default_ticket_link must not be empty".into());
        }
        if !(0.0..=1.0).contains(&self.cache.semantic_threshold) {
            return Err("cache.semantic_threshold must be in [0.0, 1.0]".into());
        }
        if self.cache.exact_capacity == 0 || self.cache.semantic_capacity == 0 {
            return Err("cache capacities must be > 0".into());
        }
        if self.learning.alert_threshold == 0 || self.learning.enrichment_threshold == 0 {
            return Err("learning thresholds must be > 0".into());
        }
        if self.learning.background_queue_capacity == 0 {
            return Err("learning.background_queue_capacity must be > 0".into());
        }
        if self.classifier.ticket_prefixes.is_empty() {
            return Err("classifier.ticket_prefixes must not be empty".into());
        }
        if self
            .classifier
            .ticket_prefixes
            .iter()
            .any(|p| p.is_empty() || !p.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err("classifier.ticket_prefixes must be ASCII letters".into());
        }
        if self.context.max_items_per_source == 0 || self.context.max_chars_per_item < 32 {
            return Err("context budgets are too small".into());
        }
        Ok(())
    }

    /// Load config from a JSON file, falling back to defaults for missing fields.
    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file: {}", e))?;
        let mut value: serde_json::Value = serde_json::to_value(Self::default())
            .map_err(|e| format!("Failed to serialize defaults: {}", e))?;
        let overrides: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        merge_json(&mut value, overrides);
        let config: Self = serde_json::from_value(value)
            .map_err(|e| format!("Failed to parse config: {}", e))?;
        config.validate()?;
        Ok(config)
    }
}

fn merge_json(base: &mut serde_json::Value, overrides: serde_json::Value) {
    match (base, overrides) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(over_map)) => {
            for (key, value) in over_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

fn words(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Ordered domain keyword table. Network is checked before the generic incident set.
pub fn default_domain_rules() -> Vec<DomainRule> {
    vec![
        DomainRule {
            intent: Intent::Network,
            keywords: words(&[
                "vpn", "wifi", "wi-fi", "red", "internet", "proxy", "dns", "ethernet",
                "conexion", "conectividad", "firewall", "ping", "network", "latencia",
            ]),
        },
        DomainRule {
            intent: Intent::Erp,
            keywords: words(&[
                "sap", "erp", "transaccion", "fiori", "orden de compra", "pedido de venta",
                "factura", "mandante", "hana", "centro de costo",
            ]),
        },
        DomainRule {
            intent: Intent::Access,
            keywords: words(&[
                "contrasena", "password", "clave", "acceso", "bloquead", "desbloque",
                "usuario", "permiso", "login", "credencial", "mfa", "cuenta",
            ]),
        },
        DomainRule {
            intent: Intent::Email,
            keywords: words(&["correo", "outlook", "email", "e-mail", "buzon", "calendario"]),
        },
        DomainRule {
            intent: Intent::Hardware,
            keywords: words(&[
                "laptop", "portatil", "monitor", "teclado", "mouse", "raton", "impresora",
                "printer", "pantalla", "bateria", "cargador", "docking",
            ]),
        },
        DomainRule {
            intent: Intent::Software,
            keywords: words(&[
                "instalar", "instalacion", "licencia", "aplicacion", "programa", "office",
                "excel", "teams", "actualizacion", "software", "navegador",
            ]),
        },
        DomainRule {
            intent: Intent::Incident,
            keywords: words(&[
                "problema", "error", "falla", "fallo", "no funciona", "caido", "issue",
                "incidente",
            ]),
        },
    ]
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            ticket_prefixes: words(&["MT", "IT", "INC", "REQ", "SR", "CHG"]),
            max_ticket_ids: 5,
            ticket_scan_budget_ms: 50,
            max_scan_bytes: 4096,
            ambiguous_max_tokens: 4,
            ambiguity_phrases: words(&[
                "sigue igual", "sigue sin funcionar", "no funciono", "otra vez", "y ahora",
                "mas informacion", "lo mismo", "still not working", "same problem",
                "more details", "what else", "and now",
            ]),
            history_window: 3,
            history_priority: vec![
                Intent::Network,
                Intent::Erp,
                Intent::Access,
                Intent::Email,
                Intent::Hardware,
                Intent::Software,
                Intent::Incident,
            ],
            domain_rules: default_domain_rules(),
            known_transactions: words(&[
                "SU01", "SU53", "PFCG", "SE16", "SM37", "VA01", "VA02", "VA03", "ME21N",
                "ME23N", "MM01", "MM03", "FB60", "MIGO", "MIRO", "F110", "VL01N", "CO01",
            ]),
            llm_fallback: true,
        }
    }
}

impl Default for SupportConfig {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("support-rag");

        Self {
            data_dir,
            search: SearchConfig {
                default_k: 10,
                candidate_multiplier: 3,
                semantic_floor: 0.20,
                rrf_k: 60,
                max_usage_boost: 1.5,
                enable_query_expansion: true,
                enable_decomposition: true,
                documentation_top: 5,
                ticket_search_max: 5,
                exemplar_similarity: 0.80,
                max_exemplars: 2,
                provider_timeout_secs: 20,
            },
            gate: GateConfig {
                threshold: 0.65,
                placeholder_score: 0.7,
                default_ticket_link: "https://servicedesk.example.com/portal/create".to_string(),
                no_information_message: "No encontré información suficiente en la base de \
                    conocimiento para responder con seguridad. Puedes abrir un ticket aquí:"
                    .to_string(),
            },
            cache: CacheConfig {
                enabled: true,
                exact_ttl_secs: 3600,
                exact_capacity: 512,
                semantic_capacity: 256,
                semantic_threshold: 0.95,
                embedding_cache_size: 1000,
            },
            learning: LearningConfig {
                alert_threshold: 3,
                enrichment_threshold: 3,
                exemplar_capacity: 200,
                max_sample_queries: 5,
                background_queue_capacity: 256,
            },
            classifier: ClassifierConfig::default(),
            context: ContextConfig {
                max_items_per_source: 5,
                max_chars_per_item: 600,
            },
            generation: GenerationSettings {
                max_tokens: 1024,
                temperature: 0.2,
                classification_max_tokens: 5,
                system_prompt: None,
            },
        }
    }
}
