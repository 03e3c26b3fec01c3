//! Failure pattern mining over unhelpful feedback.

use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::config::DomainRule;
use crate::search::tokenize::{normalize, tokenize};
use crate::types::{FailurePattern, Intent};

pub const GENERAL_FAILURE: &str = "general-failure";
const SIGNATURE_TERMS: usize = 3;

/// Stop-word filtered keywords worth learning from: at least three
/// characters and not purely numeric.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    tokenize(text)
        .into_iter()
        .filter(|t| t.chars().count() >= 3 && !t.chars().all(|c| c.is_ascii_digit()))
        .take(max)
        .collect()
}

/// Sorted top-3 keywords joined by `|`, or `general-failure`.
pub fn failure_signature(keywords: &[String]) -> String {
    let mut top: Vec<&str> = keywords.iter().take(SIGNATURE_TERMS).map(String::as_str).collect();
    if top.is_empty() {
        return GENERAL_FAILURE.to_string();
    }
    top.sort_unstable();
    top.join("|")
}

/// Heuristic follow-up for an alerted pattern, naming the domain its keywords point at.
pub fn suggest_action(keywords: &[String], rules: &[DomainRule]) -> String {
    let domain = rules
        .iter()
        .find(|rule| keywords.iter().any(|k| rule.keywords.iter().any(|rk| normalize(rk) == *k)))
        .map(|rule| rule.intent);

    let terms = if keywords.is_empty() {
        "(no keywords)".to_string()
    } else {
        keywords.join(", ")
    };

    match domain {
        Some(Intent::Network) => format!("Review network/VPN articles and add coverage for: {}", terms),
        Some(Intent::Erp) => format!("Review ERP transaction guides and reference data for: {}", terms),
        Some(Intent::Access) => format!("Check access and password procedures for: {}", terms),
        Some(Intent::Email) => format!("Review mail client documentation for: {}", terms),
        Some(Intent::Hardware) => format!("Add hardware troubleshooting steps for: {}", terms),
        Some(Intent::Software) => format!("Document installation and licensing steps for: {}", terms),
        Some(other) => format!("Harvest solved {} tickets covering: {}", other, terms),
        None => format!("Create a knowledge article covering: {}", terms),
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PatternUpdate {
    pub signature: String,
    pub failure_count: u32,
    /// The pattern crossed the alert threshold on this update.
    pub newly_alerted: bool,
}

pub struct FailurePatternTracker {
    patterns: RwLock<HashMap<String, FailurePattern>>,
    alert_threshold: u32,
    max_samples: usize,
    rules: Vec<DomainRule>,
}

impl FailurePatternTracker {
    pub fn new(alert_threshold: u32, max_samples: usize, rules: Vec<DomainRule>) -> Self {
        Self {
            patterns: RwLock::new(HashMap::new()),
            alert_threshold,
            max_samples,
            rules,
        }
    }

    pub fn load(&self, patterns: Vec<FailurePattern>) {
        let mut map = self.patterns.write();
        for p in patterns {
            map.insert(p.signature.clone(), p);
        }
    }

    pub fn record(&self, query: &str, keywords: &[String]) -> PatternUpdate {
        let signature = failure_signature(keywords);
        let now = Utc::now();
        let mut patterns = self.patterns.write();
        let pattern = patterns.entry(signature.clone()).or_insert_with(|| FailurePattern {
            signature: signature.clone(),
            sample_queries: Vec::new(),
            failure_count: 0,
            first_occurrence: now,
            last_occurrence: now,
            is_alerted: false,
            suggested_action: String::new(),
        });

        pattern.failure_count += 1;
        pattern.last_occurrence = now;
        let sample = query.trim().to_string();
        if pattern.sample_queries.len() < self.max_samples && !pattern.sample_queries.contains(&sample) {
            pattern.sample_queries.push(sample);
        }

        let newly_alerted = !pattern.is_alerted && pattern.failure_count >= self.alert_threshold;
        if newly_alerted {
            pattern.is_alerted = true;
            pattern.suggested_action = suggest_action(keywords, &self.rules);
            tracing::warn!(
                signature = %pattern.signature,
                failures = pattern.failure_count,
                action = %pattern.suggested_action,
                "Failure pattern alert"
            );
        }

        PatternUpdate {
            signature,
            failure_count: pattern.failure_count,
            newly_alerted,
        }
    }

    pub fn get(&self, signature: &str) -> Option<FailurePattern> {
        self.patterns.read().get(signature).cloned()
    }

    /// Clear the alert flag so the pattern can alert again on the next crossing.
    pub fn reset_alert(&self, signature: &str) -> bool {
        match self.patterns.write().get_mut(signature) {
            Some(p) => {
                p.is_alerted = false;
                p.failure_count = 0;
                true
            }
            None => false,
        }
    }

    /// Alerted patterns, most frequent first.
    pub fn alerted(&self) -> Vec<FailurePattern> {
        let mut alerted: Vec<FailurePattern> = self
            .patterns
            .read()
            .values()
            .filter(|p| p.is_alerted)
            .cloned()
            .collect();
        alerted.sort_by(|a, b| b.failure_count.cmp(&a.failure_count).then(a.signature.cmp(&b.signature)));
        alerted
    }

    pub fn all(&self) -> Vec<FailurePattern> {
        self.patterns.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_domain_rules;

    fn tracker() -> FailurePatternTracker {
        FailurePatternTracker::new(3, 2, default_domain_rules())
    }

    #[test]
    fn test_extract_keywords() {
        assert_eq!(
            extract_keywords("La VPN de FortiClient falla con error 809 en Windows 11", 8),
            vec!["vpn", "forticlient", "falla", "error", "windows"]
        );
    }

    #[test]
    fn test_signature_sorted_top_three() {
        let kws: Vec<String> = ["vpn", "forticlient", "falla", "error"].iter().map(|s| s.to_string()).collect();
        assert_eq!(failure_signature(&kws), "falla|forticlient|vpn");
        assert_eq!(failure_signature(&[]), GENERAL_FAILURE);
    }

    #[test]
    fn test_alert_fires_once_at_threshold() {
        let t = tracker();
        let kws = extract_keywords("vpn forticlient desconecta", 8);
        assert!(!t.record("vpn forticlient desconecta", &kws).newly_alerted);
        assert!(!t.record("VPN FortiClient se desconecta", &kws).newly_alerted);
        let third = t.record("vpn forticlient desconecta", &kws);
        assert!(third.newly_alerted);
        assert_eq!(third.failure_count, 3);
        assert!(!t.record("otra vez vpn", &kws).newly_alerted);

        let pattern = t.get(&third.signature).unwrap();
        assert!(pattern.is_alerted);
        assert!(pattern.suggested_action.starts_with("Review network/VPN"));
        // Bounded and deduplicated.
        assert_eq!(pattern.sample_queries.len(), 2);
        assert_eq!(t.alerted().len(), 1);
    }

    #[test]
    fn test_reset_allows_realert() {
        let t = tracker();
        let kws = vec!["sap".to_string()];
        for _ in 0..3 {
            t.record("sap", &kws);
        }
        assert!(t.reset_alert("sap"));
        assert!(t.alerted().is_empty());
        for _ in 0..2 {
            assert!(!t.record("sap", &kws).newly_alerted);
        }
        assert!(t.record("sap", &kws).newly_alerted);
        assert!(!t.reset_alert("missing"));
    }

    #[test]
    fn test_suggest_action_without_domain() {
        let action = suggest_action(&["comedor".to_string()], &default_domain_rules());
        assert_eq!(action, "Create a knowledge article covering: comedor");
    }
}
