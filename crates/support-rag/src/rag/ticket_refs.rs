//! Ticket reference detection and validation.
//!
//! The same compiled prefix set drives both extraction from free text and the
//! validation applied to any id before it reaches the ticket system.

use regex::{Regex, RegexBuilder};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::config::ClassifierConfig;
use crate::error::{SupportError, SupportResult};

/// Longest numeric suffix accepted after the prefix.
const MAX_SUFFIX_DIGITS: usize = 7;
const REGEX_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TicketScan {
    pub ids: Vec<String>,
    /// Input was longer than the scan cap and only the prefix was examined.
    pub truncated: bool,
    /// The time budget ran out before the scan completed.
    pub timed_out: bool,
}

#[derive(Debug, Clone)]
pub struct TicketRefDetector {
    finder: Regex,
    validator: Regex,
    max_ids: usize,
    budget: Duration,
    max_scan_bytes: usize,
}

impl TicketRefDetector {
    pub fn new(
        prefixes: &[String],
        max_ids: usize,
        budget: Duration,
        max_scan_bytes: usize,
    ) -> SupportResult<Self> {
        if prefixes.is_empty() {
            return Err(SupportError::InvalidConfig("no ticket prefixes configured".into()));
        }
        let alternation = prefixes
            .iter()
            .map(|p| regex::escape(&p.trim().to_uppercase()))
            .collect::<Vec<_>>()
            .join("|");

        let build = |pattern: String| {
            RegexBuilder::new(&pattern)
                .case_insensitive(true)
                .size_limit(REGEX_SIZE_LIMIT)
                .build()
                .map_err(|e| SupportError::InvalidConfig(format!("ticket pattern: {}", e)))
        };

        Ok(Self {
            finder: build(format!(r"\b(?:{})-\d{{1,{}}}\b", alternation, MAX_SUFFIX_DIGITS))?,
            validator: build(format!(r"^(?:{})-\d{{1,{}}}$", alternation, MAX_SUFFIX_DIGITS))?,
            max_ids,
            budget,
            max_scan_bytes,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> SupportResult<Self> {
        Self::new(
            &config.ticket_prefixes,
            config.max_ticket_ids,
            Duration::from_millis(config.ticket_scan_budget_ms),
            config.max_scan_bytes,
        )
    }

    /// Scan `text` for ticket ids: uppercase, deduplicated, first-seen order,
    /// capped at the configured maximum. Input beyond the byte cap is ignored
    /// and the scan stops when its time budget is spent.
    pub fn scan(&self, text: &str) -> TicketScan {
        let mut scan = TicketScan::default();
        let mut end = text.len().min(self.max_scan_bytes);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        scan.truncated = end < text.len();
        let haystack = &text[..end];

        let started = Instant::now();
        let mut seen = HashSet::new();
        for m in self.finder.find_iter(haystack) {
            if started.elapsed() > self.budget {
                scan.timed_out = true;
                tracing::warn!(bytes = haystack.len(), "Ticket reference scan exceeded its time budget");
                break;
            }
            let id = m.as_str().to_uppercase();
            if seen.insert(id.clone()) {
                scan.ids.push(id);
                if scan.ids.len() >= self.max_ids {
                    break;
                }
            }
        }
        scan
    }

    pub fn extract_ids(&self, text: &str) -> Vec<String> {
        self.scan(text).ids
    }

    pub fn contains_reference(&self, text: &str) -> bool {
        !self.extract_ids(text).is_empty()
    }

    /// Normalize and validate a single id before any external call.
    pub fn validate(&self, id: &str) -> SupportResult<String> {
        let trimmed = id.trim();
        if trimmed.is_empty() || trimmed.len() > 32 {
            return Err(SupportError::ValidationFailure(format!("invalid ticket id length: {}", trimmed.len())));
        }
        if !self.validator.is_match(trimmed) {
            return Err(SupportError::ValidationFailure(format!("invalid ticket id: {}", trimmed)));
        }
        Ok(trimmed.to_uppercase())
    }
}
