//! Intent to per-source emphasis.
//!
//! Weights only re-scale already ranked results and bound how many items of
//! each source reach the context; scoring formulas never see them.

use std::collections::BTreeMap;

use crate::types::{Intent, SourceKind};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceWeight {
    pub weight: f32,
    pub budget: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchWeights {
    intent: Intent,
    entries: BTreeMap<SourceKind, SourceWeight>,
}

impl SearchWeights {
    /// Weight table for `intent`. General keeps every source at 1.0 with
    /// `default_budget` items.
    pub fn for_intent(intent: Intent, default_budget: usize) -> Self {
        use SourceKind::*;

        // (tickets, solutions, documentation, articles, reference) as (weight, budget)
        let table: [(f32, usize); 5] = match intent {
            Intent::General => [(1.0, default_budget); 5],
            Intent::TicketLookup => [(2.0, 5), (1.5, 5), (0.6, 3), (0.6, 3), (0.5, 2)],
            Intent::Network => [(1.0, 3), (1.2, 4), (1.5, 5), (1.3, 5), (0.8, 3)],
            Intent::Erp => [(1.0, 3), (1.3, 4), (1.2, 4), (1.0, 3), (1.6, 5)],
            Intent::Access => [(1.0, 3), (1.3, 4), (1.2, 4), (1.0, 3), (1.4, 5)],
            Intent::Email | Intent::Hardware | Intent::Software => {
                [(1.0, 3), (1.2, 4), (1.3, 5), (1.4, 5), (0.8, 2)]
            }
            Intent::Incident => [(1.2, 4), (1.5, 5), (1.0, 4), (1.0, 4), (0.8, 2)],
        };

        let entries = [Tickets, TicketSolutions, Documentation, Articles, Reference]
            .into_iter()
            .zip(table)
            .map(|(kind, (weight, budget))| (kind, SourceWeight { weight, budget }))
            .collect();

        Self { intent, entries }
    }

    pub fn intent(&self) -> Intent {
        self.intent
    }

    pub fn get(&self, kind: SourceKind) -> SourceWeight {
        self.entries
            .get(&kind)
            .copied()
            .unwrap_or(SourceWeight { weight: 1.0, budget: 0 })
    }

    pub fn weight(&self, kind: SourceKind) -> f32 {
        self.get(kind).weight
    }

    pub fn budget(&self, kind: SourceKind) -> usize {
        self.get(kind).budget
    }

    /// Sources by descending weight; equal weights keep the fixed source priority.
    pub fn ordered_sources(&self) -> Vec<SourceKind> {
        let mut kinds: Vec<SourceKind> = self.entries.keys().copied().collect();
        kinds.sort_by(|a, b| {
            self.weight(*b)
                .partial_cmp(&self.weight(*a))
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.cmp(b))
        });
        kinds
    }
}
