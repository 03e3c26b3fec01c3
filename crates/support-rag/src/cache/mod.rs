//! Two-tier response cache: exact normalized-query match, then embedding similarity.

pub mod exact;
pub mod semantic;

use serde::{Deserialize, Serialize};

pub use exact::ExactCache;
pub use semantic::{evict_least_used, SemanticCache};

/// Which tier served a cached response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheTier {
    Exact,
    Semantic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub answer: String,
    pub sources: Vec<String>,
}
