//! Query routing and context building: ticket references, intent cascade,
//! per-intent source weights, query variants, assembly and the confidence gate.

pub mod confidence_gate;
pub mod context_assembler;
pub mod intent;
pub mod llm_router;
pub mod query_decomposer;
pub mod query_expansion;
pub mod search_weights;
pub mod ticket_refs;

pub use confidence_gate::{ConfidenceGate, GateDecision};
pub use context_assembler::{AssembledContext, ContextAssembler, ContextItem, ContextSection};
pub use intent::{Classification, IntentClassifier, IntentFallback, IntentSource};
pub use llm_router::{parse_intent_reply, LlmIntentClassifier};
pub use query_decomposer::{decompose_query, DecomposedQuery, DecompositionStrategy};
pub use query_expansion::{ExpandedQuery, QueryExpander};
pub use search_weights::{SearchWeights, SourceWeight};
pub use ticket_refs::{TicketRefDetector, TicketScan};
