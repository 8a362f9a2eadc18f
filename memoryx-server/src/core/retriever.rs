//! C5 — GraphRAG retrieval: vector recall fused with graph-context
//! expansion and temporal decay (spec.md §4.5).

pub mod quota;
pub mod retriever;
pub mod scoring;

pub use retriever::{RankedMemory, Retriever, SearchOutcome};
