//! MemoryX server library: the conversation aggregator, fact reconciler,
//! tri-store persistence layer and GraphRAG retriever, plus the HTTP API
//! surfacing them. Split out from `main.rs` so integration tests can
//! drive the real pipeline (`tests/scenarios.rs`) instead of only the
//! in-crate unit tests `#[cfg(test)]` modules cover.

pub mod api;
pub mod core;
pub mod middleware;
pub mod models;

use std::sync::Arc;

use crate::core::config::QuotaConfig;
use crate::core::ingestion::aggregator::Aggregator;
use crate::core::retriever::Retriever;
use crate::core::tri_store::combined::TriStore;

/// Everything the HTTP handlers need, assembled once at startup by
/// `main.rs`'s `create_app`.
#[derive(Clone)]
pub struct AppState {
    pub tri_store: Arc<TriStore>,
    pub aggregator: Arc<Aggregator>,
    pub retriever: Arc<Retriever>,
    pub quota_config: QuotaConfig,
}
