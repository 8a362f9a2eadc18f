//! Typed configuration, layered the way the teacher's gateway does:
//! built-in defaults, an optional `config/{run_mode}.toml` file, then an
//! environment overlay (`MEMORYX__SECTION__KEY`).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub relational: RelationalConfig,
    pub vector: VectorConfig,
    pub graph: GraphConfig,
    pub llm: LlmConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub retriever: RetrieverConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Relational store location — the authoritative metadata store (spec.md §6).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RelationalConfig {
    pub url: String,
}

/// Vector similarity index connection (spec.md §6, "vector host/port").
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct VectorConfig {
    pub url: String,
    pub api_key: Option<String>,
}

/// Entity graph store connection (spec.md §6, "graph URI + credentials").
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
}

/// LLM and embedding endpoints (spec.md §6).
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub extraction_model: String,
    pub judge_model: String,
    pub embedding_model: String,
}

/// Auth config. MemoryX does not issue or rotate API keys itself (spec.md §1
/// lists API-key issuance as an out-of-scope collaborator); it only verifies
/// a presented key against the relational store, and optionally carries a
/// content-at-rest encryption key.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    /// Secret used for any session/crypto material this service itself mints.
    pub secret_key: String,
    /// If set, memory content is envelope-encrypted on write (spec.md §6).
    pub content_at_rest_key: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ReconcilerConfig {
    pub worker_pool_size: usize,
    pub max_retry: u32,
    pub task_deadline_secs: u64,
    pub drift_sweep_interval_secs: u64,
    pub similarity_threshold_add: f32,
    pub similarity_threshold_noop: f32,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 2,
            max_retry: 3,
            task_deadline_secs: 30,
            drift_sweep_interval_secs: 3600,
            similarity_threshold_add: 0.80,
            similarity_threshold_noop: 0.95,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RetrieverConfig {
    pub alpha_similarity: f32,
    pub beta_graph: f32,
    pub gamma_recency: f32,
    pub temporal_decay_tau_days: f32,
    pub default_limit: usize,
    pub graph_expansion_depth: u8,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            alpha_similarity: 0.6,
            beta_graph: 0.25,
            gamma_recency: 0.15,
            temporal_decay_tau_days: 30.0,
            default_limit: 10,
            graph_expansion_depth: 2,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct QuotaConfig {
    pub free_tier_daily_searches: u32,
    pub free_tier_memory_cap: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            free_tier_daily_searches: 100,
            free_tier_memory_cap: 10_000,
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("relational.url", "sqlite://memoryx.sqlite3")?
            .set_default("vector.url", "http://localhost:7700")?
            .set_default("graph.uri", "bolt://localhost:7687")?
            .set_default("graph.user", "neo4j")?
            .set_default("graph.password", "change-me-in-production")?
            .set_default("llm.base_url", "http://localhost:11434/v1")?
            .set_default("llm.extraction_model", "memoryx-extract")?
            .set_default("llm.judge_model", "memoryx-judge")?
            .set_default("llm.embedding_model", "memoryx-embed")?
            .set_default("auth.secret_key", "change-me-in-production")?
            .set_default("reconciler.worker_pool_size", 2)?
            .set_default("reconciler.max_retry", 3)?
            .set_default("reconciler.task_deadline_secs", 30)?
            .set_default("reconciler.drift_sweep_interval_secs", 3600)?
            .set_default("reconciler.similarity_threshold_add", 0.80)?
            .set_default("reconciler.similarity_threshold_noop", 0.95)?
            .set_default("retriever.alpha_similarity", 0.6)?
            .set_default("retriever.beta_graph", 0.25)?
            .set_default("retriever.gamma_recency", 0.15)?
            .set_default("retriever.temporal_decay_tau_days", 30.0)?
            .set_default("retriever.default_limit", 10)?
            .set_default("retriever.graph_expansion_depth", 2)?
            .set_default("quota.free_tier_daily_searches", 100)?
            .set_default("quota.free_tier_memory_cap", 10_000)?
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(Environment::with_prefix("MEMORYX").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
