//! The three storage trait families C4 composes (spec.md §4.4): the
//! relational store is authoritative, the vector index and entity graph
//! are derived projections kept eventually consistent by the reconciler's
//! saga.

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use crate::core::auth::AgentRegistration;
use crate::models::memory::{Entity, IngestionTask, Memory, Relation, TaskStatus};
use crate::models::owner::Owner;

/// Authoritative store for memories, ingestion tasks, API keys and quota
/// counters. Implementations must be thread-safe.
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn insert_memory(&self, memory: &Memory) -> Result<()>;
    async fn update_memory(&self, memory: &Memory) -> Result<()>;
    async fn get_memory(&self, owner: &Owner, id: Uuid) -> Result<Option<Memory>>;
    async fn delete_memory(&self, owner: &Owner, id: Uuid) -> Result<bool>;
    async fn list_memories(&self, owner: &Owner, limit: usize, offset: usize) -> Result<Vec<Memory>>;
    async fn count_memories(&self, owner: &Owner) -> Result<u64>;

    async fn insert_task(&self, task: &IngestionTask) -> Result<()>;
    async fn update_task_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        extracted_count: usize,
        error: Option<String>,
    ) -> Result<()>;
    async fn get_task(&self, task_id: Uuid) -> Result<Option<IngestionTask>>;

    /// Looks up a still-live (submitted within the last 24 hours) task for
    /// this owner's conversation segment id, the de-duplication check
    /// behind spec.md §4.2's idempotent conversation-flush endpoint.
    async fn find_recent_task_by_segment(&self, owner: &Owner, segment_id: &str) -> Result<Option<IngestionTask>>;

    async fn resolve_api_key(&self, api_key: &str) -> Result<Option<Owner>>;

    /// Finds or mints the API key for one device/agent identified by its
    /// machine fingerprint (spec.md §6 `/agents/auto-register`).
    /// Idempotent: re-registering the same fingerprint replays the
    /// previously issued key rather than minting a second one.
    async fn register_agent(
        &self,
        fingerprint: &str,
        agent_type: &str,
        agent_name: &str,
        platform: &str,
        platform_version: &str,
    ) -> Result<AgentRegistration>;

    /// Returns the number of searches already counted today for this
    /// owner, incrementing the counter as a side effect (spec.md §6 quota
    /// semantics: check-and-increment must be atomic per owner per day).
    async fn increment_and_get_daily_searches(&self, owner: &Owner) -> Result<u32>;

    /// Peeks today's search count without incrementing it, for `GET
    /// /v1/quota` (spec.md §6).
    async fn get_daily_searches(&self, owner: &Owner) -> Result<u32>;

    /// Undoes one `increment_and_get_daily_searches` call — used when the
    /// increment pushed the owner over quota, so the rejected request
    /// leaves no lasting effect on the counter (spec.md §8 S7: "no quota
    /// consumed by the failing call").
    async fn decrement_daily_searches(&self, owner: &Owner) -> Result<()>;

    /// Every owner partition with at least one memory row — the drift
    /// sweep's (spec.md §4.3) outer loop over owners.
    async fn list_owners(&self) -> Result<Vec<Owner>>;
}

/// Similarity search over memory embeddings (spec.md §4.4, §4.5 step 1).
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(
        &self,
        owner: &Owner,
        memory_id: Uuid,
        content: &str,
        category: Option<&str>,
        embedding: &[f32],
    ) -> Result<()>;
    async fn delete(&self, owner: &Owner, memory_id: Uuid) -> Result<()>;
    /// Returns `(memory_id, cosine_similarity)` pairs ordered descending.
    /// `category` narrows the kNN search to memories sharing that
    /// category when the caller has a confident guess (spec.md §4.3 step
    /// 2, §4.4 "filtered kNN").
    async fn search(&self, owner: &Owner, embedding: &[f32], limit: usize, category: Option<&str>) -> Result<Vec<(Uuid, f32)>>;
    /// Whether a vector entry for this memory id exists — used by the
    /// drift sweep to detect orphaned relational rows.
    async fn exists(&self, owner: &Owner, memory_id: Uuid) -> Result<bool>;
}

/// Entity/relation graph used for GraphRAG expansion (spec.md §4.4,
/// §4.5 step 3).
#[async_trait]
pub trait EntityGraph: Send + Sync {
    async fn upsert_entity(&self, entity: &Entity) -> Result<Uuid>;
    async fn upsert_relation(&self, relation: &Relation) -> Result<()>;
    async fn link_memory(&self, owner: &Owner, memory_id: Uuid, entity_id: Uuid) -> Result<()>;
    async fn unlink_memory(&self, owner: &Owner, memory_id: Uuid) -> Result<()>;
    /// Whether a memory has any entity links at all — used by the drift
    /// sweep to detect orphaned relational rows.
    async fn memory_is_linked(&self, owner: &Owner, memory_id: Uuid) -> Result<bool>;

    /// Entities reachable from `seed_entity_ids` within `depth` hops,
    /// together with the memories linked to them — the raw material for
    /// C5's graph-boost term.
    async fn expand(
        &self,
        owner: &Owner,
        seed_entity_ids: &[Uuid],
        depth: u8,
    ) -> Result<Vec<(Uuid, Uuid)>>;

    async fn find_entity_by_name(&self, owner: &Owner, canonical_name: &str) -> Result<Option<Entity>>;
}
