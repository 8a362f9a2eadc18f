//! Core data model (spec.md §3): memories, candidate facts, entities,
//! relations, the memory-entity link, communities and conversation
//! segments as ingested server-side.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::owner::Owner;

/// A durable, reconciled fact. The authoritative copy lives in the
/// relational store; the vector index and entity graph hold derived
/// projections keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: Uuid,
    pub owner: Owner,
    pub content: String,
    /// A coarse category guess carried from extraction, used to filter
    /// the reconciler's neighbor search and the retriever's recall
    /// (spec.md §4.2, §4.3, §4.4).
    pub category: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub source_conversation_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Monotonic per-memory version, bumped on every UPDATE decision
    /// (spec.md §3 invariants: "a memory's version strictly increases").
    pub version: u32,
    /// Soft-delete marker (spec.md §4.3 DELETE step 1: "Mark relational
    /// row tombstoned"). Tombstoned memories are excluded from normal
    /// reads but kept for audit/drift-sweep purposes.
    pub deleted_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// An LLM-extracted fact awaiting reconciliation against existing
/// memories. Never persisted beyond the lifetime of a single
/// reconciliation task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateFact {
    pub content: String,
    pub owner: Owner,
    pub source_conversation_id: Uuid,
    /// The extractor's category guess, if confident (spec.md §3). Used to
    /// narrow the reconciler's near-neighbor search to memories of the
    /// same category when present.
    pub category: Option<String>,
    pub extracted_entities: Vec<ExtractedEntity>,
}

/// An entity mention surfaced during extraction, before it is resolved
/// (or created) in the entity graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
}

/// A node in the entity graph (spec.md §3, §4.4). `canonical_name` is the
/// deduplication key within an owner partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entity {
    pub id: Uuid,
    pub owner: Owner,
    pub canonical_name: String,
    pub entity_type: String,
    pub aliases: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A typed edge between two entities, derived from a memory's content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relation {
    pub id: Uuid,
    pub owner: Owner,
    pub source_entity_id: Uuid,
    pub target_entity_id: Uuid,
    pub relation_type: String,
    pub derived_from_memory_id: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Links a memory to the entities it mentions, the join C5's graph
/// expansion walks across (spec.md §4.5 step 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntityLink {
    pub memory_id: Uuid,
    pub entity_id: Uuid,
}

/// A cluster of densely-connected entities, precomputed for retrieval
/// fan-out (spec.md §3, Non-goal: community *detection algorithm choice*
/// is out of scope, the *data shape* is not).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Community {
    pub id: Uuid,
    pub owner: Owner,
    pub label: String,
    pub entity_ids: Vec<Uuid>,
    pub updated_at: DateTime<Utc>,
}

/// A batch of conversation turns received from a client flush, prior to
/// aggregation and extraction (spec.md §4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSegment {
    pub id: Uuid,
    pub owner: Owner,
    pub messages: Vec<ConversationTurn>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// The reconciler's per-candidate verdict (spec.md §9 Design Notes: "a
/// tagged-variant `Decision` enum rather than four parallel booleans").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Decision {
    Add {
        candidate: CandidateFact,
    },
    Update {
        memory_id: Uuid,
        new_content: String,
    },
    Delete {
        memory_id: Uuid,
    },
    Noop {
        memory_id: Uuid,
    },
}

impl Decision {
    pub fn kind(&self) -> &'static str {
        match self {
            Decision::Add { .. } => "add",
            Decision::Update { .. } => "update",
            Decision::Delete { .. } => "delete",
            Decision::Noop { .. } => "noop",
        }
    }
}

/// The asynchronous lifecycle of a single ingestion/reconciliation
/// request, surfaced at `GET /v1/memories/task/{task_id}` (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    /// A subset of the saga's per-fact commits failed; see spec.md §4.3's
    /// commit-protocol table. The task itself is terminal, but individual
    /// facts inside it may need a follow-up drift-sweep reconciliation.
    PartiallyCompleted,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionTask {
    pub task_id: Uuid,
    pub owner: Owner,
    /// The conversation segment id this task was submitted for, if any —
    /// the de-duplication key for the 24-hour idempotency window
    /// (spec.md §4.2). `None` for direct single/batch memory ingests.
    pub segment_id: Option<String>,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub extracted_count: usize,
    pub error: Option<String>,
}
