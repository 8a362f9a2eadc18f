//! [`TriStore`]: the facade the reconciler commits a [`Decision`] through.
//!
//! Implements the per-fact saga of spec.md §4.3's commit-protocol table:
//! relational write first (it is authoritative), then vector, then graph;
//! a failure in *any* derived store — vector or graph — is compensated by
//! rolling the relational row back, never left straddling two states.
//!
//! Grounded on the teacher's `core/storage/combined.rs`, which layers
//! Meilisearch indexing on top of a Neo4j-authoritative write in the same
//! "primary then best-effort-projections" shape; here every projection's
//! failure is now load-bearing (it flips the task to `PartiallyCompleted`)
//! rather than best-effort.

use anyhow::{Result, anyhow};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use super::traits::{EntityGraph, RelationalStore, VectorIndex};
use crate::core::entity_extraction::canonicalize;
use crate::models::memory::{Decision, Entity, ExtractedEntity, Memory};
use crate::models::owner::Owner;

pub struct TriStore {
    pub relational: Arc<dyn RelationalStore>,
    pub vector: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn EntityGraph>,
}

/// Per-fact outcome of [`TriStore::commit`] (spec.md §4.3).
pub enum CommitOutcome {
    /// All three stores converged. `memory_id` is the affected memory —
    /// freshly minted for `Add`, the existing id for `Update`/`Noop`,
    /// `None` for `Delete`.
    Committed { memory_id: Option<Uuid> },
    /// The relational write succeeded but a derived store failed and the
    /// failure was compensated — the relational row was rolled back so no
    /// store is left inconsistent.
    RolledBack { reason: String },
}

impl TriStore {
    pub fn new(
        relational: Arc<dyn RelationalStore>,
        vector: Arc<dyn VectorIndex>,
        graph: Arc<dyn EntityGraph>,
    ) -> Self {
        Self {
            relational,
            vector,
            graph,
        }
    }

    /// Commits a single reconciled decision across all three stores,
    /// given the embedding to project into the vector index (already
    /// computed by the caller, since embedding is an LLM call and the
    /// saga itself should not own retrying it) and the entity mentions to
    /// link into the graph. `owner` is always known to the reconciler,
    /// which only ever processes one owner partition at a time under its
    /// per-owner lock, so the saga never needs to infer it.
    pub async fn commit(
        &self,
        owner: &Owner,
        decision: &Decision,
        embedding: Option<&[f32]>,
        entities: &[ExtractedEntity],
    ) -> Result<CommitOutcome> {
        match decision {
            Decision::Add { candidate } => self.commit_add(candidate, embedding, entities).await,
            Decision::Update { memory_id, new_content } => {
                self.commit_update(owner, *memory_id, new_content, embedding, entities).await
            }
            Decision::Delete { memory_id } => self.commit_delete(owner, *memory_id).await,
            Decision::Noop { memory_id } => Ok(CommitOutcome::Committed { memory_id: Some(*memory_id) }),
        }
    }

    async fn commit_add(
        &self,
        candidate: &crate::models::memory::CandidateFact,
        embedding: Option<&[f32]>,
        entities: &[ExtractedEntity],
    ) -> Result<CommitOutcome> {
        let memory = Memory {
            id: Uuid::new_v4(),
            owner: candidate.owner.clone(),
            content: candidate.content.clone(),
            category: candidate.category.clone(),
            embedding: embedding.map(|e| e.to_vec()),
            source_conversation_id: Some(candidate.source_conversation_id),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            version: 1,
            deleted_at: None,
            metadata: serde_json::Map::new(),
        };

        self.relational.insert_memory(&memory).await?;

        if let Err(err) = self.project_into_derived_stores(&memory, embedding, entities).await {
            warn!(memory_id = %memory.id, error = %err, "derived-store projection failed, compensating");
            self.relational.delete_memory(&memory.owner, memory.id).await.ok();
            return Ok(CommitOutcome::RolledBack { reason: err.to_string() });
        }

        Ok(CommitOutcome::Committed { memory_id: Some(memory.id) })
    }

    async fn commit_update(
        &self,
        owner: &Owner,
        memory_id: Uuid,
        new_content: &str,
        embedding: Option<&[f32]>,
        entities: &[ExtractedEntity],
    ) -> Result<CommitOutcome> {
        let mut memory = self
            .relational
            .get_memory(owner, memory_id)
            .await?
            .ok_or_else(|| anyhow!("memory {memory_id} not found"))?;

        let previous_content = memory.content.clone();
        memory.content = new_content.to_string();
        memory.updated_at = chrono::Utc::now();
        memory.version += 1;

        self.relational.update_memory(&memory).await?;

        if let Err(err) = self.project_into_derived_stores(&memory, embedding, entities).await {
            warn!(memory_id = %memory_id, error = %err, "derived-store projection failed, compensating");
            memory.content = previous_content;
            memory.version -= 1;
            self.relational.update_memory(&memory).await.ok();
            return Ok(CommitOutcome::RolledBack { reason: err.to_string() });
        }

        Ok(CommitOutcome::Committed { memory_id: Some(memory_id) })
    }

    /// Soft-deletes the memory: the row is tombstoned, not removed, so
    /// audit and drift-sweep passes can still see it (spec.md §4.3 DELETE
    /// step 1). Derived-store entries are dropped eagerly since a
    /// tombstoned memory has nothing left to project.
    async fn commit_delete(&self, owner: &Owner, memory_id: Uuid) -> Result<CommitOutcome> {
        self.vector.delete(owner, memory_id).await.ok();
        self.graph.unlink_memory(owner, memory_id).await.ok();
        self.relational.delete_memory(owner, memory_id).await?;
        Ok(CommitOutcome::Committed { memory_id: None })
    }

    /// Projects a committed relational row into the vector index and the
    /// entity graph. Either failing is load-bearing: the caller treats any
    /// `Err` here as a reason to roll the relational write back, so a
    /// graph failure gets exactly the same compensation a vector failure
    /// does, not a silently-diverging best-effort link.
    async fn project_into_derived_stores(
        &self,
        memory: &Memory,
        embedding: Option<&[f32]>,
        entities: &[ExtractedEntity],
    ) -> Result<()> {
        if let Some(embedding) = embedding {
            self.vector
                .upsert(&memory.owner, memory.id, &memory.content, memory.category.as_deref(), embedding)
                .await?;
        }
        self.relink_entities(&memory.owner, memory.id, entities).await?;
        Ok(())
    }

    /// Replaces every entity link for `memory_id` with the links implied
    /// by `entities`: clears the existing (possibly stale) link set first,
    /// then relinks fresh, so an UPDATE that drops a mention doesn't leave
    /// a dangling edge to an entity the memory no longer references.
    pub async fn relink_entities(&self, owner: &Owner, memory_id: Uuid, entities: &[ExtractedEntity]) -> Result<()> {
        self.graph.unlink_memory(owner, memory_id).await?;
        for mention in entities {
            let entity = Entity {
                id: Uuid::new_v4(),
                owner: owner.clone(),
                canonical_name: canonicalize(&mention.name),
                entity_type: mention.entity_type.clone(),
                aliases: vec![],
                created_at: chrono::Utc::now(),
            };
            let entity_id = self.graph.upsert_entity(&entity).await?;
            self.graph.link_memory(owner, memory_id, entity_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tri_store::relational::SqliteRelationalStore;
    use crate::core::tri_store::traits::{EntityGraph as _, VectorIndex as _};
    use crate::models::memory::{CandidateFact, Entity, Relation};
    use async_trait::async_trait;

    struct FailingVectorIndex;

    #[async_trait]
    impl VectorIndex for FailingVectorIndex {
        async fn upsert(
            &self,
            _owner: &Owner,
            _id: Uuid,
            _content: &str,
            _category: Option<&str>,
            _embedding: &[f32],
        ) -> Result<()> {
            Err(anyhow!("vector store unavailable"))
        }
        async fn delete(&self, _owner: &Owner, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _owner: &Owner,
            _embedding: &[f32],
            _limit: usize,
            _category: Option<&str>,
        ) -> Result<Vec<(Uuid, f32)>> {
            Ok(vec![])
        }
        async fn exists(&self, _owner: &Owner, _memory_id: Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    struct NoopGraph;

    #[async_trait]
    impl EntityGraph for NoopGraph {
        async fn upsert_entity(&self, entity: &Entity) -> Result<Uuid> {
            Ok(entity.id)
        }
        async fn upsert_relation(&self, _relation: &Relation) -> Result<()> {
            Ok(())
        }
        async fn link_memory(&self, _owner: &Owner, _memory_id: Uuid, _entity_id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn unlink_memory(&self, _owner: &Owner, _memory_id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn memory_is_linked(&self, _owner: &Owner, _memory_id: Uuid) -> Result<bool> {
            Ok(false)
        }
        async fn expand(&self, _owner: &Owner, _seeds: &[Uuid], _depth: u8) -> Result<Vec<(Uuid, Uuid)>> {
            Ok(vec![])
        }
        async fn find_entity_by_name(&self, _owner: &Owner, _name: &str) -> Result<Option<Entity>> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn failed_vector_projection_rolls_back_the_relational_insert() {
        let owner = Owner::new("u1", "p1");
        let relational = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let store = TriStore::new(relational.clone(), Arc::new(FailingVectorIndex), Arc::new(NoopGraph));

        let candidate = CandidateFact {
            content: "drinks dark roast coffee".into(),
            owner: owner.clone(),
            source_conversation_id: Uuid::new_v4(),
            category: None,
            extracted_entities: vec![],
        };
        let decision = Decision::Add { candidate };

        let outcome = store.commit(&owner, &decision, Some(&[0.1, 0.2]), &[]).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::RolledBack { .. }));
        assert_eq!(relational.count_memories(&owner).await.unwrap(), 0);
    }

    struct FailingGraph;

    #[async_trait]
    impl EntityGraph for FailingGraph {
        async fn upsert_entity(&self, _entity: &Entity) -> Result<Uuid> {
            Err(anyhow!("graph store unavailable"))
        }
        async fn upsert_relation(&self, _relation: &Relation) -> Result<()> {
            Ok(())
        }
        async fn link_memory(&self, _owner: &Owner, _memory_id: Uuid, _entity_id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn unlink_memory(&self, _owner: &Owner, _memory_id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn memory_is_linked(&self, _owner: &Owner, _memory_id: Uuid) -> Result<bool> {
            Ok(false)
        }
        async fn expand(&self, _owner: &Owner, _seeds: &[Uuid], _depth: u8) -> Result<Vec<(Uuid, Uuid)>> {
            Ok(vec![])
        }
        async fn find_entity_by_name(&self, _owner: &Owner, _name: &str) -> Result<Option<Entity>> {
            Ok(None)
        }
    }

    struct WorkingVectorIndex;

    #[async_trait]
    impl VectorIndex for WorkingVectorIndex {
        async fn upsert(
            &self,
            _owner: &Owner,
            _id: Uuid,
            _content: &str,
            _category: Option<&str>,
            _embedding: &[f32],
        ) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _owner: &Owner, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn search(
            &self,
            _owner: &Owner,
            _embedding: &[f32],
            _limit: usize,
            _category: Option<&str>,
        ) -> Result<Vec<(Uuid, f32)>> {
            Ok(vec![])
        }
        async fn exists(&self, _owner: &Owner, _memory_id: Uuid) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn failed_graph_projection_rolls_back_the_relational_insert() {
        let owner = Owner::new("u1", "p1");
        let relational = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let store = TriStore::new(relational.clone(), Arc::new(WorkingVectorIndex), Arc::new(FailingGraph));

        let candidate = CandidateFact {
            content: "Alice drinks dark roast coffee".into(),
            owner: owner.clone(),
            source_conversation_id: Uuid::new_v4(),
            category: None,
            extracted_entities: vec![crate::models::memory::ExtractedEntity {
                name: "Alice".into(),
                entity_type: "person".into(),
            }],
        };
        let decision = Decision::Add { candidate };
        let entities = vec![crate::models::memory::ExtractedEntity {
            name: "Alice".into(),
            entity_type: "person".into(),
        }];

        let outcome = store.commit(&owner, &decision, Some(&[0.1, 0.2]), &entities).await.unwrap();
        assert!(matches!(outcome, CommitOutcome::RolledBack { .. }));
        assert_eq!(relational.count_memories(&owner).await.unwrap(), 0);
    }
}
