//! The GraphRAG retriever itself (spec.md §4.5): vector recall, graph
//! expansion, fused scoring, dedup/truncate, quota.

use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use super::quota::{QuotaDecision, charge_search};
use super::scoring::{RelevanceScorer, ScoringConfig};
use crate::core::config::{QuotaConfig, RetrieverConfig};
use crate::core::entity_extraction::{canonicalize, extract_mentions};
use crate::core::ingestion::llm::LlmClient;
use crate::core::tri_store::combined::TriStore;
use crate::models::error::{ApiError, ApiResult};
use crate::models::owner::Owner;

/// One scored memory in a search response (spec.md §4.5 public contract:
/// `{id, content, category, score}`).
#[derive(Debug, Clone)]
pub struct RankedMemory {
    pub id: Uuid,
    pub content: String,
    pub category: Option<String>,
    pub score: f64,
}

pub struct SearchOutcome {
    pub data: Vec<RankedMemory>,
    pub related_memories: Vec<RankedMemory>,
    pub remaining_quota: u32,
}

pub struct Retriever {
    tri_store: Arc<TriStore>,
    llm: Arc<dyn LlmClient>,
    config: RetrieverConfig,
    quota_config: QuotaConfig,
}

impl Retriever {
    pub fn new(tri_store: Arc<TriStore>, llm: Arc<dyn LlmClient>, config: RetrieverConfig, quota_config: QuotaConfig) -> Self {
        Self {
            tri_store,
            llm,
            config,
            quota_config,
        }
    }

    /// Runs one search request end to end (spec.md §4.5 steps 1-7).
    pub async fn search(&self, owner: &Owner, query: &str, limit: Option<usize>, category: Option<&str>) -> ApiResult<SearchOutcome> {
        // Edge case: query shorter than 2 characters returns empty,
        // unmetered (spec.md §4.5 edge cases).
        if query.trim().chars().count() < 2 {
            return Ok(SearchOutcome {
                data: vec![],
                related_memories: vec![],
                remaining_quota: self.quota_config.free_tier_daily_searches,
            });
        }

        let limit = limit.unwrap_or(self.config.default_limit).max(1);

        let remaining_quota = match charge_search(&self.tri_store.relational, owner, &self.quota_config)
            .await
            .map_err(|e| ApiError::TransientUpstream(e.to_string()))?
        {
            QuotaDecision::Allowed { remaining } => remaining,
            QuotaDecision::Exhausted => {
                return Err(ApiError::QuotaExhausted(format!(
                    "daily search limit of {} reached",
                    self.quota_config.free_tier_daily_searches
                )));
            }
        };

        // Step 1: query analysis.
        let mentions = extract_mentions(query);

        // Step 3: vector recall, k = max(limit*3, 30).
        let embedding = self
            .llm
            .embed(query)
            .await
            .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;
        let recall_k = (limit * 3).max(30);
        let recalled = self
            .tri_store
            .vector
            .search(owner, &embedding, recall_k, category)
            .await
            .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

        // Step 4: graph expansion from the query's seed entities (step 2's
        // community prefilter has no persisted community assignments to
        // bias against in this implementation, so expansion runs
        // unconditionally over every resolved seed entity; see DESIGN.md).
        let mut seed_entity_ids = Vec::new();
        for mention in &mentions {
            if let Ok(Some(entity)) = self.tri_store.graph.find_entity_by_name(owner, &canonicalize(mention)).await {
                seed_entity_ids.push(entity.id);
            }
        }

        let mut graph_hits: HashMap<Uuid, usize> = HashMap::new();
        if !seed_entity_ids.is_empty() {
            if let Ok(pairs) = self.tri_store.graph.expand(owner, &seed_entity_ids, self.config.graph_expansion_depth).await {
                for (_entity_id, memory_id) in pairs {
                    *graph_hits.entry(memory_id).or_insert(0) += 1;
                }
            }
        }
        let seed_count = seed_entity_ids.len().max(1) as f64;

        let scorer = RelevanceScorer::new(ScoringConfig {
            alpha_similarity: self.config.alpha_similarity as f64,
            beta_graph: self.config.beta_graph as f64,
            gamma_recency: self.config.gamma_recency as f64,
            temporal_decay_tau_days: self.config.temporal_decay_tau_days as f64,
        });

        // Merge direct recall and graph-adjacent ids (spec.md §4.5 step 6).
        let mut candidate_ids: Vec<Uuid> = recalled.iter().map(|(id, _)| *id).collect();
        for id in graph_hits.keys() {
            if !candidate_ids.contains(id) {
                candidate_ids.push(*id);
            }
        }

        let similarity_by_id: HashMap<Uuid, f32> = recalled.into_iter().collect();
        let now = chrono::Utc::now();

        let mut direct = Vec::new();
        let mut adjacent_only = Vec::new();

        for id in candidate_ids {
            let memory = match self
                .tri_store
                .relational
                .get_memory(owner, id)
                .await
                .map_err(|e| ApiError::TransientUpstream(e.to_string()))?
            {
                Some(m) => m,
                // Vector-present-but-relational-missing: skip with a debug
                // log (spec.md §4.5 edge cases). Tombstoned rows never
                // come back from get_memory at all (it filters them), so
                // this branch also covers the tombstone edge case.
                None => {
                    debug!(owner = %owner, memory_id = %id, "drift: vector hit has no live relational row, skipping");
                    continue;
                }
            };

            let similarity = similarity_by_id.get(&id).copied().unwrap_or(0.0) as f64;
            // One collapsed hop layer (the entity graph's `expand` does not
            // expose per-pair hop distance), discounted per spec.md §4.5
            // step 4's 0.5-per-hop factor, and normalized by the fraction
            // of seed entities that reach this memory.
            let graph_boost = graph_hits.get(&id).map(|hits| 0.5 * (*hits as f64 / seed_count)).unwrap_or(0.0).min(1.0);
            let age_days = now.signed_duration_since(memory.updated_at).num_seconds() as f64 / 86_400.0;

            let score = scorer.compute_score(similarity, graph_boost, age_days);
            let ranked = RankedMemory {
                id: memory.id,
                content: memory.content,
                category: memory.category,
                score: score.total,
            };

            if similarity_by_id.contains_key(&id) {
                direct.push(ranked);
            } else {
                adjacent_only.push(ranked);
            }
        }

        direct.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        adjacent_only.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        direct.truncate(limit);
        adjacent_only.truncate(limit);

        Ok(SearchOutcome {
            data: direct,
            related_memories: adjacent_only,
            remaining_quota,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ingestion::llm::ExtractedFact;
    use crate::core::tri_store::relational::SqliteRelationalStore;
    use crate::core::tri_store::traits::{EntityGraph, RelationalStore, VectorIndex};
    use crate::models::memory::{Entity, Memory, Relation};
    use anyhow::Result;
    use async_trait::async_trait;

    struct StubLlm;

    #[async_trait]
    impl LlmClient for StubLlm {
        async fn extract_facts(&self, _text: &str) -> Result<Vec<ExtractedFact>> {
            Ok(vec![])
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![1.0, 0.0])
        }
    }

    struct StubVector {
        hits: Vec<(Uuid, f32)>,
    }

    #[async_trait]
    impl VectorIndex for StubVector {
        async fn upsert(&self, _owner: &Owner, _id: Uuid, _content: &str, _category: Option<&str>, _embedding: &[f32]) -> Result<()> {
            Ok(())
        }
        async fn delete(&self, _owner: &Owner, _id: Uuid) -> Result<()> {
            Ok(())
        }
        async fn search(&self, _owner: &Owner, _embedding: &[f32], _limit: usize, _category: Option<&str>) -> Result<Vec<(Uuid, f32)>> {
            Ok(self.hits.clone())
        }
        async fn exists(&self, _owner: &Owner, _id: Uuid) -> Result<bool> {
            Ok(true)
        }
    }

    struct EmptyGraph;

    #[async_trait]
    impl EntityGraph for EmptyGraph {
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
    async fn short_query_returns_empty_without_charging_quota() {
        let owner = Owner::new("u1", "p1");
        let relational = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let tri_store = Arc::new(TriStore::new(relational.clone(), Arc::new(StubVector { hits: vec![] }), Arc::new(EmptyGraph)));
        let retriever = Retriever::new(tri_store, Arc::new(StubLlm), RetrieverConfig::default(), QuotaConfig::default());

        let outcome = retriever.search(&owner, "a", None, None).await.unwrap();
        assert!(outcome.data.is_empty());
        assert_eq!(RelationalStore::increment_and_get_daily_searches(relational.as_ref(), &owner).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn vector_hit_with_no_live_relational_row_is_skipped() {
        let owner = Owner::new("u1", "p1");
        let relational = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let missing_id = Uuid::new_v4();
        let tri_store = Arc::new(TriStore::new(
            relational,
            Arc::new(StubVector { hits: vec![(missing_id, 0.9)] }),
            Arc::new(EmptyGraph),
        ));
        let retriever = Retriever::new(tri_store, Arc::new(StubLlm), RetrieverConfig::default(), QuotaConfig::default());

        let outcome = retriever.search(&owner, "coffee preference", None, None).await.unwrap();
        assert!(outcome.data.is_empty());
    }

    #[tokio::test]
    async fn direct_hit_is_ranked_and_returned() {
        let owner = Owner::new("u1", "p1");
        let relational = Arc::new(SqliteRelationalStore::open_in_memory().unwrap());
        let memory = Memory {
            id: Uuid::new_v4(),
            owner: owner.clone(),
            content: "drinks dark roast coffee".into(),
            category: Some("preference".into()),
            embedding: None,
            source_conversation_id: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
            version: 1,
            deleted_at: None,
            metadata: serde_json::Map::new(),
        };
        RelationalStore::insert_memory(relational.as_ref(), &memory).await.unwrap();

        let tri_store = Arc::new(TriStore::new(
            relational,
            Arc::new(StubVector { hits: vec![(memory.id, 0.95)] }),
            Arc::new(EmptyGraph),
        ));
        let retriever = Retriever::new(tri_store, Arc::new(StubLlm), RetrieverConfig::default(), QuotaConfig::default());

        let outcome = retriever.search(&owner, "coffee preference", None, None).await.unwrap();
        assert_eq!(outcome.data.len(), 1);
        assert_eq!(outcome.data[0].id, memory.id);
        assert!(outcome.data[0].score > 0.0);
    }
}
