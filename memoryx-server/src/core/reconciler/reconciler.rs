//! The fact reconciler (spec.md §4.3): turns candidate facts into
//! committed decisions, one owner partition at a time.
//!
//! Per-owner serialization uses a `DashMap<OwnerKey, Arc<tokio::sync::Mutex<()>>>`,
//! the same sharded-lock shape the teacher reaches for with `DashMap` in
//! `core/cache.rs` — here the map holds locks instead of cached values, so
//! that two reconciliation tasks for the *same* owner never race on the
//! same memory, while different owners still proceed fully in parallel.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

use super::decision::decide;
use super::llm_judge::{Judge, JudgeVerdict};
use super::similarity::{Neighbor, entity_sets_equal, rerank, top_matches};
use crate::core::config::ReconcilerConfig;
use crate::core::ingestion::llm::LlmClient;
use crate::core::tri_store::combined::{CommitOutcome, TriStore};
use crate::models::memory::{CandidateFact, Decision, TaskStatus};
use crate::models::owner::Owner;

pub struct Reconciler {
    tri_store: Arc<TriStore>,
    llm: Arc<dyn LlmClient>,
    judge: Arc<dyn Judge>,
    config: ReconcilerConfig,
    owner_locks: DashMap<String, Arc<AsyncMutex<()>>>,
}

/// Outcome of reconciling one task's candidate facts.
pub struct ReconciliationResult {
    pub status: TaskStatus,
    pub committed: usize,
    pub rolled_back: usize,
}

impl Reconciler {
    pub fn new(
        tri_store: Arc<TriStore>,
        llm: Arc<dyn LlmClient>,
        judge: Arc<dyn Judge>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            tri_store,
            llm,
            judge,
            config,
            owner_locks: DashMap::new(),
        }
    }

    /// The per-owner serialization lock, shared with the drift sweep so
    /// a live reconciliation and a sweep pass never race on the same
    /// owner's rows (spec.md §4.3 "Locking discipline").
    pub fn lock_for(&self, owner: &Owner) -> Arc<AsyncMutex<()>> {
        self.owner_locks.entry(owner.key()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }

    /// Reconciles every candidate fact extracted from one conversation
    /// segment, serialized against any other in-flight reconciliation for
    /// the same owner.
    pub async fn reconcile(&self, owner: &Owner, candidates: Vec<CandidateFact>) -> Result<ReconciliationResult> {
        let lock = self.lock_for(owner);
        let _guard = lock.lock().await;

        let mut committed = 0usize;
        let mut rolled_back = 0usize;

        for candidate in candidates {
            match self.reconcile_one(owner, candidate).await {
                Ok(true) => committed += 1,
                Ok(false) => rolled_back += 1,
                Err(err) => {
                    warn!(owner = %owner, error = %err, "candidate reconciliation failed");
                    rolled_back += 1;
                }
            }
        }

        let status = if rolled_back == 0 {
            TaskStatus::Completed
        } else if committed == 0 {
            TaskStatus::Failed
        } else {
            TaskStatus::PartiallyCompleted
        };

        Ok(ReconciliationResult {
            status,
            committed,
            rolled_back,
        })
    }

    async fn reconcile_one(&self, owner: &Owner, candidate: CandidateFact) -> Result<bool> {
        let embedding = self.llm.embed(&candidate.content).await?;
        let category = candidate.category.clone();
        let hits = top_matches(&self.tri_store.vector, owner, &embedding, category.as_deref()).await?;

        let mut neighbors = Vec::with_capacity(hits.len());
        for hit in hits {
            if hit.similarity < self.config.similarity_threshold_add {
                continue;
            }
            if let Some(mem) = self.tri_store.relational.get_memory(owner, hit.memory_id).await? {
                neighbors.push(Neighbor {
                    memory_id: hit.memory_id,
                    similarity: hit.similarity,
                    content: mem.content,
                });
            }
        }
        let matched = rerank(&candidate.content, neighbors);

        let judge_verdict = match matched.as_ref() {
            Some(m) if m.similarity < self.config.similarity_threshold_noop
                || !entity_sets_equal(&candidate.content, &m.content) =>
            {
                Some(self.judge.judge(&m.content, &candidate.content).await?)
            }
            _ => None,
        };

        let entities = candidate.extracted_entities.clone();
        let retraction = candidate.clone();
        let decision = decide(candidate, matched.as_ref(), judge_verdict.as_ref(), &self.config);

        let outcome = self.tri_store.commit(owner, &decision, Some(&embedding), &entities).await?;

        match outcome {
            CommitOutcome::Committed { .. } => {
                info!(owner = %owner, decision = decision.kind(), "reconciled candidate");

                // A CONTRADICTS verdict only tombstones the superseded
                // neighbor (spec.md §4.3's commit table); the candidate's
                // own content still needs its own memory row (spec.md §8
                // S3: "DELETE of the first fact, ADD of the Shanghai
                // fact"), so a retraction folds a second ADD commit in.
                if judge_verdict == Some(JudgeVerdict::Contradicts) {
                    let add_decision = Decision::Add { candidate: retraction };
                    if let CommitOutcome::RolledBack { reason } =
                        self.tri_store.commit(owner, &add_decision, Some(&embedding), &entities).await?
                    {
                        warn!(owner = %owner, reason = %reason, "retraction's replacement fact failed to commit");
                    }
                }

                Ok(true)
            }
            CommitOutcome::RolledBack { reason } => {
                warn!(owner = %owner, reason = %reason, "reconciliation commit rolled back");
                Ok(false)
            }
        }
    }
}
