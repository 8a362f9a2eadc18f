//! Periodic background consistency sweep (spec.md §4.3 "drift sweep"):
//! per owner, compares the vector index and entity graph's link set
//! against the relational store's authoritative memory rows and repairs
//! what it can.
//!
//! Grounded on `core/process_pool.rs`'s `cleanup_loop`: a `tokio::spawn`ed
//! loop sleeping on a fixed interval, taking brief per-owner locks over
//! bounded batches rather than holding one global lock across I/O
//! (spec.md §4.3 "Locking discipline" — a per-owner mutex in brief spans
//! over batches of 100 memories).

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::reconciler::Reconciler;
use crate::core::ingestion::llm::LlmClient;
use crate::core::tri_store::combined::TriStore;

const BATCH_SIZE: usize = 100;

/// Counts from one full pass, surfaced for logging and tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DriftReport {
    pub memories_checked: usize,
    pub vector_gaps_repaired: usize,
    pub vector_gaps_unrepairable: usize,
    pub graph_gaps_detected: usize,
    pub graph_gaps_repaired: usize,
    pub graph_gaps_unrepairable: usize,
}

pub struct DriftSweep {
    tri_store: Arc<TriStore>,
    reconciler: Arc<Reconciler>,
    llm: Arc<dyn LlmClient>,
    interval: Duration,
}

impl DriftSweep {
    pub fn new(tri_store: Arc<TriStore>, reconciler: Arc<Reconciler>, llm: Arc<dyn LlmClient>, interval: Duration) -> Self {
        Self {
            tri_store,
            reconciler,
            llm,
            interval,
        }
    }

    pub fn spawn(self: Arc<Self>) {
        tokio::spawn(async move {
            self.run_forever().await;
        });
    }

    async fn run_forever(&self) {
        loop {
            tokio::time::sleep(self.interval).await;
            match self.sweep_once().await {
                Ok(report) => info!(
                    memories_checked = report.memories_checked,
                    vector_gaps_repaired = report.vector_gaps_repaired,
                    vector_gaps_unrepairable = report.vector_gaps_unrepairable,
                    graph_gaps_detected = report.graph_gaps_detected,
                    graph_gaps_repaired = report.graph_gaps_repaired,
                    graph_gaps_unrepairable = report.graph_gaps_unrepairable,
                    "drift sweep pass complete"
                ),
                Err(err) => warn!(error = %err, "drift sweep pass failed"),
            }
        }
    }

    /// One full pass over every owner partition. Exposed separately from
    /// the background loop so tests can drive a single pass
    /// deterministically.
    pub async fn sweep_once(&self) -> Result<DriftReport> {
        let owners = self.tri_store.relational.list_owners().await?;
        let mut report = DriftReport::default();

        for owner in owners {
            let lock = self.reconciler.lock_for(&owner);
            let mut offset = 0usize;

            loop {
                let batch = {
                    let _guard = lock.lock().await;
                    self.tri_store.relational.list_memories(&owner, BATCH_SIZE, offset).await?
                };
                if batch.is_empty() {
                    break;
                }
                let fetched = batch.len();

                for memory in &batch {
                    report.memories_checked += 1;

                    let has_vector = self.tri_store.vector.exists(&owner, memory.id).await.unwrap_or(true);
                    if !has_vector {
                        warn!(owner = %owner, memory_id = %memory.id, "drift: memory missing from vector index, re-embedding");
                        match self.llm.embed(&memory.content).await {
                            Ok(embedding) => {
                                let _guard = lock.lock().await;
                                match self
                                    .tri_store
                                    .vector
                                    .upsert(&owner, memory.id, &memory.content, memory.category.as_deref(), &embedding)
                                    .await
                                {
                                    Ok(()) => report.vector_gaps_repaired += 1,
                                    Err(err) => {
                                        report.vector_gaps_unrepairable += 1;
                                        warn!(owner = %owner, memory_id = %memory.id, error = %err, "drift repair failed");
                                    }
                                }
                            }
                            Err(err) => {
                                report.vector_gaps_unrepairable += 1;
                                warn!(owner = %owner, memory_id = %memory.id, error = %err, "drift re-embed failed");
                            }
                        }
                    }

                    if !self.tri_store.graph.memory_is_linked(&owner, memory.id).await.unwrap_or(true) {
                        report.graph_gaps_detected += 1;
                        warn!(owner = %owner, memory_id = %memory.id, "drift: memory has no entity links, re-extracting");
                        match self.llm.extract_facts(&memory.content).await {
                            Ok(facts) => {
                                let entities: Vec<_> = facts.into_iter().flat_map(|f| f.entities).collect();
                                let _guard = lock.lock().await;
                                match self.tri_store.relink_entities(&owner, memory.id, &entities).await {
                                    Ok(()) => report.graph_gaps_repaired += 1,
                                    Err(err) => {
                                        report.graph_gaps_unrepairable += 1;
                                        warn!(owner = %owner, memory_id = %memory.id, error = %err, "drift graph repair failed");
                                    }
                                }
                            }
                            Err(err) => {
                                report.graph_gaps_unrepairable += 1;
                                warn!(owner = %owner, memory_id = %memory.id, error = %err, "drift re-extraction failed");
                            }
                        }
                    }
                }

                offset += fetched;
                if fetched < BATCH_SIZE {
                    break;
                }
            }
        }

        Ok(report)
    }
}
