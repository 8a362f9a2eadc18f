//! Durable ingestion task queue and worker pool (spec.md §4.2).
//!
//! Grounded on `core/process_pool.rs`'s fixed-size worker loop: a small
//! number of `tokio::spawn`ed workers pull from a shared channel instead
//! of pooling OS processes. The channel itself is not the durable
//! record — every state transition (`PENDING -> RUNNING ->
//! {SUCCESS|PARTIAL|FAILURE}`) is written through to the relational
//! store first, so a crashed worker never leaves a task invisibly stuck.

use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::llm::LlmClient;
use crate::core::config::ReconcilerConfig;
use crate::core::reconciler::reconciler::Reconciler;
use crate::core::retry::{RetryConfig, RetryPolicy};
use crate::core::tri_store::traits::RelationalStore;
use crate::models::memory::{CandidateFact, ExtractedEntity, TaskStatus};
use crate::models::owner::Owner;

/// A unit of extraction work submitted by C2's HTTP endpoints.
pub struct IngestionJob {
    pub task_id: Uuid,
    pub owner: Owner,
    pub source_conversation_id: Uuid,
    pub transcript: String,
}

static TRIVIAL_CONTENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(hi|hello|hey|thanks|thank you|ok|okay|yes|no|bye|goodbye)[.!?\s]*$|^[\p{P}\s]*$")
        .unwrap()
});

/// spec.md §4.2 step 3: drop facts shorter than 2 characters, trivial
/// greeting/punctuation-only content, and facts with no extracted
/// entities.
fn is_trivial(content: &str, entities: &[ExtractedEntity]) -> bool {
    content.trim().chars().count() < 2 || TRIVIAL_CONTENT.is_match(content.trim()) || entities.is_empty()
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<IngestionJob>,
}

impl TaskQueue {
    /// Spawns `worker_pool_size` workers sharing one receiver behind an
    /// async mutex — the same "fixed pool pulling off one queue" shape
    /// as the teacher's process pool, minus the process management.
    pub fn spawn(
        worker_pool_size: usize,
        relational: Arc<dyn RelationalStore>,
        llm: Arc<dyn LlmClient>,
        reconciler: Arc<Reconciler>,
        config: ReconcilerConfig,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1024);
        let rx = Arc::new(AsyncMutex::new(rx));

        for worker_id in 0..worker_pool_size.max(1) {
            let rx = rx.clone();
            let relational = relational.clone();
            let llm = llm.clone();
            let reconciler = reconciler.clone();
            let config = config.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, rx, relational, llm, reconciler, config).await;
            });
        }

        Self { tx }
    }

    pub async fn submit(&self, job: IngestionJob) -> Result<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow!("ingestion task queue is closed"))
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<AsyncMutex<mpsc::Receiver<IngestionJob>>>,
    relational: Arc<dyn RelationalStore>,
    llm: Arc<dyn LlmClient>,
    reconciler: Arc<Reconciler>,
    config: ReconcilerConfig,
) {
    loop {
        let job = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(job) = job else {
            info!(worker_id, "ingestion worker shutting down, queue closed");
            return;
        };

        let task_id = job.task_id;
        if let Err(err) = process_job(job, &relational, &llm, &reconciler, &config).await {
            error!(worker_id, task_id = %task_id, error = %err, "ingestion task failed permanently");
            relational
                .update_task_status(task_id, TaskStatus::Failed, 0, Some(err.to_string()))
                .await
                .ok();
        }
    }
}

async fn process_job(
    job: IngestionJob,
    relational: &Arc<dyn RelationalStore>,
    llm: &Arc<dyn LlmClient>,
    reconciler: &Arc<Reconciler>,
    config: &ReconcilerConfig,
) -> Result<()> {
    relational
        .update_task_status(job.task_id, TaskStatus::Processing, 0, None)
        .await?;

    let retry = RetryPolicy::new(RetryConfig {
        max_retries: config.max_retry,
        ..RetryConfig::default()
    });

    let transcript = job.transcript.clone();
    let llm_for_retry = llm.clone();
    let extracted = retry
        .execute("llm fact extraction", || {
            let llm = llm_for_retry.clone();
            let transcript = transcript.clone();
            async move { llm.extract_facts(&transcript).await }
        })
        .await?;

    let total = extracted.len();
    let candidates: Vec<CandidateFact> = extracted
        .into_iter()
        .filter(|fact| !is_trivial(&fact.content, &fact.entities))
        .map(|fact| CandidateFact {
            content: fact.content,
            owner: job.owner.clone(),
            source_conversation_id: job.source_conversation_id,
            category: fact.category,
            extracted_entities: fact.entities,
        })
        .collect();

    let rejected = total - candidates.len();
    if rejected > 0 {
        warn!(task_id = %job.task_id, rejected, "dropped trivial or entity-less candidate facts");
    }

    let result = reconciler.reconcile(&job.owner, candidates).await?;

    relational
        .update_task_status(job.task_id, result.status, result.committed, None)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::memory::ExtractedEntity;

    #[test]
    fn short_content_is_trivial() {
        assert!(is_trivial("a", &[ExtractedEntity { name: "x".into(), entity_type: "other".into() }]));
    }

    #[test]
    fn greeting_is_trivial_even_with_entities() {
        assert!(is_trivial("hello!", &[ExtractedEntity { name: "x".into(), entity_type: "other".into() }]));
    }

    #[test]
    fn entity_less_fact_is_trivial() {
        assert!(is_trivial("drinks dark roast coffee every morning", &[]));
    }

    #[test]
    fn substantive_fact_with_entities_is_not_trivial() {
        assert!(!is_trivial(
            "drinks dark roast coffee every morning",
            &[ExtractedEntity { name: "dark roast".into(), entity_type: "preference".into() }]
        ));
    }
}
