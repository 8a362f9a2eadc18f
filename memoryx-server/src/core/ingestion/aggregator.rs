//! Converts incoming ingestion requests — single memory, batch memory,
//! conversation flush — into a durable [`IngestionTask`] row plus a job
//! submitted to the [`TaskQueue`] (spec.md §4.2).

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use super::task::{IngestionJob, TaskQueue};
use crate::core::tri_store::traits::RelationalStore;
use crate::models::memory::{ConversationSegment, IngestionTask, TaskStatus, TurnRole};
use crate::models::owner::Owner;

/// What accepting an ingestion request resolves to: the task id the
/// caller should poll, and whether this was a fresh submission or a
/// replay of an already-accepted conversation segment (spec.md §4.2
/// idempotency: "re-submission of the same segment id is a NOOP that
/// returns the original task id").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AcceptedTask {
    pub task_id: Uuid,
    pub replayed: bool,
}

pub struct Aggregator {
    relational: Arc<dyn RelationalStore>,
    queue: TaskQueue,
}

impl Aggregator {
    pub fn new(relational: Arc<dyn RelationalStore>, queue: TaskQueue) -> Self {
        Self { relational, queue }
    }

    /// A direct single-memory write, modeled as a one-turn "user"
    /// conversation (spec.md §4.2 step 1).
    pub async fn ingest_memory(&self, owner: &Owner, content: String) -> Result<AcceptedTask> {
        self.submit(owner, content, None, Uuid::new_v4()).await
    }

    /// A batch of direct-memory writes, each its own extraction task.
    pub async fn ingest_batch(&self, owner: &Owner, contents: Vec<String>) -> Result<Vec<AcceptedTask>> {
        let mut accepted = Vec::with_capacity(contents.len());
        for content in contents {
            accepted.push(self.submit(owner, content, None, Uuid::new_v4()).await?);
        }
        Ok(accepted)
    }

    /// A batch of direct-memory writes submitted as one extraction task
    /// (spec.md §6's batch endpoint returns a single `task_id`), joining
    /// each item onto its own line the same way `render_transcript` joins
    /// conversation turns.
    pub async fn ingest_batch_as_one_task(&self, owner: &Owner, contents: Vec<String>) -> Result<AcceptedTask> {
        let transcript = contents.join("\n");
        self.submit(owner, transcript, None, Uuid::new_v4()).await
    }

    /// A conversation segment flush, de-duplicated on segment id within
    /// a 24-hour window.
    pub async fn ingest_conversation(&self, segment: ConversationSegment) -> Result<AcceptedTask> {
        let segment_key = segment.id.to_string();
        if let Some(existing) = self
            .relational
            .find_recent_task_by_segment(&segment.owner, &segment_key)
            .await?
        {
            return Ok(AcceptedTask { task_id: existing.task_id, replayed: true });
        }

        let transcript = render_transcript(&segment);
        self.submit(&segment.owner, transcript, Some(segment_key), segment.id).await
    }

    async fn submit(
        &self,
        owner: &Owner,
        transcript: String,
        segment_id: Option<String>,
        source_conversation_id: Uuid,
    ) -> Result<AcceptedTask> {
        let task_id = Uuid::new_v4();
        let now = Utc::now();
        let task = IngestionTask {
            task_id,
            owner: owner.clone(),
            segment_id,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            extracted_count: 0,
            error: None,
        };
        self.relational.insert_task(&task).await?;

        self.queue
            .submit(IngestionJob {
                task_id,
                owner: owner.clone(),
                source_conversation_id,
                transcript,
            })
            .await?;

        Ok(AcceptedTask { task_id, replayed: false })
    }
}

/// Concatenates a segment's messages into a role-tagged transcript
/// (spec.md §4.2 step 1), in the insertion order the client guaranteed
/// when it sent them (spec.md §4.1 ordering guarantee).
fn render_transcript(segment: &ConversationSegment) -> String {
    segment
        .messages
        .iter()
        .map(|turn| {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            format!("{role}: {content}", content = turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::memory::ConversationTurn;

    #[test]
    fn render_transcript_preserves_message_order_and_roles() {
        let segment = ConversationSegment {
            id: Uuid::new_v4(),
            owner: Owner::new("u1", "p1"),
            messages: vec![
                ConversationTurn {
                    role: TurnRole::User,
                    content: "I drink dark roast".into(),
                    timestamp: Utc::now(),
                },
                ConversationTurn {
                    role: TurnRole::Assistant,
                    content: "Noted.".into(),
                    timestamp: Utc::now(),
                },
            ],
            received_at: Utc::now(),
        };

        assert_eq!(render_transcript(&segment), "user: I drink dark roast\nassistant: Noted.");
    }
}
