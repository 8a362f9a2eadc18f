//! Core data types shared across the outbox, flusher and transport layers.

use serde::{Deserialize, Serialize};

/// Role of a message within a conversation segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// A message authored by the human/agent-operator side of the conversation.
    User,
    /// A message authored by the model.
    Assistant,
}

impl Role {
    /// Short tag used when building the role-tagged transcript sent to the server.
    pub fn tag(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Arbitrary metadata attached to a single memory write.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Payload of a single memory write, as it will be serialized to the
/// `/v1/memories` or `/v1/memories/batch` endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryPayload {
    /// Free-form memory content.
    pub content: String,
    /// Optional project partition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Arbitrary caller-supplied metadata.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

/// A single message queued as part of a conversation segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Speaker role.
    pub role: Role,
    /// Message content.
    pub content: String,
    /// Unix timestamp (seconds) the message was recorded at.
    pub timestamp: i64,
    /// Token count for this message, per the configured tokenizer.
    pub tokens: usize,
}

/// Body sent to `/v1/conversations/flush`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationFlushRequest {
    /// Client-assigned conversation segment id.
    pub conversation_id: String,
    /// Ordered messages, insertion order preserved end-to-end.
    pub messages: Vec<ConversationMessage>,
}

/// Snapshot returned by `getQueueStats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStats {
    /// Number of messages currently queued in the active conversation segment.
    pub message_count: usize,
    /// Number of completed user→assistant rounds in the active segment.
    pub rounds: usize,
    /// Sum of token counts across queued messages in the active segment.
    pub total_tokens: usize,
    /// Seconds since the oldest queued message's timestamp, or 0 if empty.
    pub oldest_message_age: i64,
    /// Client-assigned id of the active conversation segment.
    pub conversation_id: String,
}

/// Server's synchronous acceptance response for an ingest endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptedResponse {
    /// Task id to poll via `/v1/memories/task/{task_id}`.
    pub task_id: String,
    /// Always "PENDING" for freshly accepted tasks (absent on the flush
    /// endpoint's `extracted_count` variant).
    #[serde(default)]
    pub status: Option<String>,
    /// Present only on the conversation-flush response.
    #[serde(default)]
    pub extracted_count: Option<usize>,
}
