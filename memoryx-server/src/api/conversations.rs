//! `POST /v1/conversations/flush` (spec.md §6, §4.2): the client outbox's
//! server-side landing point for a batch of conversation turns.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::core::auth::AuthenticatedOwner;
use crate::models::error::{ApiError, ApiResult};
use crate::models::memory::{ConversationSegment, ConversationTurn, TurnRole};

#[derive(Debug, Deserialize)]
pub struct FlushTurn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Accepted for schema compatibility with the client's outbox record;
    /// the server does not bill or budget on it.
    #[serde(default)]
    pub tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct FlushRequest {
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
    pub messages: Vec<FlushTurn>,
}

#[derive(Debug, Serialize)]
pub struct FlushResponse {
    pub task_id: Uuid,
    pub extracted_count: usize,
}

pub async fn flush_conversation(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Json(req): Json<FlushRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.messages.is_empty() {
        return Err(ApiError::ClientFault("messages must not be empty".into()));
    }

    let segment = ConversationSegment {
        id: req.conversation_id.unwrap_or_else(Uuid::new_v4),
        owner,
        messages: req
            .messages
            .into_iter()
            .map(|turn| ConversationTurn {
                role: turn.role,
                content: turn.content,
                timestamp: turn.timestamp,
            })
            .collect(),
        received_at: Utc::now(),
    };

    let accepted = state
        .aggregator
        .ingest_conversation(segment)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    // Extraction runs asynchronously; a fresh submission reports 0 until
    // the task completes, while a replayed one reports whatever the
    // original task has finished with so far.
    let extracted_count = state
        .tri_store
        .relational
        .get_task(accepted.task_id)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?
        .map(|t| t.extracted_count)
        .unwrap_or(0);

    Ok(Json(FlushResponse {
        task_id: accepted.task_id,
        extracted_count,
    }))
}
