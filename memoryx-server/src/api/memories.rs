//! Direct memory ingestion and lookup (spec.md §6): `POST /v1/memories`,
//! `POST /v1/memories/batch`, `GET /v1/memories/list`, `DELETE
//! /v1/memories/{id}`.

use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::core::auth::AuthenticatedOwner;
use crate::core::tri_store::combined::CommitOutcome;
use crate::models::error::{ApiError, ApiResult};
use crate::models::memory::{Decision, Memory};

#[derive(Debug, Deserialize)]
pub struct CreateMemoryRequest {
    pub content: String,
    /// Accepted for schema compatibility with clients that scope writes
    /// explicitly; the authenticated owner's project id is authoritative.
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Serialize)]
pub struct AcceptedTaskResponse {
    pub task_id: Uuid,
    pub status: &'static str,
}

fn check_project_scope(owner: &crate::models::owner::Owner, project_id: &Option<String>) -> ApiResult<()> {
    match project_id {
        Some(p) if p != &owner.project_id => {
            Err(ApiError::ClientFault("project_id does not match the authenticated owner".into()))
        }
        _ => Ok(()),
    }
}

pub async fn create_memory(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Json(req): Json<CreateMemoryRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.content.trim().is_empty() {
        return Err(ApiError::ClientFault("content must not be empty".into()));
    }
    check_project_scope(&owner, &req.project_id)?;

    let used = state
        .tri_store
        .relational
        .count_memories(&owner)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;
    if used >= state.quota_config.free_tier_memory_cap as u64 {
        return Err(ApiError::QuotaExhausted(format!(
            "memory cap of {} reached",
            state.quota_config.free_tier_memory_cap
        )));
    }

    let accepted = state
        .aggregator
        .ingest_memory(&owner, req.content)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    Ok(Json(AcceptedTaskResponse {
        task_id: accepted.task_id,
        status: "PENDING",
    }))
}

#[derive(Debug, Deserialize)]
pub struct BatchMemoryItem {
    pub content: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMemoriesBatchRequest {
    pub memories: Vec<BatchMemoryItem>,
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Submitted as a single extraction job over every item's content joined
/// into one transcript (the same "role-tagged lines" shape
/// `ingestion::aggregator::render_transcript` uses for conversation
/// turns), so the batch surfaces one task id the way spec.md §6's
/// response shape implies.
pub async fn create_memories_batch(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Json(req): Json<CreateMemoriesBatchRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.memories.is_empty() {
        return Err(ApiError::ClientFault("memories must not be empty".into()));
    }
    check_project_scope(&owner, &req.project_id)?;
    if req.memories.iter().any(|m| m.content.trim().is_empty()) {
        return Err(ApiError::ClientFault("memory content must not be empty".into()));
    }

    let used = state
        .tri_store
        .relational
        .count_memories(&owner)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;
    if used + req.memories.len() as u64 > state.quota_config.free_tier_memory_cap as u64 {
        return Err(ApiError::QuotaExhausted(format!(
            "memory cap of {} reached",
            state.quota_config.free_tier_memory_cap
        )));
    }

    let contents = req.memories.into_iter().map(|m| m.content).collect();
    let accepted = state
        .aggregator
        .ingest_batch_as_one_task(&owner, contents)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    Ok(Json(AcceptedTaskResponse {
        task_id: accepted.task_id,
        status: "PENDING",
    }))
}

#[derive(Debug, Deserialize)]
pub struct ListMemoriesQuery {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub project_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemoryView {
    pub id: Uuid,
    pub content: String,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub version: u32,
}

impl From<Memory> for MemoryView {
    fn from(memory: Memory) -> Self {
        Self {
            id: memory.id,
            content: memory.content,
            category: memory.category,
            created_at: memory.created_at,
            updated_at: memory.updated_at,
            version: memory.version,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListMemoriesResponse {
    pub data: Vec<MemoryView>,
    pub total: u64,
}

pub async fn list_memories(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Query(query): Query<ListMemoriesQuery>,
) -> ApiResult<impl IntoResponse> {
    check_project_scope(&owner, &query.project_id)?;

    let limit = query.limit.unwrap_or(50).clamp(1, 200);
    let offset = query.offset.unwrap_or(0);

    let memories = state
        .tri_store
        .relational
        .list_memories(&owner, limit, offset)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;
    let total = state
        .tri_store
        .relational
        .count_memories(&owner)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    Ok(Json(ListMemoriesResponse {
        data: memories.into_iter().map(MemoryView::from).collect(),
        total,
    }))
}

#[derive(Debug, Serialize)]
pub struct DeleteMemoryResponse {
    pub success: bool,
}

pub async fn delete_memory(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Path(id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let existing = state
        .tri_store
        .relational
        .get_memory(&owner, id)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;
    if existing.is_none() {
        return Err(ApiError::ClientFault(format!("memory {id} not found")));
    }

    let outcome = state
        .tri_store
        .commit(&owner, &Decision::Delete { memory_id: id }, None, &[])
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    match outcome {
        CommitOutcome::Committed { .. } => Ok(Json(DeleteMemoryResponse { success: true })),
        CommitOutcome::RolledBack { reason } => Err(ApiError::PermanentUpstream(reason)),
    }
}
