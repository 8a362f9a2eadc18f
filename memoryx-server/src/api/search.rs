//! `POST /v1/memories/search` (spec.md §6): the external surface over
//! [`crate::core::retriever::Retriever`].

use axum::{Extension, Json, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::core::auth::AuthenticatedOwner;
use crate::core::retriever::RankedMemory;
use crate::models::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RankedMemoryView {
    pub id: Uuid,
    pub content: String,
    pub category: Option<String>,
    pub score: f64,
}

impl From<RankedMemory> for RankedMemoryView {
    fn from(ranked: RankedMemory) -> Self {
        Self {
            id: ranked.id,
            content: ranked.content,
            category: ranked.category,
            score: ranked.score,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub data: Vec<RankedMemoryView>,
    pub related_memories: Vec<RankedMemoryView>,
    pub remaining_quota: u32,
}

pub async fn search_memories(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Json(req): Json<SearchRequest>,
) -> ApiResult<impl IntoResponse> {
    if let Some(project_id) = &req.project_id
        && project_id != &owner.project_id
    {
        return Err(ApiError::ClientFault("project_id does not match the authenticated owner".into()));
    }

    let outcome = state
        .retriever
        .search(&owner, &req.query, req.limit, req.category.as_deref())
        .await?;

    Ok(Json(SearchResponse {
        data: outcome.data.into_iter().map(Into::into).collect(),
        related_memories: outcome.related_memories.into_iter().map(Into::into).collect(),
        remaining_quota: outcome.remaining_quota,
    }))
}
