//! `GET /v1/memories/task/{task_id}` (spec.md §6): the sole external view
//! onto a task's `PENDING -> RUNNING -> {SUCCESS|PARTIAL|FAILURE}` state
//! machine, backed by the relational store.

use axum::{Extension, Json, extract::{Path, State}, response::IntoResponse};
use serde::Serialize;
use uuid::Uuid;

use crate::AppState;
use crate::core::auth::AuthenticatedOwner;
use crate::models::error::{ApiError, ApiResult};
use crate::models::memory::TaskStatus;

#[derive(Debug, Serialize)]
pub struct TaskResult {
    pub extracted_count: usize,
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub status: TaskStatus,
    pub result: Option<TaskResult>,
    pub error: Option<String>,
}

pub async fn get_task(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
    Path(task_id): Path<Uuid>,
) -> ApiResult<impl IntoResponse> {
    let task = state
        .tri_store
        .relational
        .get_task(task_id)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    let task = match task {
        Some(t) if t.owner == owner => t,
        _ => return Err(ApiError::ClientFault(format!("task {task_id} not found"))),
    };

    let result = matches!(task.status, TaskStatus::Completed | TaskStatus::PartiallyCompleted)
        .then_some(TaskResult { extracted_count: task.extracted_count });

    Ok(Json(TaskStatusResponse {
        status: task.status,
        result,
        error: task.error,
    }))
}
