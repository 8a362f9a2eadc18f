//! `POST /agents/auto-register` (spec.md §6): the one unauthenticated
//! write endpoint — it is how a device obtains the `X-API-Key` every
//! other endpoint then requires.

use axum::{Json, extract::State, response::IntoResponse};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::AppState;
use crate::models::error::{ApiError, ApiResult};

#[derive(Debug, Deserialize)]
pub struct AutoRegisterRequest {
    pub machine_fingerprint: String,
    pub agent_type: String,
    pub agent_name: String,
    pub platform: String,
    pub platform_version: String,
}

#[derive(Debug, Serialize)]
pub struct AutoRegisterResponse {
    pub agent_id: Uuid,
    pub api_key: String,
    pub project_id: String,
}

pub async fn auto_register(State(state): State<AppState>, Json(req): Json<AutoRegisterRequest>) -> ApiResult<impl IntoResponse> {
    if req.machine_fingerprint.trim().is_empty() {
        return Err(ApiError::ClientFault("machine_fingerprint must not be empty".into()));
    }
    if req.agent_type.trim().is_empty() {
        return Err(ApiError::ClientFault("agent_type must not be empty".into()));
    }

    let registration = state
        .tri_store
        .relational
        .register_agent(
            &req.machine_fingerprint,
            &req.agent_type,
            &req.agent_name,
            &req.platform,
            &req.platform_version,
        )
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    Ok(Json(AutoRegisterResponse {
        agent_id: registration.agent_id,
        api_key: registration.api_key,
        project_id: registration.owner.project_id,
    }))
}
