//! `GET /v1/quota` (spec.md §6): current usage against the free-tier
//! limits for the authenticated owner.

use axum::{Extension, Json, extract::State, response::IntoResponse};
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Serialize;

use crate::AppState;
use crate::core::auth::AuthenticatedOwner;
use crate::models::error::{ApiError, ApiResult};

#[derive(Debug, Serialize)]
pub struct UsageLimit {
    pub used: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize)]
pub struct SearchUsage {
    pub used: u32,
    pub limit: u32,
    pub resets_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub tier: &'static str,
    pub memories: UsageLimit,
    pub searches: SearchUsage,
}

fn next_utc_midnight() -> DateTime<Utc> {
    let tomorrow = (Utc::now() + Duration::days(1)).date_naive();
    Utc.from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).expect("midnight is always valid"))
}

pub async fn get_quota(
    State(state): State<AppState>,
    Extension(AuthenticatedOwner(owner)): Extension<AuthenticatedOwner>,
) -> ApiResult<impl IntoResponse> {
    let memories_used = state
        .tri_store
        .relational
        .count_memories(&owner)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;
    let searches_used = state
        .tri_store
        .relational
        .get_daily_searches(&owner)
        .await
        .map_err(|e| ApiError::TransientUpstream(e.to_string()))?;

    Ok(Json(QuotaResponse {
        tier: "free",
        memories: UsageLimit {
            used: memories_used,
            limit: state.quota_config.free_tier_memory_cap as u64,
        },
        searches: SearchUsage {
            used: searches_used,
            limit: state.quota_config.free_tier_daily_searches,
            resets_at: next_utc_midnight(),
        },
    }))
}
