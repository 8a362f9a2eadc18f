//! System diagnostics, ambient observability rather than one of the
//! spec's nine domain endpoints — kept deliberately minimal since the
//! teacher's chat-completion response cache has no MemoryX counterpart.

use axum::{Json, response::IntoResponse};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct SystemStats {
    pub version: &'static str,
}

pub async fn get_stats() -> impl IntoResponse {
    Json(SystemStats {
        version: env!("CARGO_PKG_VERSION"),
    })
}
