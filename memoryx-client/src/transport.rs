//! HTTP delivery to the MemoryX server's ingest endpoints (spec.md §6).

use std::time::Duration;

use crate::config::MemoryXConfig;
use crate::errors::{ClientError, Result};
use crate::types::{AcceptedResponse, ConversationFlushRequest, MemoryPayload};

/// Thin wrapper over `reqwest::Client` binding the configured base URL and
/// API key to every request.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl Transport {
    /// Builds a transport from client configuration.
    pub fn new(config: &MemoryXConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(ClientError::Transport)?;
        Ok(Self {
            client,
            base_url: config.server_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Posts a single memory write to `/v1/memories`.
    pub async fn post_memory(&self, payload: &MemoryPayload) -> Result<AcceptedResponse> {
        self.post("/v1/memories", payload).await
    }

    /// Posts a batch of memory writes to `/v1/memories/batch`.
    pub async fn post_memory_batch(&self, payloads: &[MemoryPayload]) -> Result<AcceptedResponse> {
        #[derive(serde::Serialize)]
        struct Batch<'a> {
            memories: &'a [MemoryPayload],
        }
        self.post("/v1/memories/batch", &Batch { memories: payloads }).await
    }

    /// Posts a conversation segment to `/v1/conversations/flush`.
    pub async fn post_conversation_flush(
        &self,
        request: &ConversationFlushRequest,
    ) -> Result<AcceptedResponse> {
        self.post("/v1/conversations/flush", request).await
    }

    async fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<AcceptedResponse> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("X-API-Key", &self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ClientError::ServerRejected {
                status: status.as_u16(),
                body: body_text,
            });
        }
        Ok(response.json::<AcceptedResponse>().await?)
    }
}
