//! LLM client abstraction for C2's fact extraction and embedding calls.
//!
//! Grounded in the teacher's pattern of injecting long-lived handles
//! rather than constructing clients per-request (`ClaudeManager` held in
//! `AppState`); here the handle is an `LlmClient` trait with a single
//! `reqwest`-backed implementation talking to an OpenAI-compatible
//! `/chat/completions` and `/embeddings` surface, so a local Ollama or a
//! hosted provider both work without a code change.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::memory::ExtractedEntity;

/// Fixed extraction prompt. Deployment-controlled in principle (spec.md
/// §9 Open Questions), pinned here as the documented current contract.
pub const EXTRACTION_PROMPT: &str = "You are a memory extraction engine. Given a conversation \
segment, extract a list of durable, self-contained facts worth remembering about the user. \
Each fact must stand alone without conversational context. Guess a short category for each fact \
(e.g. preference, biographical, relationship, goal) only when confident, otherwise omit it. Also \
list any named entities the fact mentions, with a short entity type (person, place, organization, \
preference, other). Respond as JSON: {\"facts\": [{\"content\": string, \"category\": string | \
null, \"entities\": [{\"name\": string, \"entity_type\": string}]}]}. Do not include facts that \
are questions, small talk, or already implied by common sense.";

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn extract_facts(&self, conversation_text: &str) -> Result<Vec<ExtractedFact>>;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedFact {
    pub content: String,
    #[serde(default)]
    pub category: Option<String>,
    pub entities: Vec<ExtractedEntity>,
}

#[derive(Debug, Deserialize)]
struct ExtractionResponse {
    facts: Vec<ExtractedFact>,
}

pub struct OpenAiCompatibleLlmClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    extraction_model: String,
    embedding_model: String,
}

impl OpenAiCompatibleLlmClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        extraction_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            extraction_model: extraction_model.into(),
            embedding_model: embedding_model.into(),
        }
    }

    fn request(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleLlmClient {
    async fn extract_facts(&self, conversation_text: &str) -> Result<Vec<ExtractedFact>> {
        let body = json!({
            "model": self.extraction_model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": EXTRACTION_PROMPT },
                { "role": "user", "content": conversation_text },
            ],
        });

        let req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        let response = self.request(req).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("extraction call failed ({status}): {text}"));
        }

        let payload: serde_json::Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("extraction response missing message content"))?;

        let parsed: ExtractionResponse = serde_json::from_str(content)?;
        Ok(parsed.facts)
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let body = json!({
            "model": self.embedding_model,
            "input": text,
        });

        let req = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&body);
        let response = self.request(req).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("embedding call failed ({status}): {text}"));
        }

        let payload: serde_json::Value = response.json().await?;
        let embedding = payload["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| anyhow!("embedding response missing data"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();
        Ok(embedding)
    }
}
