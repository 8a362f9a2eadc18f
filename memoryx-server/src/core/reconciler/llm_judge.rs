//! The LLM judge disambiguates the similarity gray zone (spec.md §4.3):
//! a candidate similar enough to an existing memory to not be a plain
//! ADD, but not similar enough to be a NOOP, might supersede, contradict,
//! or turn out unrelated to that memory. Kept as a separate model/prompt
//! from extraction (`core/ingestion/llm.rs`) since judging is a distinct,
//! smaller task — mirrors spec.md §6's separate `judge_model` config key.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

pub const JUDGE_PROMPT: &str = "You are comparing a new fact about a user against an existing \
memory about the same user. Decide whether the new fact SUPERSEDES the existing one (an updated \
value for the same attribute), CONTRADICTS it (the existing memory is no longer true and should \
be removed), or is UNRELATED (they merely share vocabulary and should both be kept). Respond as \
JSON: {\"verdict\": \"supersedes\" | \"contradicts\" | \"unrelated\"}.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeVerdict {
    Supersedes,
    Contradicts,
    Unrelated,
}

#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, existing_content: &str, candidate_content: &str) -> Result<JudgeVerdict>;
}

#[derive(Deserialize)]
struct JudgeResponse {
    verdict: String,
}

pub struct LlmJudge {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

impl LlmJudge {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
        }
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, existing_content: &str, candidate_content: &str) -> Result<JudgeVerdict> {
        let body = json!({
            "model": self.model,
            "response_format": { "type": "json_object" },
            "messages": [
                { "role": "system", "content": JUDGE_PROMPT },
                { "role": "user", "content": format!(
                    "Existing memory: {existing_content}\nNew fact: {candidate_content}"
                ) },
            ],
        });

        let mut req = self.client.post(format!("{}/chat/completions", self.base_url)).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(anyhow!("judge call failed with status {status}"));
        }

        let payload: serde_json::Value = response.json().await?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| anyhow!("judge response missing message content"))?;
        let parsed: JudgeResponse = serde_json::from_str(content)?;

        match parsed.verdict.as_str() {
            "supersedes" => Ok(JudgeVerdict::Supersedes),
            "contradicts" => Ok(JudgeVerdict::Contradicts),
            "unrelated" => Ok(JudgeVerdict::Unrelated),
            other => Err(anyhow!("unexpected judge verdict: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_three_verdicts() {
        for (raw, expected) in [
            (r#"{"verdict":"supersedes"}"#, JudgeVerdict::Supersedes),
            (r#"{"verdict":"contradicts"}"#, JudgeVerdict::Contradicts),
            (r#"{"verdict":"unrelated"}"#, JudgeVerdict::Unrelated),
        ] {
            let parsed: JudgeResponse = serde_json::from_str(raw).unwrap();
            let verdict = match parsed.verdict.as_str() {
                "supersedes" => JudgeVerdict::Supersedes,
                "contradicts" => JudgeVerdict::Contradicts,
                "unrelated" => JudgeVerdict::Unrelated,
                _ => unreachable!(),
            };
            assert_eq!(verdict, expected);
        }
    }
}
