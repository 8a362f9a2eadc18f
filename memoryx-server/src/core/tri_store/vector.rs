//! Meilisearch-backed [`VectorIndex`].
//!
//! Grounded on the teacher's `core/storage/meilisearch.rs`: one prefixed
//! index (`memoryx_embeddings`), settings configured on connect, full
//! documents fetched per owner and ranked client-side by cosine
//! similarity. Meilisearch's own vector search is left unused deliberately
//! — the SDK version pinned here predates it becoming stable, and an
//! explicit cosine pass keeps the ranking formula auditable.

use anyhow::Result;
use async_trait::async_trait;
use meilisearch_sdk::client::Client;
use meilisearch_sdk::settings::Settings;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use super::traits::VectorIndex;
use crate::models::owner::Owner;

pub const INDEX_EMBEDDINGS: &str = "memoryx_embeddings";

#[derive(Clone, Debug)]
pub struct VectorConfig {
    pub url: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EmbeddingDocument {
    id: String,
    memory_id: String,
    user_id: String,
    project_id: String,
    #[serde(default)]
    category: Option<String>,
    content: String,
    embedding: Vec<f32>,
}

pub struct MeilisearchVectorIndex {
    client: Client,
}

impl MeilisearchVectorIndex {
    pub async fn connect(config: VectorConfig) -> Result<Self> {
        info!("connecting to vector store at {}", config.url);
        let client = Client::new(&config.url, config.api_key.as_deref())?;

        client.create_index(INDEX_EMBEDDINGS, Some("id")).await.ok();
        let index = client.index(INDEX_EMBEDDINGS);
        let settings = Settings::new()
            .with_searchable_attributes(["content"])
            .with_filterable_attributes(["user_id", "project_id", "category"]);
        index.set_settings(&settings).await?;

        Ok(Self { client })
    }

    fn doc_id(owner: &Owner, memory_id: Uuid) -> String {
        format!("{}-{}", owner.key(), memory_id)
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[async_trait]
impl VectorIndex for MeilisearchVectorIndex {
    async fn upsert(
        &self,
        owner: &Owner,
        memory_id: Uuid,
        content: &str,
        category: Option<&str>,
        embedding: &[f32],
    ) -> Result<()> {
        let doc = EmbeddingDocument {
            id: Self::doc_id(owner, memory_id),
            memory_id: memory_id.to_string(),
            user_id: owner.user_id.clone(),
            project_id: owner.project_id.clone(),
            category: category.map(|c| c.to_string()),
            content: content.to_string(),
            embedding: embedding.to_vec(),
        };
        let index = self.client.index(INDEX_EMBEDDINGS);
        index.add_documents(&[doc], Some("id")).await?;
        debug!(memory_id = %memory_id, "upserted embedding");
        Ok(())
    }

    async fn delete(&self, owner: &Owner, memory_id: Uuid) -> Result<()> {
        let index = self.client.index(INDEX_EMBEDDINGS);
        index.delete_document(Self::doc_id(owner, memory_id)).await?;
        Ok(())
    }

    async fn search(
        &self,
        owner: &Owner,
        embedding: &[f32],
        limit: usize,
        category: Option<&str>,
    ) -> Result<Vec<(Uuid, f32)>> {
        let index = self.client.index(INDEX_EMBEDDINGS);
        let mut filter = format!("user_id = \"{}\" AND project_id = \"{}\"", owner.user_id, owner.project_id);
        if let Some(category) = category {
            filter.push_str(&format!(" AND category = \"{}\"", category));
        }

        let results = index
            .search()
            .with_filter(&filter)
            .with_limit(1000)
            .execute::<EmbeddingDocument>()
            .await?;

        let mut scored: Vec<(Uuid, f32)> = results
            .hits
            .into_iter()
            .filter_map(|hit| {
                let doc = hit.result;
                let memory_id = Uuid::parse_str(&doc.memory_id).ok()?;
                Some((memory_id, cosine_similarity(embedding, &doc.embedding)))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        Ok(scored)
    }

    async fn exists(&self, owner: &Owner, memory_id: Uuid) -> Result<bool> {
        let index = self.client.index(INDEX_EMBEDDINGS);
        match index.get_document::<EmbeddingDocument>(&Self::doc_id(owner, memory_id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.to_string().to_lowercase().contains("not found") => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_handles_zero_vector() {
        let a = vec![0.0, 0.0];
        let b = vec![1.0, 1.0];
        assert_eq!(cosine_similarity(&a, &b), 0.0);
    }

    #[test]
    fn doc_id_is_stable_per_owner_and_memory() {
        let owner = Owner::new("u1", "p1");
        let memory_id = Uuid::new_v4();
        let a = MeilisearchVectorIndex::doc_id(&owner, memory_id);
        let b = MeilisearchVectorIndex::doc_id(&owner, memory_id);
        assert_eq!(a, b);
        assert_ne!(a, MeilisearchVectorIndex::doc_id(&Owner::new("u2", "p1"), memory_id));
    }
}
