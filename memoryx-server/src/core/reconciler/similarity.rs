//! Finds and ranks candidate matches for a candidate fact against the
//! owner's existing memories (spec.md §4.3): a cosine top-k window pulled
//! from the vector index, re-ranked by entity-mention overlap so the
//! decision procedure isn't stuck with whichever neighbor embeds closest
//! when a lower-ranked neighbor actually shares more named entities.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use uuid::Uuid;

use crate::core::entity_extraction::extract_mentions;
use crate::core::tri_store::traits::VectorIndex;
use crate::models::owner::Owner;

/// Neighbors considered per candidate before picking a match — wide
/// enough that a lexically-better match outside the single nearest
/// embedding still has a chance to win the re-rank.
pub const MATCH_WINDOW: usize = 5;

/// One vector-index hit: memory id plus raw cosine similarity.
#[derive(Debug, Clone, Copy)]
pub struct SimilarityMatch {
    pub memory_id: Uuid,
    pub similarity: f32,
}

/// A similarity match enriched with the neighbor's own content — the
/// material [`entity_sets_equal`] and [`rerank`] need, and what
/// [`super::decision::decide`] judges its NOOP/UPDATE/DELETE split
/// against.
#[derive(Debug, Clone)]
pub struct Neighbor {
    pub memory_id: Uuid,
    pub similarity: f32,
    pub content: String,
}

/// The `MATCH_WINDOW` nearest neighbors, ordered by descending cosine
/// similarity as returned by the vector index.
pub async fn top_matches(
    vector: &Arc<dyn VectorIndex>,
    owner: &Owner,
    embedding: &[f32],
    category: Option<&str>,
) -> Result<Vec<SimilarityMatch>> {
    let hits = vector.search(owner, embedding, MATCH_WINDOW, category).await?;
    Ok(hits
        .into_iter()
        .map(|(memory_id, similarity)| SimilarityMatch { memory_id, similarity })
        .collect())
}

fn entity_set(text: &str) -> HashSet<String> {
    extract_mentions(text).into_iter().map(|m| m.to_lowercase()).collect()
}

/// Whether two pieces of content mention exactly the same entities — the
/// NOOP branch's second condition (spec.md §4.3: similarity above the
/// NOOP threshold alone is not enough; the entity sets must match too).
pub fn entity_sets_equal(a: &str, b: &str) -> bool {
    entity_set(a) == entity_set(b)
}

fn entity_jaccard(a: &str, b: &str) -> f32 {
    let sa = entity_set(a);
    let sb = entity_set(b);
    if sa.is_empty() && sb.is_empty() {
        return 1.0;
    }
    let intersection = sa.intersection(&sb).count() as f32;
    let union = sa.union(&sb).count() as f32;
    if union == 0.0 { 0.0 } else { intersection / union }
}

/// Picks the best neighbor for `candidate_content` out of `neighbors`,
/// breaking ties (and near-ties) in cosine similarity with entity-mention
/// overlap, so a lower-ranked-but-lexically-closer neighbor can still
/// win over the raw top-1 embedding match.
pub fn rerank(candidate_content: &str, neighbors: Vec<Neighbor>) -> Option<Neighbor> {
    neighbors.into_iter().max_by(|a, b| {
        let score_a = a.similarity + 0.05 * entity_jaccard(candidate_content, &a.content);
        let score_b = b.similarity + 0.05 * entity_jaccard(candidate_content, &b.content);
        score_a.partial_cmp(&score_b).unwrap_or(std::cmp::Ordering::Equal)
    })
}
