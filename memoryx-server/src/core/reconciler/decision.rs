//! Pure decision logic: given a candidate fact and its best-matching
//! existing memory (if any), decides ADD / UPDATE / DELETE / NOOP
//! (spec.md §4.3).
//!
//! NOOP requires both a high cosine similarity *and* an equal entity set
//! (spec.md §4.3's deterministic rule) — near-identical wording about a
//! different entity ("likes coffee" vs. "Alice likes coffee") must not
//! collapse to NOOP just because the embeddings land close together.
//!
//! The DELETE branch additionally requires the LLM judge's verdict — a
//! high-similarity match alone cannot distinguish "this supersedes the
//! old fact" from "this contradicts and retracts it" — so [`decide`]
//! takes an optional [`JudgeVerdict`] and only emits `Delete` when the
//! judge says so explicitly.

use uuid::Uuid;

use super::llm_judge::JudgeVerdict;
use super::similarity::{Neighbor, entity_sets_equal};
use crate::core::config::ReconcilerConfig;
use crate::models::memory::{CandidateFact, Decision};

pub fn decide(
    candidate: CandidateFact,
    best_match: Option<&Neighbor>,
    judge: Option<&JudgeVerdict>,
    config: &ReconcilerConfig,
) -> Decision {
    let Some(best_match) = best_match else {
        return Decision::Add { candidate };
    };

    if best_match.similarity < config.similarity_threshold_add {
        return Decision::Add { candidate };
    }

    if best_match.similarity >= config.similarity_threshold_noop
        && entity_sets_equal(&candidate.content, &best_match.content)
    {
        return Decision::Noop {
            memory_id: best_match.memory_id,
        };
    }

    match judge {
        Some(JudgeVerdict::Contradicts) => Decision::Delete {
            memory_id: best_match.memory_id,
        },
        Some(JudgeVerdict::Supersedes) | None => Decision::Update {
            memory_id: best_match.memory_id,
            new_content: candidate.content,
        },
        Some(JudgeVerdict::Unrelated) => Decision::Add { candidate },
    }
}

pub fn memory_id_of(decision: &Decision) -> Option<Uuid> {
    match decision {
        Decision::Update { memory_id, .. } | Decision::Delete { memory_id } | Decision::Noop { memory_id } => {
            Some(*memory_id)
        }
        Decision::Add { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::owner::Owner;

    fn candidate() -> CandidateFact {
        CandidateFact {
            content: "drinks dark roast coffee".into(),
            owner: Owner::new("u1", "p1"),
            source_conversation_id: Uuid::new_v4(),
            category: None,
            extracted_entities: vec![],
        }
    }

    #[test]
    fn no_match_always_adds() {
        let config = ReconcilerConfig::default();
        let decision = decide(candidate(), None, None, &config);
        assert_eq!(decision.kind(), "add");
    }

    #[test]
    fn above_noop_threshold_is_noop() {
        let config = ReconcilerConfig::default();
        let best = Neighbor {
            memory_id: Uuid::new_v4(),
            similarity: 0.97,
            content: "drinks dark roast coffee, every morning".into(),
        };
        let decision = decide(candidate(), Some(&best), None, &config);
        assert_eq!(decision.kind(), "noop");
    }

    #[test]
    fn above_noop_threshold_but_different_entity_is_not_noop() {
        let config = ReconcilerConfig::default();
        let best = Neighbor {
            memory_id: Uuid::new_v4(),
            similarity: 0.97,
            content: "Bob drinks dark roast coffee".into(),
        };
        let mut mentions_candidate = candidate();
        mentions_candidate.content = "Alice drinks dark roast coffee".into();
        let decision = decide(mentions_candidate, Some(&best), None, &config);
        assert_eq!(decision.kind(), "update");
    }

    #[test]
    fn gray_zone_without_judge_defaults_to_update() {
        let config = ReconcilerConfig::default();
        let best = Neighbor {
            memory_id: Uuid::new_v4(),
            similarity: 0.85,
            content: "drinks dark roast coffee".into(),
        };
        let decision = decide(candidate(), Some(&best), None, &config);
        assert_eq!(decision.kind(), "update");
    }

    #[test]
    fn gray_zone_with_contradiction_is_delete() {
        let config = ReconcilerConfig::default();
        let best = Neighbor {
            memory_id: Uuid::new_v4(),
            similarity: 0.85,
            content: "drinks dark roast coffee".into(),
        };
        let decision = decide(candidate(), Some(&best), Some(&JudgeVerdict::Contradicts), &config);
        assert_eq!(decision.kind(), "delete");
    }

    #[test]
    fn below_add_threshold_is_add_even_with_a_match() {
        let config = ReconcilerConfig::default();
        let best = Neighbor {
            memory_id: Uuid::new_v4(),
            similarity: 0.4,
            content: "drinks dark roast coffee".into(),
        };
        let decision = decide(candidate(), Some(&best), None, &config);
        assert_eq!(decision.kind(), "add");
    }
}
