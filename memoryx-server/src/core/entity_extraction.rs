//! Lightweight entity mention extraction shared by C2 (candidate facts),
//! C3 (entity resolution during reconciliation) and C5 (seed entities for
//! graph expansion).
//!
//! The LLM extraction call (`core/ingestion/llm.rs`) already returns
//! structured entity mentions for the facts it extracts; this module is
//! the fallback/complement used when entities must be pulled from text
//! that didn't go through the LLM path (e.g. a search query in C5). A
//! capitalized-run heuristic is cheap, deterministic and good enough for
//! seeding graph expansion — it does not need to be a real NER model.

use once_cell::sync::Lazy;
use regex::Regex;

static CAPITALIZED_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b([A-Z][a-zA-Z0-9]*(?:\s+[A-Z][a-zA-Z0-9]*)*)\b").unwrap());

const STOPWORDS: &[&str] = &["I", "The", "A", "An", "This", "That", "It"];

/// Names of likely entity mentions in `text`, deduplicated and in
/// first-seen order.
pub fn extract_mentions(text: &str) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut mentions = Vec::new();

    for m in CAPITALIZED_RUN.find_iter(text) {
        let candidate = m.as_str().trim();
        if candidate.len() < 2 || STOPWORDS.contains(&candidate) {
            continue;
        }
        let key = candidate.to_lowercase();
        if seen.insert(key) {
            mentions.push(candidate.to_string());
        }
    }
    mentions
}

/// Normalizes a mention to its canonical-name form: trimmed, collapsed
/// whitespace, title case preserved as extracted. Used as the dedup key
/// when upserting entities (spec.md §3, "Entity" canonical_name).
pub fn canonicalize(mention: &str) -> String {
    mention.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_multi_word_proper_nouns() {
        let mentions = extract_mentions("Alice met Bob Smith at Acme Corp yesterday");
        assert!(mentions.contains(&"Alice".to_string()));
        assert!(mentions.contains(&"Bob Smith".to_string()));
        assert!(mentions.contains(&"Acme Corp".to_string()));
    }

    #[test]
    fn filters_leading_stopwords() {
        let mentions = extract_mentions("The quick fox and Alice ran.");
        assert!(!mentions.contains(&"The".to_string()));
        assert!(mentions.contains(&"Alice".to_string()));
    }

    #[test]
    fn deduplicates_case_insensitively() {
        let mentions = extract_mentions("Alice called Alice back");
        assert_eq!(mentions.iter().filter(|m| m.as_str() == "Alice").count(), 1);
    }

    #[test]
    fn canonicalize_collapses_whitespace() {
        assert_eq!(canonicalize("Bob   Smith"), "Bob Smith");
    }
}
