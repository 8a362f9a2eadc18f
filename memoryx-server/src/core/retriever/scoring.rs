//! Multi-factor relevance scoring for C5's ranked recall.
//!
//! Grounded directly on the teacher's `memory::scoring::RelevanceConfig` /
//! `RelevanceScorer` (weighted-sum `Default` with a sum-to-1.0 assertion,
//! exponential decay helper), generalized from its four IDE-session-specific
//! factors (semantic/cwd/files/recency) to the three spec.md §4.5 names:
//! vector similarity, graph-context boost, temporal decay.

/// Weights for the three scoring factors (spec.md §4.5 step 5). "The
/// constants MUST be configurable" — these are the `RetrieverConfig`
/// values, reshaped into the form the scorer consumes.
#[derive(Debug, Clone, Copy)]
pub struct ScoringConfig {
    pub alpha_similarity: f64,
    pub beta_graph: f64,
    pub gamma_recency: f64,
    pub temporal_decay_tau_days: f64,
}

impl ScoringConfig {
    /// Creates a config with custom weights.
    ///
    /// # Panics
    /// Panics if the weights don't sum to approximately 1.0 (within a 0.01
    /// tolerance) — the same guardrail the teacher's `RelevanceConfig`
    /// applies to its four factors.
    pub fn with_weights(alpha_similarity: f64, beta_graph: f64, gamma_recency: f64, tau_days: f64) -> Self {
        let sum = alpha_similarity + beta_graph + gamma_recency;
        assert!((sum - 1.0).abs() < 0.01, "scoring weights must sum to 1.0, got {sum}");
        Self {
            alpha_similarity,
            beta_graph,
            gamma_recency,
            temporal_decay_tau_days: tau_days,
        }
    }

    pub fn total_weight(&self) -> f64 {
        self.alpha_similarity + self.beta_graph + self.gamma_recency
    }
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            alpha_similarity: 0.6,
            beta_graph: 0.25,
            gamma_recency: 0.15,
            temporal_decay_tau_days: 30.0,
        }
    }
}

/// Individual score components and their weighted total (spec.md §4.5
/// step 5 formula).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelevanceScore {
    pub similarity: f64,
    pub graph_boost: f64,
    pub temporal_decay: f64,
    pub total: f64,
}

impl RelevanceScore {
    pub fn zero() -> Self {
        Self {
            similarity: 0.0,
            graph_boost: 0.0,
            temporal_decay: 0.0,
            total: 0.0,
        }
    }
}

/// Computes relevance scores for C5's ranked recall.
#[derive(Debug, Clone, Copy)]
pub struct RelevanceScorer {
    config: ScoringConfig,
}

impl RelevanceScorer {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// `temporal_decay = exp(-(now - updated_at) / tau)` (spec.md §4.5
    /// step 5), `tau` expressed in days.
    pub fn temporal_decay(&self, age_days: f64) -> f64 {
        if age_days < 0.0 {
            return 1.0;
        }
        (-age_days / self.config.temporal_decay_tau_days).exp()
    }

    /// Combines the three factors into a final score (spec.md §4.5 step 5:
    /// `α · sim + β · graph_boost + γ · temporal_decay`).
    pub fn compute_score(&self, similarity: f64, graph_boost: f64, age_days: f64) -> RelevanceScore {
        let temporal_decay = self.temporal_decay(age_days);
        let total = similarity * self.config.alpha_similarity
            + graph_boost * self.config.beta_graph
            + temporal_decay * self.config.gamma_recency;

        RelevanceScore {
            similarity,
            graph_boost,
            temporal_decay,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let config = ScoringConfig::default();
        assert!((config.total_weight() - 1.0).abs() < 0.001);
    }

    #[test]
    #[should_panic(expected = "scoring weights must sum to 1.0")]
    fn rejects_weights_that_do_not_sum_to_one() {
        ScoringConfig::with_weights(0.5, 0.5, 0.5, 30.0);
    }

    #[test]
    fn temporal_decay_at_zero_age_is_one() {
        let scorer = RelevanceScorer::new(ScoringConfig::default());
        assert!((scorer.temporal_decay(0.0) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn temporal_decay_at_one_tau_is_about_0_37() {
        let scorer = RelevanceScorer::new(ScoringConfig::default());
        assert!((scorer.temporal_decay(30.0) - 0.3679).abs() < 0.001);
    }

    #[test]
    fn future_timestamps_get_full_recency_score() {
        let scorer = RelevanceScorer::new(ScoringConfig::default());
        assert_eq!(scorer.temporal_decay(-1.0), 1.0);
    }

    #[test]
    fn compute_score_combines_weighted_factors() {
        let scorer = RelevanceScorer::new(ScoringConfig::default());
        let score = scorer.compute_score(0.9, 0.5, 0.0);
        // 0.9*0.6 + 0.5*0.25 + 1.0*0.15 = 0.54 + 0.125 + 0.15 = 0.815
        assert!((score.total - 0.815).abs() < 0.001);
    }
}
