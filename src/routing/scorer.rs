//! Adaptive provider scoring.
//!
//! Ranks eligible providers by a weighted sum of four normalized factors:
//! remaining quota fraction, inverse latency, inverse cost, and declared
//! quality. Normalization is relative to the candidate set under
//! consideration, so scores are comparable within one ranking pass but
//! not across passes. Deterministic: equal scores keep declared order.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Weights for the four scoring factors. Must sum to 1.0 (validated at
/// config load, not here).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FactorWeights {
    /// Weight of the remaining-quota fraction.
    #[serde(default = "default_weight_quota")]
    pub remaining_quota: f64,
    /// Weight of the inverse-latency factor.
    #[serde(default = "default_weight_latency")]
    pub latency: f64,
    /// Weight of the inverse-cost factor.
    #[serde(default = "default_weight_cost")]
    pub cost: f64,
    /// Weight of the declared quality score.
    #[serde(default = "default_weight_quality")]
    pub quality: f64,
}

fn default_weight_quota() -> f64 {
    0.35
}

fn default_weight_latency() -> f64 {
    0.20
}

fn default_weight_cost() -> f64 {
    0.25
}

fn default_weight_quality() -> f64 {
    0.20
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            remaining_quota: default_weight_quota(),
            latency: default_weight_latency(),
            cost: default_weight_cost(),
            quality: default_weight_quality(),
        }
    }
}

impl FactorWeights {
    /// Sum of all weights. Valid configurations sum to 1.0.
    pub fn sum(&self) -> f64 {
        self.remaining_quota + self.latency + self.cost + self.quality
    }
}

/// Per-candidate inputs to one ranking pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateMetrics {
    /// Provider name.
    pub name: String,
    /// Fraction of quota left across all tracked dimensions, 0.0 to 1.0.
    pub remaining_quota: f64,
    /// Declared or observed average latency.
    pub avg_latency_ms: u64,
    /// Declared per-unit cost, USD. Zero means free.
    pub cost_per_unit_usd: f64,
    /// Declared quality score, 0.0 to 1.0.
    pub quality: f64,
}

/// Factor-by-factor decomposition of one candidate's score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreBreakdown {
    /// Provider name.
    pub name: String,
    /// Normalized remaining-quota factor.
    pub quota_factor: f64,
    /// Normalized inverse-latency factor.
    pub latency_factor: f64,
    /// Normalized inverse-cost factor.
    pub cost_factor: f64,
    /// Quality factor (already 0..1, used as-is).
    pub quality_factor: f64,
    /// Weighted total.
    pub total: f64,
}

/// Stateless ranking over candidate metrics.
pub struct ProviderScorer {
    weights: FactorWeights,
}

impl ProviderScorer {
    /// Create a scorer with the given weights.
    pub fn new(weights: FactorWeights) -> Self {
        Self { weights }
    }

    /// Rank candidates best-first. Ties keep the input (declared) order.
    pub fn rank(&self, candidates: &[CandidateMetrics]) -> Vec<ScoreBreakdown> {
        let mut scored = self.score_all(candidates);
        // Stable sort preserves declared order among equal scores.
        scored.sort_by(|a, b| b.total.partial_cmp(&a.total).unwrap_or(std::cmp::Ordering::Equal));
        scored
    }

    /// Score every candidate without reordering.
    pub fn score_all(&self, candidates: &[CandidateMetrics]) -> Vec<ScoreBreakdown> {
        if candidates.is_empty() {
            return Vec::new();
        }

        // Normalization baselines relative to this candidate set.
        let min_latency = candidates
            .iter()
            .map(|c| c.avg_latency_ms.max(1))
            .min()
            .unwrap_or(1);
        let min_nonzero_cost = candidates
            .iter()
            .map(|c| c.cost_per_unit_usd)
            .filter(|c| *c > 0.0)
            .fold(f64::INFINITY, f64::min);

        candidates
            .iter()
            .map(|c| {
                let quota_factor = c.remaining_quota.clamp(0.0, 1.0);
                let latency_factor = min_latency as f64 / c.avg_latency_ms.max(1) as f64;
                let cost_factor = if c.cost_per_unit_usd <= 0.0 {
                    // Free providers get the best possible cost factor.
                    1.0
                } else if min_nonzero_cost.is_finite() {
                    min_nonzero_cost / c.cost_per_unit_usd
                } else {
                    1.0
                };
                let quality_factor = c.quality.clamp(0.0, 1.0);

                let total = self.weights.remaining_quota * quota_factor
                    + self.weights.latency * latency_factor
                    + self.weights.cost * cost_factor
                    + self.weights.quality * quality_factor;

                ScoreBreakdown {
                    name: c.name.clone(),
                    quota_factor,
                    latency_factor,
                    cost_factor,
                    quality_factor,
                    total,
                }
            })
            .collect()
    }
}

impl Default for ProviderScorer {
    fn default() -> Self {
        Self::new(FactorWeights::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(name: &str, quota: f64, latency: u64, cost: f64, quality: f64) -> CandidateMetrics {
        CandidateMetrics {
            name: name.to_string(),
            remaining_quota: quota,
            avg_latency_ms: latency,
            cost_per_unit_usd: cost,
            quality,
        }
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!((FactorWeights::default().sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_identical_candidates_keep_declared_order() {
        let scorer = ProviderScorer::default();
        let c = vec![
            candidate("a", 0.5, 100, 0.01, 0.8),
            candidate("b", 0.5, 100, 0.01, 0.8),
            candidate("c", 0.5, 100, 0.01, 0.8),
        ];
        let ranked = scorer.rank(&c);
        let names: Vec<_> = ranked.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
    }

    #[test]
    fn test_exhausted_quota_ranks_last() {
        let scorer = ProviderScorer::default();
        let c = vec![
            candidate("drained", 0.0, 100, 0.01, 0.8),
            candidate("fresh", 1.0, 100, 0.01, 0.8),
        ];
        let ranked = scorer.rank(&c);
        assert_eq!(ranked[0].name, "fresh");
        assert_eq!(ranked[1].name, "drained");
    }

    #[test]
    fn test_latency_normalized_against_fastest() {
        let scorer = ProviderScorer::default();
        let c = vec![
            candidate("fast", 1.0, 100, 0.01, 0.5),
            candidate("slow", 1.0, 400, 0.01, 0.5),
        ];
        let scored = scorer.score_all(&c);
        assert!((scored[0].latency_factor - 1.0).abs() < 1e-9);
        assert!((scored[1].latency_factor - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_free_provider_gets_full_cost_factor() {
        let scorer = ProviderScorer::default();
        let c = vec![
            candidate("free", 1.0, 100, 0.0, 0.5),
            candidate("paid", 1.0, 100, 0.04, 0.5),
            candidate("pricey", 1.0, 100, 0.08, 0.5),
        ];
        let scored = scorer.score_all(&c);
        assert!((scored[0].cost_factor - 1.0).abs() < 1e-9);
        assert!((scored[1].cost_factor - 1.0).abs() < 1e-9, "cheapest paid is the baseline");
        assert!((scored[2].cost_factor - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_all_free_candidates() {
        let scorer = ProviderScorer::default();
        let c = vec![
            candidate("a", 1.0, 100, 0.0, 0.5),
            candidate("b", 1.0, 100, 0.0, 0.9),
        ];
        let ranked = scorer.rank(&c);
        assert_eq!(ranked[0].name, "b", "quality breaks the tie when cost is uniform");
    }

    #[test]
    fn test_quality_weight_dominates_when_configured() {
        let scorer = ProviderScorer::new(FactorWeights {
            remaining_quota: 0.0,
            latency: 0.0,
            cost: 0.0,
            quality: 1.0,
        });
        let c = vec![
            candidate("cheap_mediocre", 1.0, 10, 0.001, 0.5),
            candidate("expensive_great", 0.1, 900, 0.10, 0.95),
        ];
        let ranked = scorer.rank(&c);
        assert_eq!(ranked[0].name, "expensive_great");
    }

    #[test]
    fn test_empty_candidate_set() {
        let scorer = ProviderScorer::default();
        assert!(scorer.rank(&[]).is_empty());
    }

    #[test]
    fn test_zero_latency_does_not_divide_by_zero() {
        let scorer = ProviderScorer::default();
        let c = vec![candidate("instant", 1.0, 0, 0.01, 0.5)];
        let scored = scorer.score_all(&c);
        assert!(scored[0].total.is_finite());
    }
}
