//! Deployment-tunable configuration for matching and reconciliation
//!
//! Every threshold the engines consult lives here rather than in code, so a
//! deployment can tune auto-confirm behavior, pattern reinforcement and
//! balance tolerances without rebuilding.

use serde::{Deserialize, Serialize};

/// Thresholds governing candidate scoring and auto-confirmation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Minimum score for a match to commit without human review
    pub auto_confirm_threshold: f64,
    /// A top candidate within this margin of the runner-up is not unique
    /// enough to auto-confirm
    pub score_tie_margin: f64,
    /// Candidates scoring below this are dropped from suggestion lists
    pub min_display_score: f64,
    /// Default minimum similarity for fuzzy description criteria that do not
    /// set their own
    pub fuzzy_min_similarity: f64,
    /// Allowed rounding slack, in minor units, when split allocations are
    /// summed against the transaction amount
    pub split_rounding_tolerance: i64,
    /// How many days around the transaction date to ask the record services
    /// for candidates
    pub candidate_window_days: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            auto_confirm_threshold: 90.0,
            score_tie_margin: 5.0,
            min_display_score: 40.0,
            fuzzy_min_similarity: 0.8,
            split_rounding_tolerance: 1,
            candidate_window_days: 30,
        }
    }
}

/// Reinforcement parameters for the pattern learner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Strength assigned to a freshly created pattern
    pub initial_strength: f64,
    /// Strength gained on each confirmation
    pub strength_increment: f64,
    /// Strength lost on each rejection
    pub strength_decrement: f64,
    /// Hard ceiling for strength
    pub max_strength: f64,
    /// Patterns falling below this strength are deactivated, never deleted
    pub deactivation_floor: f64,
    /// Maximum edit distance for near-fingerprint template lookups
    pub template_edit_distance: usize,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            initial_strength: 25.0,
            strength_increment: 15.0,
            strength_decrement: 20.0,
            max_strength: 100.0,
            deactivation_floor: 10.0,
            template_edit_distance: 2,
        }
    }
}

/// Balance comparison tolerances for reconciliation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    /// Allowed rounding slack, in minor units, when comparing balances.
    /// Differences at or below this are treated as zero.
    pub rounding_tolerance: i64,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            rounding_tolerance: 0,
        }
    }
}

/// Bundle of all engine configuration for one deployment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    pub matching: MatchingConfig,
    pub patterns: PatternConfig,
    pub reconciliation: ReconciliationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = CoreConfig::default();
        assert!(config.matching.auto_confirm_threshold > config.matching.min_display_score);
        assert!(config.patterns.initial_strength > config.patterns.deactivation_floor);
        assert!(config.patterns.max_strength >= config.patterns.initial_strength);
        assert_eq!(config.reconciliation.rounding_tolerance, 0);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = CoreConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: CoreConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}
