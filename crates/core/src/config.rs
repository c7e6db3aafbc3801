//! Immutable optimizer configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::candidate::SubScores;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

/// Errors found while validating configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// A count that must be positive is zero
    #[error("{0} must be at least 1")]
    ZeroCount(&'static str),

    /// A probability outside [0, 1]
    #[error("mutation_probability must be within [0, 1], got {0}")]
    Probability(f64),

    /// Weights do not sum to one
    #[error("fitness weights must sum to 1.0, got {0}")]
    WeightSum(f64),

    /// Weight below zero
    #[error("fitness weight {0} is negative")]
    NegativeWeight(&'static str),

    /// Tie epsilon below zero
    #[error("tie_epsilon must be non-negative, got {0}")]
    Epsilon(f64),
}

/// Weights applied to the sub-scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitnessWeights {
    /// w1
    pub augmented_effectiveness: f64,
    /// w2
    pub instructional_quality: f64,
    /// w3
    pub intent_preservation: f64,
}

impl Default for FitnessWeights {
    fn default() -> Self {
        Self {
            augmented_effectiveness: 0.5,
            instructional_quality: 0.25,
            intent_preservation: 0.25,
        }
    }
}

impl FitnessWeights {
    /// Weighted aggregate: w1*effectiveness + w2*instructional + w3*intent.
    pub fn combine(&self, scores: &SubScores) -> f64 {
        self.augmented_effectiveness * scores.augmented_effectiveness
            + self.instructional_quality * scores.instructional_quality
            + self.intent_preservation * scores.intent_preservation
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, w) in [
            ("augmented_effectiveness", self.augmented_effectiveness),
            ("instructional_quality", self.instructional_quality),
            ("intent_preservation", self.intent_preservation),
        ] {
            if w < 0.0 {
                return Err(ConfigError::NegativeWeight(name));
            }
        }
        let sum = self.augmented_effectiveness + self.instructional_quality + self.intent_preservation;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum(sum));
        }
        Ok(())
    }
}

/// Exponential backoff settings for transient capability failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (0-based): base * 2^attempt, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay_ms
            .saturating_mul(2_u64.saturating_pow(attempt));
        Duration::from_millis(exp.min(self.max_delay_ms))
    }
}

/// Parameters of one optimization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Candidates per generation
    #[serde(default = "default_population_size")]
    pub population_size: usize,

    /// Generations to run
    #[serde(default = "default_num_generations")]
    pub num_generations: usize,

    /// Parents selected per generation
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Probability a reproduction slot mutates rather than crosses over
    #[serde(default = "default_mutation_probability")]
    pub mutation_probability: f64,

    /// Scores closer than this are ties
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,

    /// Sub-score weights
    #[serde(default)]
    pub weights: FitnessWeights,

    /// Worker pool size for oracle calls
    #[serde(default = "default_max_concurrent_evaluations")]
    pub max_concurrent_evaluations: usize,

    /// Per-candidate evaluation deadline
    #[serde(default = "default_evaluation_timeout_secs")]
    pub evaluation_timeout_secs: u64,

    /// Judge samples per evaluated item
    #[serde(default = "default_sampling_count")]
    pub sampling_count: u32,

    /// Seed for selection and reproduction randomness (entropy if None)
    #[serde(default)]
    pub rng_seed: Option<u64>,

    /// Backoff for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_population_size() -> usize {
    10
}

fn default_num_generations() -> usize {
    5
}

fn default_top_k() -> usize {
    3
}

fn default_mutation_probability() -> f64 {
    0.7
}

fn default_tie_epsilon() -> f64 {
    1e-6
}

fn default_max_concurrent_evaluations() -> usize {
    4
}

fn default_evaluation_timeout_secs() -> u64 {
    600
}

fn default_sampling_count() -> u32 {
    1
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            population_size: default_population_size(),
            num_generations: default_num_generations(),
            top_k: default_top_k(),
            mutation_probability: default_mutation_probability(),
            tie_epsilon: default_tie_epsilon(),
            weights: FitnessWeights::default(),
            max_concurrent_evaluations: default_max_concurrent_evaluations(),
            evaluation_timeout_secs: default_evaluation_timeout_secs(),
            sampling_count: default_sampling_count(),
            rng_seed: None,
            retry: RetryConfig::default(),
        }
    }
}

impl OptimizerConfig {
    /// Check all invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("population_size", self.population_size),
            ("num_generations", self.num_generations),
            ("top_k", self.top_k),
            ("max_concurrent_evaluations", self.max_concurrent_evaluations),
            ("sampling_count", self.sampling_count as usize),
            ("retry.max_attempts", self.retry.max_attempts as usize),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroCount(name));
            }
        }
        if !(0.0..=1.0).contains(&self.mutation_probability) {
            return Err(ConfigError::Probability(self.mutation_probability));
        }
        if self.tie_epsilon < 0.0 || self.tie_epsilon.is_nan() {
            return Err(ConfigError::Epsilon(self.tie_epsilon));
        }
        self.weights.validate()
    }

    /// Per-candidate evaluation deadline.
    pub fn evaluation_timeout(&self) -> Duration {
        Duration::from_secs(self.evaluation_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert_eq!(OptimizerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn test_combine_is_weighted_sum() {
        let weights = FitnessWeights {
            augmented_effectiveness: 0.5,
            instructional_quality: 0.3,
            intent_preservation: 0.2,
        };
        let scores = SubScores {
            instructional_quality: 4.0,
            augmented_effectiveness: 2.0,
            intent_preservation: 5.0,
        };
        let expected = 0.5 * 2.0 + 0.3 * 4.0 + 0.2 * 5.0;
        assert_eq!(weights.combine(&scores), expected);
        assert_eq!(weights.combine(&scores), weights.combine(&scores));
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let config = OptimizerConfig {
            weights: FitnessWeights {
                augmented_effectiveness: 0.5,
                instructional_quality: 0.5,
                intent_preservation: 0.5,
            },
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::WeightSum(_))));
    }

    #[test]
    fn test_rejects_zero_population() {
        let config = OptimizerConfig {
            population_size: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroCount("population_size")));
    }

    #[test]
    fn test_rejects_bad_probability() {
        let config = OptimizerConfig {
            mutation_probability: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Probability(1.5)));
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let config: OptimizerConfig = serde_json::from_str(r#"{"population_size": 4, "top_k": 2}"#).unwrap();
        assert_eq!(config.population_size, 4);
        assert_eq!(config.top_k, 2);
        assert_eq!(config.num_generations, 5);
        assert_eq!(config.mutation_probability, 0.7);
    }

    #[test]
    fn test_backoff_delay_is_capped() {
        let retry = RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
        };
        assert_eq!(retry.delay_for(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for(8), Duration::from_millis(1_000));
    }
}
