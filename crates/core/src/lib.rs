//! Metaprompt optimizer core data models.
//!
//! This crate defines the candidate, generation and configuration types
//! shared by the evaluation, selection and persistence layers.

#![warn(missing_docs)]

// Core identities
mod id;

// Population and workload
mod candidate;
mod prompt;

// Run history
mod generation;

// Configuration
mod config;

// Re-exports
pub use id::*;

pub use candidate::{AugmentedPrompt, Candidate, Explanations, Fitness, Provenance, SubScores};
pub use prompt::{BasePrompt, BasePromptSet, WorkloadError};
pub use generation::{
    EvaluationFailure, Generation, RunHistory, RunReport, RunStatus, TieBreakMethod, TieBreakRecord,
};
pub use config::{ConfigError, FitnessWeights, OptimizerConfig, RetryConfig};

/// Timestamp type
pub type Time = chrono::DateTime<chrono::Utc>;
