//! External AI capabilities and the adapters built on them.
//!
//! The optimizer never talks to a model directly. It goes through two
//! capability traits ([`GenerationCapability`], [`EvaluationCapability`])
//! and two adapters ([`FitnessOracle`], [`CandidateGenerator`]) that absorb
//! backend failures into typed results.

#![warn(missing_docs)]

pub mod capability;
pub mod error;
pub mod gemini;
pub mod generator;
pub mod grader;
pub mod oracle;
pub mod retry;
pub mod structured;
pub mod templates;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use capability::{
    BatchEvaluation, EvalRow, EvaluationCapability, GenerateRequest, GenerationCapability, ItemScore,
    PointwiseMetric,
};
pub use error::{CapabilityError, EvalError};
pub use gemini::GeminiClient;
pub use generator::{CandidateGenerator, LlmCandidateGenerator};
pub use grader::ModelGradedEvaluator;
pub use oracle::{FitnessOracle, OracleScore, ScoringOracle};
pub use retry::{generate_with_retry, with_backoff};
pub use structured::parse_json_reply;
pub use templates::MetricSet;
