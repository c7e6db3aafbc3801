//! Scripted fakes for the capability and adapter traits.
//!
//! Enabled in this crate's tests and, through the `testing` feature, in
//! downstream crates' tests.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use metaevo_core::{BasePromptSet, Explanations, SubScores};

use crate::capability::{
    BatchEvaluation, EvalRow, EvaluationCapability, GenerateRequest, GenerationCapability, ItemScore,
    PointwiseMetric,
};
use crate::error::{CapabilityError, EvalError};
use crate::generator::CandidateGenerator;
use crate::oracle::{FitnessOracle, OracleScore};

/// Generation capability answering with a closure.
pub struct FnGeneration<F> {
    f: Arc<F>,
    calls: Arc<AtomicUsize>,
}

impl<F> FnGeneration<F>
where
    F: Fn(&GenerateRequest) -> Result<String, CapabilityError> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self {
            f: Arc::new(f),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Calls made so far, across clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<F> Clone for FnGeneration<F> {
    fn clone(&self) -> Self {
        Self {
            f: Arc::clone(&self.f),
            calls: Arc::clone(&self.calls),
        }
    }
}

#[async_trait]
impl<F> GenerationCapability for FnGeneration<F>
where
    F: Fn(&GenerateRequest) -> Result<String, CapabilityError> + Send + Sync,
{
    async fn generate(&self, request: &GenerateRequest) -> Result<String, CapabilityError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.f)(request)
    }
}

/// Evaluation capability answering with a closure.
pub struct FnEvaluation<F> {
    f: F,
}

impl<F> FnEvaluation<F>
where
    F: Fn(&[EvalRow], &PointwiseMetric) -> Result<BatchEvaluation, CapabilityError> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> EvaluationCapability for FnEvaluation<F>
where
    F: Fn(&[EvalRow], &PointwiseMetric) -> Result<BatchEvaluation, CapabilityError> + Send + Sync,
{
    async fn evaluate_pointwise_batch(
        &self,
        dataset: &[EvalRow],
        metric: &PointwiseMetric,
        _sampling_count: u32,
    ) -> Result<BatchEvaluation, CapabilityError> {
        (self.f)(dataset, metric)
    }
}

/// A batch where every row scored `mean`.
pub fn uniform_batch(metric: &PointwiseMetric, rows: usize, mean: f64, explanation: &str) -> BatchEvaluation {
    let mut summary = BTreeMap::new();
    summary.insert(metric.mean_key(), mean);
    summary.insert(metric.std_key(), 0.0);
    BatchEvaluation {
        summary,
        rows: (0..rows)
            .map(|_| ItemScore {
                score: Some(mean),
                explanation: explanation.to_string(),
            })
            .collect(),
    }
}

/// Fitness oracle computing sub-scores from the candidate text.
pub struct FnOracle<F> {
    f: F,
    calls: AtomicUsize,
}

impl<F> FnOracle<F>
where
    F: Fn(&str) -> Result<SubScores, EvalError> + Send + Sync,
{
    /// Wrap `f`.
    pub fn new(f: F) -> Self {
        Self {
            f,
            calls: AtomicUsize::new(0),
        }
    }

    /// Calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<F> FitnessOracle for FnOracle<F>
where
    F: Fn(&str) -> Result<SubScores, EvalError> + Send + Sync,
{
    async fn score(&self, candidate_text: &str, base_prompts: &BasePromptSet) -> Result<OracleScore, EvalError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let sub_scores = (self.f)(candidate_text)?;
        Ok(OracleScore {
            sub_scores,
            explanations: Explanations {
                instructional_quality: format!("instructional {}", sub_scores.instructional_quality),
                augmented_effectiveness: format!("effectiveness {}", sub_scores.augmented_effectiveness),
                intent_preservation: format!("intent {}", sub_scores.intent_preservation),
            },
            augmented_prompts: base_prompts
                .iter()
                .map(|p| metaevo_core::AugmentedPrompt {
                    original_prompt: p.prompt.clone(),
                    augmented_prompt: format!("{} ({})", p.prompt, candidate_text),
                    image_ref: p.image_ref.clone(),
                })
                .collect(),
        })
    }
}

/// Generator producing predictable texts without a backend.
#[derive(Debug, Default)]
pub struct EchoGenerator {
    mutations: AtomicUsize,
    crossovers: AtomicUsize,
}

impl EchoGenerator {
    /// Create a generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutations performed so far.
    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    /// Crossovers performed so far.
    pub fn crossovers(&self) -> usize {
        self.crossovers.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CandidateGenerator for EchoGenerator {
    async fn generate_variations(&self, seed: &str, count: usize) -> Result<Vec<String>, EvalError> {
        Ok((1..=count).map(|i| format!("{} [v{}]", seed, i)).collect())
    }

    async fn mutate(&self, parent: &str, _feedback: &str) -> Result<String, EvalError> {
        let n = self.mutations.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{} [m{}]", parent, n))
    }

    async fn crossover(&self, parent_a: &str, parent_b: &str, _feedback: &str) -> Result<String, EvalError> {
        let n = self.crossovers.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{} + {} [x{}]", parent_a, parent_b, n))
    }
}

/// Generator whose every call fails permanently.
#[derive(Debug, Default)]
pub struct FailingGenerator;

#[async_trait]
impl CandidateGenerator for FailingGenerator {
    async fn generate_variations(&self, _seed: &str, _count: usize) -> Result<Vec<String>, EvalError> {
        Err(CapabilityError::Request("generator offline".into()).into())
    }

    async fn mutate(&self, _parent: &str, _feedback: &str) -> Result<String, EvalError> {
        Err(CapabilityError::Request("generator offline".into()).into())
    }

    async fn crossover(&self, _parent_a: &str, _parent_b: &str, _feedback: &str) -> Result<String, EvalError> {
        Err(CapabilityError::Request("generator offline".into()).into())
    }
}
