//! Fitness oracle adapter.
//!
//! Scores one metaprompt along three dimensions:
//!
//! ```text
//! instructional_quality    1 evaluation call over the metaprompt itself
//! rewrite                  1 generation call rewriting every base prompt
//! augmented_effectiveness  1 batch evaluation over the rewrites
//! intent_preservation      1 batch evaluation over the rewrites
//! ```
//!
//! Backend failures never surface as errors: the affected dimension scores
//! zero and its explanation records the failure.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use metaevo_core::{AugmentedPrompt, BasePromptSet, Explanations, RetryConfig, SubScores};

use crate::capability::{
    EvalRow, EvaluationCapability, GenerateRequest, GenerationCapability, PointwiseMetric,
};
use crate::error::EvalError;
use crate::retry::{generate_with_retry, with_backoff};
use crate::structured::parse_json_reply;
use crate::templates::{rewrite_prompt, string_array_schema, MetricSet};

/// Everything the oracle learned about one candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleScore {
    /// Raw sub-scores
    pub sub_scores: SubScores,
    /// Grader feedback per dimension
    pub explanations: Explanations,
    /// One rewrite per base prompt
    pub augmented_prompts: Vec<AugmentedPrompt>,
}

/// External scoring of a candidate metaprompt.
#[async_trait]
pub trait FitnessOracle: Send + Sync {
    /// Score `candidate_text` against the workload.
    ///
    /// Returns `Err` only when the inputs are unusable.
    async fn score(&self, candidate_text: &str, base_prompts: &BasePromptSet) -> Result<OracleScore, EvalError>;
}

/// Oracle built from a generation backend and an evaluation backend.
pub struct ScoringOracle {
    generator: Arc<dyn GenerationCapability>,
    evaluator: Arc<dyn EvaluationCapability>,
    metrics: MetricSet,
    sampling_count: u32,
    retry: RetryConfig,
    rewrite_model: Option<String>,
}

impl ScoringOracle {
    /// Create an oracle with the default metric templates.
    pub fn new(
        generator: Arc<dyn GenerationCapability>,
        evaluator: Arc<dyn EvaluationCapability>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            generator,
            evaluator,
            metrics: MetricSet::default(),
            sampling_count: 1,
            retry,
            rewrite_model: None,
        }
    }

    /// Replace the metric templates.
    pub fn with_metrics(mut self, metrics: MetricSet) -> Self {
        self.metrics = metrics;
        self
    }

    /// Grader samples per row.
    pub fn with_sampling_count(mut self, sampling_count: u32) -> Self {
        self.sampling_count = sampling_count.max(1);
        self
    }

    /// Model used to produce the rewrites.
    pub fn with_rewrite_model(mut self, model: Option<String>) -> Self {
        self.rewrite_model = model;
        self
    }

    async fn evaluate_dimension(&self, rows: &[EvalRow], metric: &PointwiseMetric) -> (f64, String) {
        let result = with_backoff(&self.retry, &metric.name, move || {
            self.evaluator
                .evaluate_pointwise_batch(rows, metric, self.sampling_count)
        })
        .await;

        match result {
            Ok(batch) => match batch.mean(metric) {
                Some(mean) if mean.is_finite() => (mean, batch.joined_explanations()),
                _ => (0.0, format!("Evaluation failed: no {} in summary", metric.mean_key())),
            },
            Err(e) => {
                warn!("{} evaluation failed: {}", metric.name, e);
                (0.0, format!("Evaluation failed: {}", e))
            }
        }
    }

    async fn rewrite(&self, candidate_text: &str, base_prompts: &BasePromptSet) -> Result<Vec<AugmentedPrompt>, EvalError> {
        let mut request = GenerateRequest::new(rewrite_prompt(candidate_text, base_prompts.as_slice()))
            .with_schema(string_array_schema())
            .with_model(self.rewrite_model.clone());
        for image in base_prompts.iter().filter_map(|p| p.image_ref.clone()) {
            request = request.with_image(image);
        }

        let reply = generate_with_retry(self.generator.as_ref(), &request, &self.retry).await?;
        let rewrites: Vec<String> = parse_json_reply(&reply)?;
        if rewrites.len() != base_prompts.len() {
            return Err(EvalError::Parse(format!(
                "expected {} rewrites, got {}",
                base_prompts.len(),
                rewrites.len()
            )));
        }

        Ok(base_prompts
            .iter()
            .zip(rewrites)
            .map(|(base, augmented)| AugmentedPrompt {
                original_prompt: base.prompt.clone(),
                augmented_prompt: augmented,
                image_ref: base.image_ref.clone(),
            })
            .collect())
    }
}

#[async_trait]
impl FitnessOracle for ScoringOracle {
    async fn score(&self, candidate_text: &str, base_prompts: &BasePromptSet) -> Result<OracleScore, EvalError> {
        if candidate_text.trim().is_empty() {
            return Err(EvalError::InvalidInput("candidate text is empty".to_string()));
        }
        if base_prompts.is_empty() {
            return Err(EvalError::InvalidInput("base prompt set is empty".to_string()));
        }

        let instruction_rows = [EvalRow {
            prompt: candidate_text.to_string(),
            response: candidate_text.to_string(),
            image_ref: None,
        }];

        let (instructional, rewrites) = tokio::join!(
            self.evaluate_dimension(&instruction_rows, &self.metrics.instructional_quality),
            self.rewrite(candidate_text, base_prompts),
        );

        let mut sub_scores = SubScores {
            instructional_quality: instructional.0,
            ..Default::default()
        };
        let mut explanations = Explanations {
            instructional_quality: instructional.1,
            ..Default::default()
        };

        let augmented_prompts = match rewrites {
            Ok(augmented) => {
                let rows: Vec<EvalRow> = augmented
                    .iter()
                    .map(|a| EvalRow {
                        prompt: a.original_prompt.clone(),
                        response: a.augmented_prompt.clone(),
                        image_ref: a.image_ref.clone(),
                    })
                    .collect();

                let (effectiveness, intent) = tokio::join!(
                    self.evaluate_dimension(&rows, &self.metrics.augmented_effectiveness),
                    self.evaluate_dimension(&rows, &self.metrics.intent_preservation),
                );
                sub_scores.augmented_effectiveness = effectiveness.0;
                explanations.augmented_effectiveness = effectiveness.1;
                sub_scores.intent_preservation = intent.0;
                explanations.intent_preservation = intent.1;
                augmented
            }
            Err(e) => {
                warn!("Rewrite generation failed: {}", e);
                let reason = format!("Rewrite generation failed: {}", e);
                explanations.augmented_effectiveness = reason.clone();
                explanations.intent_preservation = reason;
                Vec::new()
            }
        };

        debug!(
            "Scored candidate: instructional={:.3} effectiveness={:.3} intent={:.3}",
            sub_scores.instructional_quality, sub_scores.augmented_effectiveness, sub_scores.intent_preservation
        );

        Ok(OracleScore {
            sub_scores,
            explanations,
            augmented_prompts,
        })
    }
}
