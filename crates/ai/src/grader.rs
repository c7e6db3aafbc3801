//! Pointwise evaluation backed by a grading model.

use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use metaevo_core::RetryConfig;

use crate::capability::{
    BatchEvaluation, EvalRow, EvaluationCapability, GenerateRequest, GenerationCapability, ItemScore,
    PointwiseMetric,
};
use crate::error::CapabilityError;
use crate::retry::generate_with_retry;
use crate::structured::parse_json_reply;
use crate::templates::grade_schema;

/// Evaluates rows by asking a grading model for `{score, explanation}`.
pub struct ModelGradedEvaluator {
    generator: Arc<dyn GenerationCapability>,
    model: Option<String>,
    retry: RetryConfig,
}

#[derive(Deserialize)]
struct Grade {
    score: f64,
    #[serde(default)]
    explanation: String,
}

impl ModelGradedEvaluator {
    /// Create an evaluator using `generator` as the grader.
    pub fn new(generator: Arc<dyn GenerationCapability>, retry: RetryConfig) -> Self {
        Self {
            generator,
            model: None,
            retry,
        }
    }

    /// Grade with a specific model instead of the backend default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    async fn grade_once(&self, row: &EvalRow, metric: &PointwiseMetric) -> Result<Grade, String> {
        let mut request = GenerateRequest::new(format!(
            "{}\n\nReturn JSON with a numeric \"score\" from the rubric and a short \"explanation\".",
            metric.render(row)
        ))
        .with_schema(grade_schema())
        .with_model(self.model.clone());
        if let Some(image) = &row.image_ref {
            request = request.with_image(image.clone());
        }

        let reply = generate_with_retry(self.generator.as_ref(), &request, &self.retry)
            .await
            .map_err(|e| e.to_string())?;
        let grade: Grade = parse_json_reply(&reply).map_err(|e| e.to_string())?;
        if !grade.score.is_finite() {
            return Err(format!("non-finite score {}", grade.score));
        }
        Ok(grade)
    }

    async fn grade_row(&self, row: &EvalRow, metric: &PointwiseMetric, sampling_count: u32) -> ItemScore {
        let mut scores = Vec::new();
        let mut explanations = Vec::new();
        let mut last_error = None;

        for _ in 0..sampling_count {
            match self.grade_once(row, metric).await {
                Ok(grade) => {
                    scores.push(grade.score);
                    explanations.push(grade.explanation);
                }
                Err(e) => {
                    debug!("{} grading sample failed: {}", metric.name, e);
                    last_error = Some(e);
                }
            }
        }

        if scores.is_empty() {
            return ItemScore {
                score: None,
                explanation: format!(
                    "Grading failed: {}",
                    last_error.unwrap_or_else(|| "no samples".to_string())
                ),
            };
        }

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        ItemScore {
            score: Some(mean),
            explanation: explanations
                .into_iter()
                .find(|e| !e.trim().is_empty())
                .unwrap_or_default(),
        }
    }
}

#[async_trait]
impl EvaluationCapability for ModelGradedEvaluator {
    async fn evaluate_pointwise_batch(
        &self,
        dataset: &[EvalRow],
        metric: &PointwiseMetric,
        sampling_count: u32,
    ) -> Result<BatchEvaluation, CapabilityError> {
        if dataset.is_empty() {
            return Err(CapabilityError::Malformed("empty evaluation dataset".to_string()));
        }
        let samples = sampling_count.max(1);

        let rows: Vec<ItemScore> = join_all(
            dataset.iter().map(|row| self.grade_row(row, metric, samples)),
        )
        .await;

        let scored: Vec<f64> = rows.iter().filter_map(|r| r.score).collect();
        if scored.is_empty() {
            warn!("No row of {} could be scored", metric.name);
            return Err(CapabilityError::Malformed(format!(
                "no row could be scored for {}: {}",
                metric.name,
                rows.first().map(|r| r.explanation.as_str()).unwrap_or_default()
            )));
        }

        let (mean, std) = mean_std(&scored);
        let mut summary = BTreeMap::new();
        summary.insert(metric.mean_key(), mean);
        summary.insert(metric.std_key(), std);

        Ok(BatchEvaluation { summary, rows })
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
