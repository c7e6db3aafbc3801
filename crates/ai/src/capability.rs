//! Contracts of the external generation and evaluation capabilities.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::CapabilityError;

/// A single generation call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    /// Prompt text
    pub contents: String,
    /// JSON schema the output must satisfy
    pub response_schema: Option<serde_json::Value>,
    /// Reference images (URIs) attached after the text
    pub image_refs: Vec<String>,
    /// Model override; the backend default is used when None
    pub model: Option<String>,
}

impl GenerateRequest {
    /// Create a plain text request.
    pub fn new(contents: impl Into<String>) -> Self {
        Self {
            contents: contents.into(),
            ..Default::default()
        }
    }

    /// Constrain the output to a JSON schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.response_schema = Some(schema);
        self
    }

    /// Attach a reference image.
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_refs.push(image_ref.into());
        self
    }

    /// Route to a specific model.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

/// Text generation backend.
#[async_trait]
pub trait GenerationCapability: Send + Sync {
    /// Generate text for the request.
    async fn generate(&self, request: &GenerateRequest) -> Result<String, CapabilityError>;
}

/// One row to be scored against a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRow {
    /// The input the response answers
    pub prompt: String,
    /// The text being graded
    pub response: String,
    /// Optional image context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

/// A named, opaque scoring template.
///
/// The template may reference `{prompt}` and `{response}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointwiseMetric {
    /// Key prefix in batch summaries
    pub name: String,
    /// Rubric text sent to the grader
    pub template: String,
}

impl PointwiseMetric {
    /// Create a metric.
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    /// Fill the template for one row.
    pub fn render(&self, row: &EvalRow) -> String {
        self.template
            .replace("{prompt}", &row.prompt)
            .replace("{response}", &row.response)
    }

    /// Summary key of the mean score.
    pub fn mean_key(&self) -> String {
        format!("{}/mean", self.name)
    }

    /// Summary key of the standard deviation.
    pub fn std_key(&self) -> String {
        format!("{}/std", self.name)
    }
}

/// Score of one row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemScore {
    /// None when the row could not be scored
    pub score: Option<f64>,
    /// Grader rationale
    pub explanation: String,
}

/// Output of a batch evaluation: summary metrics plus a per-item table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchEvaluation {
    /// `<metric>/mean` and `<metric>/std`
    pub summary: BTreeMap<String, f64>,
    /// Per-row scores in dataset order
    pub rows: Vec<ItemScore>,
}

impl BatchEvaluation {
    /// Mean score for the metric, if present.
    pub fn mean(&self, metric: &PointwiseMetric) -> Option<f64> {
        self.summary.get(&metric.mean_key()).copied()
    }

    /// Per-item explanations joined with their 1-based row numbers.
    pub fn joined_explanations(&self) -> String {
        if self.rows.len() == 1 {
            return self.rows[0].explanation.clone();
        }
        self.rows
            .iter()
            .enumerate()
            .map(|(i, row)| format!("[{}] {}", i + 1, row.explanation))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Pointwise batch evaluation backend.
#[async_trait]
pub trait EvaluationCapability: Send + Sync {
    /// Score every row against the metric, sampling the grader `sampling_count` times.
    async fn evaluate_pointwise_batch(
        &self,
        dataset: &[EvalRow],
        metric: &PointwiseMetric,
        sampling_count: u32,
    ) -> Result<BatchEvaluation, CapabilityError>;
}
