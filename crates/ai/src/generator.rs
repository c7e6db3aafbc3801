//! Candidate generator adapter: variations, mutations and crossovers.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

use metaevo_core::RetryConfig;

use crate::capability::{GenerateRequest, GenerationCapability};
use crate::error::EvalError;
use crate::retry::generate_with_retry;
use crate::structured::parse_json_reply;
use crate::templates::{
    crossover_prompt, metaprompt_schema, mutation_prompt, string_array_schema, variation_prompt,
};

/// Produces new metaprompt texts.
///
/// Callers substitute a deterministic fallback text on `Err`.
#[async_trait]
pub trait CandidateGenerator: Send + Sync {
    /// Up to `count` alternative phrasings of `seed`.
    async fn generate_variations(&self, seed: &str, count: usize) -> Result<Vec<String>, EvalError>;

    /// An improved rewrite of `parent` guided by `feedback`.
    async fn mutate(&self, parent: &str, feedback: &str) -> Result<String, EvalError>;

    /// A combination of two parents guided by `feedback`.
    async fn crossover(&self, parent_a: &str, parent_b: &str, feedback: &str) -> Result<String, EvalError>;
}

#[derive(Deserialize)]
struct MetapromptReply {
    metaprompt: String,
}

/// Generator backed by a schema-constrained generation capability.
pub struct LlmCandidateGenerator {
    capability: Arc<dyn GenerationCapability>,
    retry: RetryConfig,
    model: Option<String>,
}

impl LlmCandidateGenerator {
    /// Create a generator.
    pub fn new(capability: Arc<dyn GenerationCapability>, retry: RetryConfig) -> Self {
        Self {
            capability,
            retry,
            model: None,
        }
    }

    /// Use a specific model instead of the backend default.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    async fn ask_metaprompt(&self, contents: String) -> Result<String, EvalError> {
        let request = GenerateRequest::new(contents)
            .with_schema(metaprompt_schema())
            .with_model(self.model.clone());
        let reply = generate_with_retry(self.capability.as_ref(), &request, &self.retry).await?;
        let parsed: MetapromptReply = parse_json_reply(&reply)?;
        let text = parsed.metaprompt.trim();
        if text.is_empty() {
            return Err(EvalError::Parse("empty metaprompt".to_string()));
        }
        Ok(text.to_string())
    }
}

#[async_trait]
impl CandidateGenerator for LlmCandidateGenerator {
    async fn generate_variations(&self, seed: &str, count: usize) -> Result<Vec<String>, EvalError> {
        if count == 0 {
            return Ok(Vec::new());
        }
        if seed.trim().is_empty() {
            return Err(EvalError::InvalidInput("seed is empty".to_string()));
        }

        let request = GenerateRequest::new(variation_prompt(seed, count))
            .with_schema(string_array_schema())
            .with_model(self.model.clone());
        let reply = generate_with_retry(self.capability.as_ref(), &request, &self.retry).await?;
        let variations: Vec<String> = parse_json_reply(&reply)?;

        let mut cleaned: Vec<String> = variations
            .into_iter()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .collect();
        cleaned.truncate(count);
        debug!("Generated {}/{} variations", cleaned.len(), count);
        Ok(cleaned)
    }

    async fn mutate(&self, parent: &str, feedback: &str) -> Result<String, EvalError> {
        self.ask_metaprompt(mutation_prompt(parent, feedback)).await
    }

    async fn crossover(&self, parent_a: &str, parent_b: &str, feedback: &str) -> Result<String, EvalError> {
        self.ask_metaprompt(crossover_prompt(parent_a, parent_b, feedback)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CapabilityError;
    use crate::testing::FnGeneration;

    #[tokio::test]
    async fn test_variations_are_trimmed_and_capped() {
        let capability = FnGeneration::new(|_req: &GenerateRequest| {
            Ok(r#"[" one ", "", "two", "three"]"#.to_string())
        });
        let generator = LlmCandidateGenerator::new(Arc::new(capability), RetryConfig::default());

        let variations = generator.generate_variations("seed", 2).await.unwrap();
        assert_eq!(variations, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_zero_variations_makes_no_call() {
        let capability = FnGeneration::new(|_req: &GenerateRequest| {
            Err(CapabilityError::Request("should not be called".into()))
        });
        let generator = LlmCandidateGenerator::new(Arc::new(capability), RetryConfig::default());
        assert!(generator.generate_variations("seed", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutate_uses_feedback_and_schema() {
        let capability = FnGeneration::new(|req: &GenerateRequest| {
            assert!(req.contents.contains("too vague"));
            assert!(req.response_schema.is_some());
            Ok(r#"{"metaprompt": "Describe camera motion explicitly."}"#.to_string())
        });
        let generator = LlmCandidateGenerator::new(Arc::new(capability), RetryConfig::default());

        let child = generator.mutate("Rewrite it.", "too vague").await.unwrap();
        assert_eq!(child, "Describe camera motion explicitly.");
    }

    #[tokio::test]
    async fn test_crossover_permanent_failure_is_error() {
        let capability = FnGeneration::new(|_req: &GenerateRequest| {
            Err(CapabilityError::Status { status: 400, body: "bad".into() })
        });
        let generator = LlmCandidateGenerator::new(Arc::new(capability.clone()), RetryConfig::default());

        let err = generator.crossover("a", "b", "").await.unwrap_err();
        assert!(matches!(err, EvalError::Capability(CapabilityError::Status { status: 400, .. })));
        assert_eq!(capability.calls(), 1);
    }

    #[tokio::test]
    async fn test_blank_metaprompt_is_parse_error() {
        let capability = FnGeneration::new(|_req: &GenerateRequest| Ok(r#"{"metaprompt": "  "}"#.to_string()));
        let generator = LlmCandidateGenerator::new(Arc::new(capability), RetryConfig::default());
        assert!(matches!(generator.mutate("a", "").await, Err(EvalError::Parse(_))));
    }
}
