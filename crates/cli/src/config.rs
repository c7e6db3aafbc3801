//! Application configuration file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use metaevo_ai::gemini::DEFAULT_ENDPOINT;
use metaevo_ai::templates::{AUGMENTED_EFFECTIVENESS, INSTRUCTIONAL_QUALITY, INTENT_PRESERVATION};
use metaevo_ai::{MetricSet, PointwiseMetric};
use metaevo_core::OptimizerConfig;

/// Top-level config file: `{ optimizer, model, templates }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Evolution parameters
    #[serde(default)]
    pub optimizer: OptimizerConfig,

    /// Backend model settings
    #[serde(default)]
    pub model: ModelConfig,

    /// Metric template overrides
    #[serde(default)]
    pub templates: TemplateConfig,
}

/// Backend model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// API base URL
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Model used for variations, mutation, crossover and rewrites
    #[serde(default = "default_generation_model")]
    pub generation_model: String,

    /// Model used for grading and tie arbitration (generation model if unset)
    #[serde(default)]
    pub judge_model: Option<String>,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Per-request HTTP timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_generation_model() -> String {
    "gemini-2.0-flash".to_string()
}

fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
    120
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            generation_model: default_generation_model(),
            judge_model: None,
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl ModelConfig {
    /// Read the API key from the configured environment variable.
    pub fn api_key(&self) -> Result<String> {
        std::env::var(&self.api_key_env)
            .with_context(|| format!("environment variable {} is not set", self.api_key_env))
    }
}

/// Optional metric template overrides, one file per metric.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplateConfig {
    /// Instructional quality rubric file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructional_quality: Option<PathBuf>,

    /// Augmented prompt effectiveness rubric file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub augmented_effectiveness: Option<PathBuf>,

    /// Intent preservation rubric file
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent_preservation: Option<PathBuf>,
}

impl TemplateConfig {
    /// Built-in templates with any configured overrides applied.
    pub fn load(&self) -> Result<MetricSet> {
        let mut metrics = MetricSet::default();
        for (name, path, slot) in [
            (INSTRUCTIONAL_QUALITY, &self.instructional_quality, &mut metrics.instructional_quality),
            (AUGMENTED_EFFECTIVENESS, &self.augmented_effectiveness, &mut metrics.augmented_effectiveness),
            (INTENT_PRESERVATION, &self.intent_preservation, &mut metrics.intent_preservation),
        ] {
            if let Some(path) = path {
                let template = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read {} template {}", name, path.display()))?;
                *slot = PointwiseMetric::new(name, template);
            }
        }
        Ok(metrics)
    }
}

impl AppConfig {
    /// Load and validate a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: Self = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.optimizer.validate().context("invalid optimizer config")?;
        Ok(config)
    }
}
