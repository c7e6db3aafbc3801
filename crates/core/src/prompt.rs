//! Base prompt workload.

use serde::{Deserialize, Serialize};

/// A short user query that metaprompts are asked to expand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePrompt {
    /// The user query
    pub prompt: String,

    /// Optional reference image (URI) attached to generation calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}

impl BasePrompt {
    /// Create a text-only base prompt.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            image_ref: None,
        }
    }

    /// Attach a reference image.
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

/// Errors in the evaluation workload or seed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkloadError {
    /// No base prompts were supplied
    #[error("base prompt set is empty")]
    Empty,

    /// A base prompt has no text
    #[error("base prompt #{0} is blank")]
    BlankPrompt(usize),

    /// The seed instruction has no text
    #[error("seed instruction is blank")]
    BlankSeed,
}

/// Immutable, non-empty list of base prompts evaluated by every candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BasePromptSet {
    prompts: Vec<BasePrompt>,
}

impl BasePromptSet {
    /// Validate and wrap the prompts.
    pub fn new(prompts: Vec<BasePrompt>) -> Result<Self, WorkloadError> {
        if prompts.is_empty() {
            return Err(WorkloadError::Empty);
        }
        if let Some(idx) = prompts.iter().position(|p| p.prompt.trim().is_empty()) {
            return Err(WorkloadError::BlankPrompt(idx));
        }
        Ok(Self { prompts })
    }

    /// Iterate the prompts in order.
    pub fn iter(&self) -> std::slice::Iter<'_, BasePrompt> {
        self.prompts.iter()
    }

    /// Number of prompts.
    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    /// Always false for a constructed set.
    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[BasePrompt] {
        &self.prompts
    }
}

impl<'de> Deserialize<'de> for BasePromptSet {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let prompts = Vec::<BasePrompt>::deserialize(deserializer)?;
        Self::new(prompts).map_err(serde::de::Error::custom)
    }
}

impl<'a> IntoIterator for &'a BasePromptSet {
    type Item = &'a BasePrompt;
    type IntoIter = std::slice::Iter<'a, BasePrompt>;

    fn into_iter(self) -> Self::IntoIter {
        self.prompts.iter()
    }
}
