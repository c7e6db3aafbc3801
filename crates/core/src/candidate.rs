//! Candidate model - one metaprompt under evaluation.

use serde::{Deserialize, Serialize};
use crate::id::CandidateId;
use crate::Time;

/// A metaprompt candidate in the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique identifier
    pub id: CandidateId,

    /// The instruction text under evaluation
    pub metaprompt: String,

    /// How this candidate came to exist
    pub provenance: Provenance,

    /// Generation the candidate was created for
    pub generation: usize,

    /// Whether the text is a deterministic fallback for a failed generation call
    #[serde(default)]
    pub fallback: bool,

    /// Scores attached by the fitness evaluator (None until evaluated)
    pub fitness: Option<Fitness>,

    /// Rewrites of the base prompts produced with this metaprompt
    #[serde(default)]
    pub augmented_prompts: Vec<AugmentedPrompt>,

    /// When created
    pub created_at: Time,
}

impl Candidate {
    /// Create a new, unevaluated candidate.
    pub fn new(metaprompt: impl Into<String>, provenance: Provenance, generation: usize) -> Self {
        Self {
            id: CandidateId::new(),
            metaprompt: metaprompt.into(),
            provenance,
            generation,
            fallback: false,
            fitness: None,
            augmented_prompts: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// Mark the candidate text as a fallback substitution.
    pub fn with_fallback(mut self, fallback: bool) -> Self {
        self.fallback = fallback;
        self
    }

    /// Copy this candidate forward unchanged as an elite of `generation`.
    pub fn elite_copy(&self, generation: usize) -> Self {
        Self::new(
            self.metaprompt.clone(),
            Provenance::Elitism { source: self.id },
            generation,
        )
        .with_fallback(self.fallback)
    }

    /// Attach evaluation results.
    pub fn with_evaluation(mut self, fitness: Fitness, augmented_prompts: Vec<AugmentedPrompt>) -> Self {
        self.fitness = Some(fitness);
        self.augmented_prompts = augmented_prompts;
        self
    }

    /// Combined score, or None if not yet evaluated.
    pub fn combined_score(&self) -> Option<f64> {
        self.fitness.as_ref().map(|f| f.combined_score)
    }

    /// Whether scores have been attached.
    pub fn is_evaluated(&self) -> bool {
        self.fitness.is_some()
    }
}

/// Origin of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// The seed instruction itself
    InitialBase,
    /// A generated variation of the seed
    InitialVariation,
    /// Unmodified copy of a parent
    Elitism {
        /// Parent the text was copied from
        source: CandidateId,
    },
    /// Rewrite of one parent
    Mutation {
        /// Parent that was rewritten
        parent: CandidateId,
    },
    /// Recombination of two parents
    Crossover {
        /// First parent
        parent_a: CandidateId,
        /// Second parent
        parent_b: CandidateId,
    },
}

impl Provenance {
    /// Parents referenced by this provenance.
    pub fn parents(&self) -> Vec<CandidateId> {
        match self {
            Self::InitialBase | Self::InitialVariation => Vec::new(),
            Self::Elitism { source } => vec![*source],
            Self::Mutation { parent } => vec![*parent],
            Self::Crossover { parent_a, parent_b } => vec![*parent_a, *parent_b],
        }
    }

    /// Whether the candidate belongs to the initial population.
    pub fn is_initial(&self) -> bool {
        matches!(self, Self::InitialBase | Self::InitialVariation)
    }

    /// Short label for logs and reports.
    pub fn label(&self) -> &'static str {
        match self {
            Self::InitialBase => "base",
            Self::InitialVariation => "variation",
            Self::Elitism { .. } => "elitism",
            Self::Mutation { .. } => "mutation",
            Self::Crossover { .. } => "crossover",
        }
    }
}

/// The three quality dimensions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    /// How clear and actionable the metaprompt is as an instruction
    pub instructional_quality: f64,
    /// How good the rewrites it produces are as video prompts
    pub augmented_effectiveness: f64,
    /// How faithfully the rewrites keep the user's intent
    pub intent_preservation: f64,
}

/// Per-dimension explanation text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Explanations {
    /// Grader feedback on the instruction itself
    pub instructional_quality: String,
    /// Grader feedback on the rewrites
    pub augmented_effectiveness: String,
    /// Grader feedback on intent drift
    pub intent_preservation: String,
}

impl Explanations {
    /// Render as feedback for mutation/crossover prompts.
    pub fn as_feedback(&self) -> String {
        format!(
            "Instructional quality: {}\nAugmented prompt effectiveness: {}\nIntent preservation: {}",
            non_empty(&self.instructional_quality),
            non_empty(&self.augmented_effectiveness),
            non_empty(&self.intent_preservation),
        )
    }
}

fn non_empty(s: &str) -> &str {
    if s.trim().is_empty() { "(no feedback)" } else { s }
}

/// Evaluation result attached to a candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fitness {
    /// Raw dimension scores
    pub sub_scores: SubScores,
    /// Weighted aggregate used for ranking
    pub combined_score: f64,
    /// Why each dimension scored as it did
    pub explanations: Explanations,
}

/// One rewrite of a base prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentedPrompt {
    /// Base prompt as given
    pub original_prompt: String,
    /// Rewrite produced by the metaprompt
    pub augmented_prompt: String,
    /// Reference image carried over from the base prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_ref: Option<String>,
}
