//! Prompt and metric templates.
//!
//! Metric templates are opaque to the optimizer: they are rendered with
//! `{prompt}` and `{response}` and handed to the evaluation capability.

use serde::{Deserialize, Serialize};
use serde_json::json;

use metaevo_core::BasePrompt;

use crate::capability::PointwiseMetric;

/// Metric name for the instruction itself.
pub const INSTRUCTIONAL_QUALITY: &str = "instructional_quality";
/// Metric name for the rewrites as video prompts.
pub const AUGMENTED_EFFECTIVENESS: &str = "augmented_effectiveness";
/// Metric name for faithfulness of the rewrites.
pub const INTENT_PRESERVATION: &str = "intent_preservation";

const INSTRUCTIONAL_QUALITY_TEMPLATE: &str = r#"You are an expert in prompt engineering for generative video models.
Evaluate the following metaprompt: an instruction that tells a language model how to rewrite a short user query into a detailed video generation prompt.

Criteria:
- Clarity: the instruction is unambiguous and easy to follow.
- Coverage: it asks for subject, action, setting, camera work, lighting and style.
- Constraint handling: it tells the model to keep the user's intent and avoid inventing conflicting content.
- Output discipline: it specifies the shape of the output.

Rubric:
5: excellent on every criterion
4: good, with minor gaps
3: adequate, with noticeable gaps
2: weak, several criteria missing
1: unusable

Metaprompt:
{response}"#;

const AUGMENTED_EFFECTIVENESS_TEMPLATE: &str = r#"You are an expert in writing prompts for generative video models.
A short user query was rewritten into a detailed video prompt. Evaluate how well the rewritten prompt would drive a high-quality video.

Criteria:
- Visual specificity: concrete subject, action, environment and composition.
- Cinematography: camera movement, framing, lighting and mood are described.
- Coherence: the description is internally consistent and renderable in a short clip.

Rubric:
5: a professional, production-ready video prompt
4: strong, with minor omissions
3: usable but generic
2: vague or partly incoherent
1: not a usable video prompt

User query:
{prompt}

Rewritten prompt:
{response}"#;

const INTENT_PRESERVATION_TEMPLATE: &str = r#"You are evaluating whether a rewritten video prompt preserves the intent of the original user query.

Criteria:
- Every subject and action in the query is still present.
- Nothing added contradicts or overrides the query.
- Added detail serves the query instead of replacing it.

Rubric:
5: intent fully preserved
4: preserved with negligible drift
3: mostly preserved, some drift
2: significant drift
1: intent lost

User query:
{prompt}

Rewritten prompt:
{response}"#;

/// The three metric templates used by the fitness oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSet {
    /// Judges the metaprompt text on its own
    pub instructional_quality: PointwiseMetric,
    /// Judges each rewritten prompt
    pub augmented_effectiveness: PointwiseMetric,
    /// Judges whether each rewrite kept the original intent
    pub intent_preservation: PointwiseMetric,
}

impl Default for MetricSet {
    fn default() -> Self {
        Self {
            instructional_quality: PointwiseMetric::new(INSTRUCTIONAL_QUALITY, INSTRUCTIONAL_QUALITY_TEMPLATE),
            augmented_effectiveness: PointwiseMetric::new(AUGMENTED_EFFECTIVENESS, AUGMENTED_EFFECTIVENESS_TEMPLATE),
            intent_preservation: PointwiseMetric::new(INTENT_PRESERVATION, INTENT_PRESERVATION_TEMPLATE),
        }
    }
}

/// Schema: array of strings.
pub fn string_array_schema() -> serde_json::Value {
    json!({
        "type": "ARRAY",
        "items": { "type": "STRING" }
    })
}

/// Schema: `{ "metaprompt": string }`.
pub fn metaprompt_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": { "metaprompt": { "type": "STRING" } },
        "required": ["metaprompt"]
    })
}

/// Schema: `{ "score": number, "explanation": string }`.
pub fn grade_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "score": { "type": "NUMBER" },
            "explanation": { "type": "STRING" }
        },
        "required": ["score", "explanation"]
    })
}

/// Schema: `{ "ranking": [int], "best": int, "reasoning": string }`.
pub fn judge_schema() -> serde_json::Value {
    json!({
        "type": "OBJECT",
        "properties": {
            "ranking": { "type": "ARRAY", "items": { "type": "INTEGER" } },
            "best": { "type": "INTEGER" },
            "reasoning": { "type": "STRING" }
        },
        "required": ["ranking", "best", "reasoning"]
    })
}

/// Ask for `count` alternative phrasings of the seed instruction.
pub fn variation_prompt(seed: &str, count: usize) -> String {
    format!(
        "You are improving a metaprompt: an instruction that tells a language model how to rewrite a short \
user query into a detailed prompt for a generative video model.\n\n\
Write {count} distinct variations of the metaprompt below. Each variation must keep the same goal but \
explore a different emphasis (camera language, lighting, pacing, structure, level of detail). \
Return a JSON array of {count} strings.\n\n\
Metaprompt:\n{seed}"
    )
}

/// Ask for an improved version of one parent using its evaluation feedback.
pub fn mutation_prompt(parent: &str, feedback: &str) -> String {
    format!(
        "You are improving a metaprompt for rewriting short user queries into detailed video generation prompts.\n\n\
Current metaprompt:\n{parent}\n\n\
Evaluation feedback:\n{feedback}\n\n\
Rewrite the metaprompt to address the feedback. Make a meaningful change, keep what already works, \
and return JSON of the form {{\"metaprompt\": \"...\"}}."
    )
}

/// Ask for a combination of two parents.
pub fn crossover_prompt(parent_a: &str, parent_b: &str, feedback: &str) -> String {
    format!(
        "You are combining two metaprompts for rewriting short user queries into detailed video generation prompts.\n\n\
Metaprompt A:\n{parent_a}\n\n\
Metaprompt B:\n{parent_b}\n\n\
Evaluation feedback:\n{feedback}\n\n\
Write one new metaprompt that merges the strongest elements of both and addresses the feedback. \
Return JSON of the form {{\"metaprompt\": \"...\"}}."
    )
}

/// Ask the candidate metaprompt to rewrite every base prompt in one call.
pub fn rewrite_prompt(metaprompt: &str, base_prompts: &[BasePrompt]) -> String {
    let mut listing = String::new();
    let mut image_no = 0;
    for (i, p) in base_prompts.iter().enumerate() {
        listing.push_str(&format!("{}. {}", i + 1, p.prompt));
        if p.image_ref.is_some() {
            image_no += 1;
            listing.push_str(&format!(" (see attached reference image #{})", image_no));
        }
        listing.push('\n');
    }
    format!(
        "{metaprompt}\n\n\
Apply the instruction above to each of the following user queries independently. \
Return a JSON array with exactly {n} strings, one rewritten prompt per query, in the same order.\n\n\
Queries:\n{listing}",
        n = base_prompts.len(),
    )
}

/// One contender shown to the judge.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeEntry<'a> {
    /// Contender text
    pub metaprompt: &'a str,
    /// Weighted score
    pub combined_score: f64,
    /// Rendered per-dimension scores
    pub sub_scores: String,
    /// Rendered grader feedback
    pub explanations: String,
}

/// Ask the judge to rank tied contenders and pick a best parent.
pub fn judge_prompt(entries: &[JudgeEntry<'_>], k: usize) -> String {
    let mut listing = String::new();
    for (i, e) in entries.iter().enumerate() {
        listing.push_str(&format!(
            "### Candidate {}\nCombined score: {:.4}\nSub-scores: {}\nFeedback:\n{}\nMetaprompt:\n{}\n\n",
            i + 1,
            e.combined_score,
            e.sub_scores,
            e.explanations,
            e.metaprompt
        ));
    }
    format!(
        "You are judging metaprompts for rewriting short user queries into detailed video generation prompts. \
The candidates below scored within a rounding error of each other, so the scores cannot separate them.\n\n\
{listing}\
Rank the {k} best candidates by number, best first, and choose the single best parent for the next \
generation (it must be in your ranking). Return JSON of the form \
{{\"ranking\": [numbers], \"best\": number, \"reasoning\": \"...\"}}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_metrics_have_placeholders() {
        let metrics = MetricSet::default();
        assert!(metrics.instructional_quality.template.contains("{response}"));
        assert!(metrics.augmented_effectiveness.template.contains("{prompt}"));
        assert!(metrics.intent_preservation.template.contains("{response}"));
        assert_eq!(metrics.intent_preservation.name, INTENT_PRESERVATION);
    }

    #[test]
    fn test_rewrite_prompt_numbers_queries_and_images() {
        let prompts = vec![
            BasePrompt::new("a cat"),
            BasePrompt::new("a dog").with_image("gs://bucket/dog.png"),
        ];
        let text = rewrite_prompt("Make it cinematic.", &prompts);
        assert!(text.starts_with("Make it cinematic."));
        assert!(text.contains("1. a cat\n"));
        assert!(text.contains("2. a dog (see attached reference image #1)"));
        assert!(text.contains("exactly 2 strings"));
    }

    #[test]
    fn test_judge_prompt_labels_from_one() {
        let entries = vec![
            JudgeEntry {
                metaprompt: "first",
                combined_score: 3.5,
                sub_scores: String::new(),
                explanations: String::new(),
            },
            JudgeEntry {
                metaprompt: "second",
                combined_score: 3.5,
                sub_scores: String::new(),
                explanations: String::new(),
            },
        ];
        let text = judge_prompt(&entries, 1);
        assert!(text.contains("### Candidate 1"));
        assert!(text.contains("### Candidate 2"));
        assert!(text.contains("Rank the 1 best"));
    }
}
