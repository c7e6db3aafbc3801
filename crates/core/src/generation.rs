//! Generation records and the run audit trail.

use serde::{Deserialize, Serialize};
use crate::candidate::Candidate;
use crate::id::{CandidateId, RunId};
use crate::Time;

/// One completed loop iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    /// Zero-based generation index
    pub index: usize,

    /// Successfully evaluated candidates
    pub candidates: Vec<Candidate>,

    /// Selected parents, best first unless a judge ordered them otherwise
    pub parents: Vec<Candidate>,

    /// The single best parent (always one of `parents`)
    pub best_parent: Candidate,

    /// Details of tie arbitration, if it happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_break: Option<TieBreakRecord>,

    /// Candidates dropped because evaluation failed
    #[serde(default)]
    pub evaluation_failures: Vec<EvaluationFailure>,

    /// When evaluation started
    pub started_at: Time,

    /// When the record was sealed
    pub finished_at: Time,
}

impl Generation {
    /// Best combined score in this generation.
    pub fn best_score(&self) -> Option<f64> {
        self.best_parent.combined_score()
    }

    /// Judge reasoning when a tie was arbitrated.
    pub fn judge_reasoning(&self) -> Option<&str> {
        self.tie_break.as_ref().and_then(|t| t.reasoning.as_deref())
    }

    /// Mean combined score of the evaluated candidates.
    pub fn mean_score(&self) -> Option<f64> {
        let scores: Vec<f64> = self.candidates.iter().filter_map(|c| c.combined_score()).collect();
        if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        }
    }
}

/// A candidate that could not be scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    /// The dropped candidate, unscored
    pub candidate: Candidate,
    /// Error text
    pub reason: String,
}

/// How a tie was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreakMethod {
    /// Judge model ranked the contenders
    Judge,
    /// Uniform random choice among contenders
    Random,
}

/// Audit record for a tie arbitration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TieBreakRecord {
    /// Who decided
    pub method: TieBreakMethod,
    /// Candidates at or above the cutoff score
    pub contenders: Vec<CandidateId>,
    /// Judge justification, absent for random picks
    pub reasoning: Option<String>,
}

/// Append-only ordered list of generations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunHistory {
    generations: Vec<Generation>,
}

impl RunHistory {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a generation.
    pub fn push(&mut self, generation: Generation) {
        self.generations.push(generation);
    }

    /// Number of generations recorded.
    pub fn len(&self) -> usize {
        self.generations.len()
    }

    /// Whether nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.generations.is_empty()
    }

    /// Most recent generation.
    pub fn last(&self) -> Option<&Generation> {
        self.generations.last()
    }

    /// Iterate in order.
    pub fn iter(&self) -> std::slice::Iter<'_, Generation> {
        self.generations.iter()
    }

    /// Borrow as a slice.
    pub fn as_slice(&self) -> &[Generation] {
        &self.generations
    }
}

/// Terminal state of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every configured generation ran
    Completed,
    /// A fatal error stopped the loop early
    Aborted {
        /// What stopped the loop
        reason: String,
    },
}

/// Final output of an optimization run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier
    pub run_id: RunId,
    /// How the run ended
    pub status: RunStatus,
    /// Best parent of the last completed generation
    pub best: Option<Candidate>,
    /// Every completed generation
    pub history: RunHistory,
    /// Run start
    pub started_at: Time,
    /// Run end
    pub finished_at: Time,
}

impl RunReport {
    /// The winning metaprompt text, if any generation completed.
    pub fn best_metaprompt(&self) -> Option<&str> {
        self.best.as_ref().map(|c| c.metaprompt.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{Explanations, Fitness, Provenance, SubScores};

    fn scored(text: &str, score: f64) -> Candidate {
        Candidate::new(text, Provenance::InitialBase, 0).with_evaluation(
            Fitness {
                sub_scores: SubScores::default(),
                combined_score: score,
                explanations: Explanations::default(),
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_history_is_ordered() {
        let mut history = RunHistory::new();
        for index in 0..3 {
            let best = scored("x", index as f64);
            history.push(Generation {
                index,
                candidates: vec![best.clone()],
                parents: vec![best.clone()],
                best_parent: best,
                tie_break: None,
                evaluation_failures: Vec::new(),
                started_at: chrono::Utc::now(),
                finished_at: chrono::Utc::now(),
            });
        }
        let indices: Vec<usize> = history.iter().map(|g| g.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(history.last().and_then(|g| g.best_score()), Some(2.0));
    }

    #[test]
    fn test_mean_score() {
        let a = scored("a", 1.0);
        let b = scored("b", 3.0);
        let generation = Generation {
            index: 0,
            candidates: vec![a.clone(), b],
            parents: vec![a.clone()],
            best_parent: a,
            tie_break: None,
            evaluation_failures: Vec::new(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        };
        assert_eq!(generation.mean_score(), Some(2.0));
    }

    #[test]
    fn test_judge_reasoning_reads_tie_break() {
        let a = scored("a", 2.0);
        let b = scored("b", 2.0);
        let mut generation = Generation {
            index: 0,
            candidates: vec![a.clone(), b.clone()],
            parents: vec![a.clone()],
            best_parent: a.clone(),
            tie_break: None,
            evaluation_failures: Vec::new(),
            started_at: chrono::Utc::now(),
            finished_at: chrono::Utc::now(),
        };
        assert_eq!(generation.judge_reasoning(), None);

        generation.tie_break = Some(TieBreakRecord {
            method: TieBreakMethod::Judge,
            contenders: vec![a.id, b.id],
            reasoning: Some("tighter shot list".to_string()),
        });
        assert_eq!(generation.judge_reasoning(), Some("tighter shot list"));

        let json = serde_json::to_value(&generation).unwrap();
        assert!(json.get("judge_reasoning").is_none());
        assert_eq!(json["tie_break"]["reasoning"], "tighter shot list");
    }
}
