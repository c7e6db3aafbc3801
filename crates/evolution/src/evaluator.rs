//! Fitness evaluator - concurrent scoring of a population.

use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{Id, JoinSet};
use tracing::{debug, error, info, warn};

use metaevo_ai::{EvalError, FitnessOracle, OracleScore};
use metaevo_core::{BasePromptSet, Candidate, EvaluationFailure, Fitness, FitnessWeights};

/// Result of evaluating one population.
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    /// Scored candidates, in population order
    pub evaluated: Vec<Candidate>,
    /// Candidates dropped from this generation
    pub failures: Vec<EvaluationFailure>,
}

/// Scores candidates on a bounded worker pool.
pub struct FitnessEvaluator {
    oracle: Arc<dyn FitnessOracle>,
    weights: FitnessWeights,
    max_concurrent: usize,
    timeout: Duration,
}

impl FitnessEvaluator {
    /// Create an evaluator.
    pub fn new(
        oracle: Arc<dyn FitnessOracle>,
        weights: FitnessWeights,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            oracle,
            weights,
            max_concurrent: max_concurrent.max(1),
            timeout,
        }
    }

    /// Attach scores to one candidate.
    pub fn apply(&self, candidate: Candidate, score: OracleScore) -> Candidate {
        let fitness = Fitness {
            combined_score: self.weights.combine(&score.sub_scores),
            sub_scores: score.sub_scores,
            explanations: score.explanations,
        };
        candidate.with_evaluation(fitness, score.augmented_prompts)
    }

    /// Score every candidate; failures are dropped and reported.
    ///
    /// Returns once every dispatched task has finished.
    pub async fn evaluate(&self, candidates: Vec<Candidate>, base_prompts: Arc<BasePromptSet>) -> EvaluationOutcome {
        let total = candidates.len();
        let permits = Arc::new(Semaphore::new(self.max_concurrent));
        let mut tasks = JoinSet::new();
        let mut in_flight: HashMap<Id, Candidate> = HashMap::with_capacity(total);

        for (idx, candidate) in candidates.into_iter().enumerate() {
            let pending = candidate.clone();
            let oracle = Arc::clone(&self.oracle);
            let permits = Arc::clone(&permits);
            let base_prompts = Arc::clone(&base_prompts);
            let timeout = self.timeout;

            let handle = tasks.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        let call = AssertUnwindSafe(oracle.score(&candidate.metaprompt, &base_prompts)).catch_unwind();
                        match tokio::time::timeout(timeout, call).await {
                            Ok(Ok(result)) => result,
                            Ok(Err(_panic)) => Err(EvalError::Task("oracle panicked".to_string())),
                            Err(_) => Err(EvalError::Timeout(timeout)),
                        }
                    }
                    Err(e) => Err(EvalError::Task(e.to_string())),
                };
                (idx, candidate, result)
            });
            in_flight.insert(handle.id(), pending);
        }

        let mut slots: Vec<Option<Candidate>> = vec![None; total];
        let mut failures = Vec::new();

        while let Some(joined) = tasks.join_next_with_id().await {
            match joined {
                Ok((id, (idx, candidate, Ok(score)))) => {
                    in_flight.remove(&id);
                    let scored = self.apply(candidate, score);
                    debug!(
                        "Candidate {} scored {:.4}",
                        scored.id,
                        scored.combined_score().unwrap_or_default()
                    );
                    slots[idx] = Some(scored);
                }
                Ok((id, (_, candidate, Err(e)))) => {
                    in_flight.remove(&id);
                    warn!("Dropping candidate {}: evaluation failed: {}", candidate.id, e);
                    failures.push(EvaluationFailure {
                        candidate,
                        reason: e.to_string(),
                    });
                }
                Err(e) => match in_flight.remove(&e.id()) {
                    Some(candidate) => {
                        error!("Evaluation task for candidate {} aborted: {}", candidate.id, e);
                        failures.push(EvaluationFailure {
                            candidate,
                            reason: EvalError::Task(e.to_string()).to_string(),
                        });
                    }
                    None => error!("Evaluation task aborted: {}", e),
                },
            }
        }

        let evaluated: Vec<Candidate> = slots.into_iter().flatten().collect();
        info!("Evaluated {}/{} candidates", evaluated.len(), total);
        EvaluationOutcome { evaluated, failures }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaevo_ai::testing::FnOracle;
    use metaevo_core::{BasePrompt, Provenance, SubScores};
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn prompts() -> Arc<BasePromptSet> {
        Arc::new(BasePromptSet::new(vec![BasePrompt::new("a cat")]).unwrap())
    }

    fn population(texts: &[&str]) -> Vec<Candidate> {
        texts
            .iter()
            .map(|t| Candidate::new(*t, Provenance::InitialVariation, 0))
            .collect()
    }

    fn weights() -> FitnessWeights {
        FitnessWeights {
            augmented_effectiveness: 0.5,
            instructional_quality: 0.3,
            intent_preservation: 0.2,
        }
    }

    #[tokio::test]
    async fn test_combined_score_is_weighted_sum() {
        let oracle = FnOracle::new(|_text: &str| {
            Ok(SubScores {
                instructional_quality: 4.0,
                augmented_effectiveness: 2.0,
                intent_preservation: 5.0,
            })
        });
        let evaluator = FitnessEvaluator::new(Arc::new(oracle), weights(), 2, Duration::from_secs(5));

        let outcome = evaluator.evaluate(population(&["a", "b"]), prompts()).await;

        assert_eq!(outcome.evaluated.len(), 2);
        for candidate in &outcome.evaluated {
            let fitness = candidate.fitness.as_ref().unwrap();
            assert_eq!(fitness.combined_score, 0.5 * 2.0 + 0.3 * 4.0 + 0.2 * 5.0);
            assert_eq!(candidate.augmented_prompts.len(), 1);
        }
    }

    #[tokio::test]
    async fn test_failed_candidate_is_dropped() {
        let oracle = FnOracle::new(|text: &str| {
            if text == "bad" {
                Err(EvalError::InvalidInput("nope".into()))
            } else {
                Ok(SubScores::default())
            }
        });
        let evaluator = FitnessEvaluator::new(Arc::new(oracle), weights(), 4, Duration::from_secs(5));
        let candidates = population(&["a", "bad", "c"]);
        let bad_id = candidates[1].id;

        let outcome = evaluator.evaluate(candidates, prompts()).await;

        let texts: Vec<&str> = outcome.evaluated.iter().map(|c| c.metaprompt.as_str()).collect();
        assert_eq!(texts, vec!["a", "c"]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].candidate.id, bad_id);
        assert_eq!(outcome.failures[0].candidate.metaprompt, "bad");
        assert!(outcome.failures[0].candidate.fitness.is_none());
    }

    #[tokio::test]
    async fn test_panicking_oracle_is_contained() {
        let oracle = FnOracle::new(|text: &str| {
            if text == "boom" {
                panic!("oracle bug");
            }
            Ok(SubScores::default())
        });
        let evaluator = FitnessEvaluator::new(Arc::new(oracle), weights(), 2, Duration::from_secs(5));

        let outcome = evaluator.evaluate(population(&["ok", "boom"]), prompts()).await;
        assert_eq!(outcome.evaluated.len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert!(outcome.failures[0].reason.contains("panicked"));
    }

    /// Panics while building the scoring future, outside the unwind guard.
    struct EagerPanicOracle;

    impl FitnessOracle for EagerPanicOracle {
        fn score<'a, 'b, 'c, 't>(
            &'a self,
            text: &'b str,
            _base: &'c BasePromptSet,
        ) -> Pin<Box<dyn Future<Output = Result<OracleScore, EvalError>> + Send + 't>>
        where
            'a: 't,
            'b: 't,
            'c: 't,
            Self: 't,
        {
            if text == "boom" {
                panic!("oracle bug before the first poll");
            }
            Box::pin(async {
                Ok(OracleScore {
                    sub_scores: SubScores::default(),
                    explanations: Default::default(),
                    augmented_prompts: Vec::new(),
                })
            })
        }
    }

    #[tokio::test]
    async fn test_aborted_task_keeps_candidate() {
        let evaluator = FitnessEvaluator::new(Arc::new(EagerPanicOracle), weights(), 2, Duration::from_secs(5));
        let candidates = population(&["ok", "boom"]);
        let boom_id = candidates[1].id;

        let outcome = evaluator.evaluate(candidates, prompts()).await;

        assert_eq!(outcome.evaluated.len(), 1);
        assert_eq!(outcome.evaluated[0].metaprompt, "ok");
        assert_eq!(outcome.failures.len(), 1);
        let failure = &outcome.failures[0];
        assert_eq!(failure.candidate.id, boom_id);
        assert_eq!(failure.candidate.metaprompt, "boom");
        assert_eq!(failure.candidate.provenance, Provenance::InitialVariation);
        assert!(failure.reason.contains("panicked"));
        let json = serde_json::to_string(failure).unwrap();
        assert!(json.contains("\"boom\""));
    }

    struct SlowOracle {
        delay: Duration,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FitnessOracle for SlowOracle {
        async fn score(&self, text: &str, _base: &BasePromptSet) -> Result<OracleScore, EvalError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            let delay = if text == "slow" { self.delay * 10 } else { self.delay };
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(OracleScore {
                sub_scores: SubScores::default(),
                explanations: Default::default(),
                augmented_prompts: Vec::new(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_pool_is_bounded() {
        let oracle = Arc::new(SlowOracle {
            delay: Duration::from_millis(100),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let evaluator = FitnessEvaluator::new(oracle.clone(), weights(), 2, Duration::from_secs(60));

        let outcome = evaluator.evaluate(population(&["a", "b", "c", "d", "e"]), prompts()).await;

        assert_eq!(outcome.evaluated.len(), 5);
        assert_eq!(oracle.peak.load(Ordering::SeqCst), 2);
        assert_eq!(oracle.in_flight.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_straggler_times_out() {
        let oracle = Arc::new(SlowOracle {
            delay: Duration::from_millis(100),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let evaluator = FitnessEvaluator::new(oracle, weights(), 4, Duration::from_millis(500));

        let outcome = evaluator.evaluate(population(&["fast", "slow"]), prompts()).await;

        assert_eq!(outcome.evaluated.len(), 1);
        assert_eq!(outcome.evaluated[0].metaprompt, "fast");
        assert!(outcome.failures[0].reason.contains("timed out"));
    }
}
