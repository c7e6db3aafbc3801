//! Optimization loop - drives generations from seed to best metaprompt.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use metaevo_ai::{CandidateGenerator, FitnessOracle};
use metaevo_core::{
    BasePromptSet, ConfigError, Generation, OptimizerConfig, RunHistory, RunId, RunReport, RunStatus,
    WorkloadError,
};
use metaevo_storage::{ArtifactStore, StorageError};

use crate::evaluator::FitnessEvaluator;
use crate::operators::GeneticOperatorEngine;
use crate::population::Population;
use crate::selector::{RandomJudge, Selector, TieBreaker};

/// Fatal errors that stop a run before it produces a report.
#[derive(Debug, thiserror::Error)]
pub enum OptimizerError {
    /// Invalid optimizer configuration
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Unusable seed or base prompts
    #[error("invalid workload: {0}")]
    Workload(#[from] WorkloadError),

    /// The final report could not be persisted
    #[error("failed to persist run report: {0}")]
    Storage(#[from] StorageError),
}

/// Where the loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// Building generation 0
    Initializing,
    /// Scoring the population of the given generation
    Evaluating(usize),
    /// Picking parents of the given generation
    Selecting(usize),
    /// Building the given generation's population
    Reproducing(usize),
    /// Run finished or aborted
    Terminated,
}

/// Orchestrates evaluate, select and reproduce for a fixed number of generations.
pub struct OptimizationLoop {
    config: OptimizerConfig,
    generator: Arc<dyn CandidateGenerator>,
    evaluator: FitnessEvaluator,
    selector: Selector,
    operators: GeneticOperatorEngine,
    store: Option<Arc<dyn ArtifactStore>>,
    state: LoopState,
}

impl OptimizationLoop {
    /// Create a loop after validating `config`.
    pub fn new(
        config: OptimizerConfig,
        oracle: Arc<dyn FitnessOracle>,
        generator: Arc<dyn CandidateGenerator>,
        tie_breaker: Arc<dyn TieBreaker>,
    ) -> Result<Self, OptimizerError> {
        config.validate()?;

        let fallback = match config.rng_seed {
            Some(seed) => RandomJudge::seeded(seed),
            None => RandomJudge::from_entropy(),
        }
        .with_epsilon(config.tie_epsilon);
        let evaluator = FitnessEvaluator::new(
            oracle,
            config.weights,
            config.max_concurrent_evaluations,
            config.evaluation_timeout(),
        );
        let selector = Selector::new(config.top_k, config.tie_epsilon, tie_breaker, fallback);
        let operators = GeneticOperatorEngine::new(
            Arc::clone(&generator),
            config.population_size,
            config.mutation_probability,
            config.rng_seed.map(|s| s.wrapping_add(1)),
        );

        Ok(Self {
            config,
            generator,
            evaluator,
            selector,
            operators,
            store: None,
            state: LoopState::Initializing,
        })
    }

    /// Persist checkpoints and the final report to `store`.
    pub fn with_store(mut self, store: Arc<dyn ArtifactStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Current state.
    pub fn state(&self) -> LoopState {
        self.state
    }

    /// The validated configuration.
    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Run all generations starting from `seed`.
    ///
    /// A generation in which no candidate survives evaluation stops the run
    /// early; the report then carries `RunStatus::Aborted` and the history
    /// up to the last complete generation.
    pub async fn run(&mut self, seed: &str, base_prompts: BasePromptSet) -> Result<RunReport, OptimizerError> {
        let seed = seed.trim();
        if seed.is_empty() {
            return Err(WorkloadError::BlankSeed.into());
        }

        let run_id = RunId::new();
        let started_at = Utc::now();
        let base_prompts = Arc::new(base_prompts);
        let total = self.config.num_generations;
        info!(
            "Starting run {}: {} generations of {} candidates over {} base prompts",
            run_id,
            total,
            self.config.population_size,
            base_prompts.len()
        );

        self.state = LoopState::Initializing;
        let mut population = Population::initial(seed, self.config.population_size, self.generator.as_ref()).await;
        let mut history = RunHistory::new();
        let mut status = RunStatus::Completed;

        for index in 0..total {
            let generation_started = Utc::now();

            self.state = LoopState::Evaluating(index);
            info!("Generation {}/{}: evaluating {} candidates", index + 1, total, population.len());
            let outcome = self
                .evaluator
                .evaluate(std::mem::take(&mut population).into_candidates(), Arc::clone(&base_prompts))
                .await;

            self.state = LoopState::Selecting(index);
            let selection = match self.selector.select(&outcome.evaluated).await {
                Some(selection) => selection,
                None => {
                    let reason = format!("no candidate survived evaluation in generation {}", index);
                    error!("Aborting run {}: {}", run_id, reason);
                    status = RunStatus::Aborted { reason };
                    break;
                }
            };

            let generation = Generation {
                index,
                candidates: outcome.evaluated,
                parents: selection.parents,
                best_parent: selection.best_parent,
                tie_break: selection.tie_break,
                evaluation_failures: outcome.failures,
                started_at: generation_started,
                finished_at: Utc::now(),
            };
            info!(
                "Generation {}/{} done: best {:.4}, mean {:.4}, {} parents, {} failures",
                index + 1,
                total,
                generation.best_score().unwrap_or_default(),
                generation.mean_score().unwrap_or_default(),
                generation.parents.len(),
                generation.evaluation_failures.len()
            );
            self.checkpoint(run_id, &generation).await;

            let is_last = index + 1 == total;
            if !is_last {
                self.state = LoopState::Reproducing(index + 1);
                population = self.operators.next_generation(&generation.parents, index + 1).await;
            }
            history.push(generation);
        }

        self.state = LoopState::Terminated;
        let report = RunReport {
            run_id,
            status,
            best: history.last().map(|g| g.best_parent.clone()),
            history,
            started_at,
            finished_at: Utc::now(),
        };

        if let Some(store) = &self.store {
            store.save_report(&report).await?;
            debug!("Saved report for run {}", run_id);
        }
        match report.best_metaprompt() {
            Some(best) => info!("Run {} finished; best metaprompt: {}", run_id, best),
            None => warn!("Run {} finished without a best metaprompt", run_id),
        }
        Ok(report)
    }

    async fn checkpoint(&self, run_id: RunId, generation: &Generation) {
        if let Some(store) = &self.store {
            if let Err(e) = store.save_generation(run_id, generation).await {
                warn!("Failed to checkpoint generation {}: {}", generation.index, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaevo_ai::testing::{EchoGenerator, FnOracle};
    use metaevo_core::{BasePrompt, SubScores};

    fn prompts() -> BasePromptSet {
        BasePromptSet::new(vec![BasePrompt::new("a dog surfing")]).unwrap()
    }

    fn config(population_size: usize, num_generations: usize, top_k: usize) -> OptimizerConfig {
        OptimizerConfig {
            population_size,
            num_generations,
            top_k,
            rng_seed: Some(7),
            ..Default::default()
        }
    }

    fn length_oracle() -> Arc<dyn FitnessOracle> {
        Arc::new(FnOracle::new(|text: &str| {
            let score = text.len() as f64;
            Ok(SubScores {
                instructional_quality: score,
                augmented_effectiveness: score,
                intent_preservation: score,
            })
        }))
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = OptimizationLoop::new(
            config(4, 2, 0),
            length_oracle(),
            Arc::new(EchoGenerator::new()),
            Arc::new(RandomJudge::seeded(1)),
        );
        assert!(matches!(result, Err(OptimizerError::Config(ConfigError::ZeroCount("top_k")))));
    }

    #[tokio::test]
    async fn test_blank_seed_is_fatal() {
        let mut optimizer = OptimizationLoop::new(
            config(4, 2, 2),
            length_oracle(),
            Arc::new(EchoGenerator::new()),
            Arc::new(RandomJudge::seeded(1)),
        )
        .unwrap();

        let result = optimizer.run("   ", prompts()).await;
        assert!(matches!(result, Err(OptimizerError::Workload(WorkloadError::BlankSeed))));
        assert_eq!(optimizer.state(), LoopState::Initializing);
    }

    #[tokio::test]
    async fn test_runs_every_generation() {
        let generator = Arc::new(EchoGenerator::new());
        let mut optimizer = OptimizationLoop::new(
            config(4, 3, 2),
            length_oracle(),
            generator.clone(),
            Arc::new(RandomJudge::seeded(1)),
        )
        .unwrap();

        let report = optimizer.run("Rewrite the prompt.", prompts()).await.unwrap();

        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(report.history.len(), 3);
        assert_eq!(optimizer.state(), LoopState::Terminated);
        // Two reproduction rounds of two children each; none after the last generation
        assert_eq!(generator.mutations() + generator.crossovers(), 4);
        let last = report.history.last().unwrap();
        assert_eq!(report.best.as_ref().map(|c| c.id), Some(last.best_parent.id));
    }

    #[tokio::test]
    async fn test_checkpoints_and_report_are_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(metaevo_storage::JsonStorage::new(dir.path()).await.unwrap());
        let mut optimizer = OptimizationLoop::new(
            config(3, 2, 1),
            length_oracle(),
            Arc::new(EchoGenerator::new()),
            Arc::new(RandomJudge::seeded(1)),
        )
        .unwrap()
        .with_store(store.clone());

        let report = optimizer.run("Rewrite the prompt.", prompts()).await.unwrap();

        let run_dir = store.run_dir(report.run_id);
        assert!(run_dir.join("generations").join("0000.json").exists());
        assert!(run_dir.join("generations").join("0001.json").exists());
        let best = std::fs::read_to_string(store.best_metaprompt_path(report.run_id)).unwrap();
        assert_eq!(Some(best.as_str()), report.best_metaprompt());

        let loaded = store.load_report(report.run_id).await.unwrap().unwrap();
        assert_eq!(loaded.history.len(), 2);
    }
}
