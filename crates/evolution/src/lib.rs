//! Evolutionary search over metaprompts.
//!
//! One generation is evaluate, select, reproduce:
//!
//! - [`FitnessEvaluator`] scores the population on a bounded worker pool
//! - [`Selector`] keeps the top K, asking a [`TieBreaker`] on near-equal scores
//! - [`GeneticOperatorEngine`] refills the population by elitism, mutation and crossover
//!
//! [`OptimizationLoop`] drives this for a fixed number of generations and
//! records every generation in the run history.

#![warn(missing_docs, unused_crate_dependencies)]

mod evaluator;
mod operators;
mod optimizer;
mod population;
mod selector;

pub use evaluator::{EvaluationOutcome, FitnessEvaluator};
pub use operators::GeneticOperatorEngine;
pub use optimizer::{LoopState, OptimizationLoop, OptimizerError};
pub use population::Population;
pub use selector::{Arbitration, LlmJudge, RandomJudge, Selection, Selector, TieBreaker};
