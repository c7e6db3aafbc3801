//! Genetic operators: elitism, mutation and crossover.

use futures::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use metaevo_ai::CandidateGenerator;
use metaevo_core::{Candidate, Provenance};

use crate::population::Population;

/// One planned reproduction slot, as indices into the parent list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offspring {
    Mutate { parent: usize },
    Crossover { a: usize, b: usize },
}

/// Builds the next population from selected parents.
pub struct GeneticOperatorEngine {
    generator: Arc<dyn CandidateGenerator>,
    population_size: usize,
    mutation_probability: f64,
    rng: Mutex<StdRng>,
}

impl GeneticOperatorEngine {
    /// Create an engine; `seed` makes operator choice reproducible.
    pub fn new(
        generator: Arc<dyn CandidateGenerator>,
        population_size: usize,
        mutation_probability: f64,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            generator,
            population_size,
            mutation_probability,
            rng: Mutex::new(rng),
        }
    }

    fn plan(&self, parents: usize, slots: usize) -> Vec<Offspring> {
        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        (0..slots)
            .map(|_| {
                if parents < 2 || rng.gen_bool(self.mutation_probability) {
                    Offspring::Mutate {
                        parent: rng.gen_range(0..parents),
                    }
                } else {
                    let a = rng.gen_range(0..parents);
                    let mut b = rng.gen_range(0..parents - 1);
                    if b >= a {
                        b += 1;
                    }
                    Offspring::Crossover { a, b }
                }
            })
            .collect()
    }

    /// Produce exactly `population_size` candidates for `generation`.
    ///
    /// Parents are carried forward first as elites; the remaining slots are
    /// filled by mutation or crossover. Failed operator calls fall back to a
    /// deterministic text so the population size never shrinks.
    pub async fn next_generation(&self, parents: &[Candidate], generation: usize) -> Population {
        let mut population = Population::new(generation);
        if parents.is_empty() {
            return population;
        }

        for parent in parents.iter().take(self.population_size) {
            population.push(parent.elite_copy(generation));
        }

        let slots = self.population_size.saturating_sub(population.len());
        let plan = self.plan(parents.len(), slots);

        let children = join_all(plan.into_iter().map(|offspring| self.breed(parents, offspring, generation))).await;
        for child in children {
            population.push(child);
        }

        let fallbacks = population.candidates().iter().filter(|c| c.fallback).count();
        info!(
            "Generation {}: {} candidates ({} elites, {} fallbacks)",
            generation,
            population.len(),
            parents.len().min(self.population_size),
            fallbacks
        );
        population
    }

    async fn breed(&self, parents: &[Candidate], offspring: Offspring, generation: usize) -> Candidate {
        match offspring {
            Offspring::Mutate { parent } => {
                let parent = &parents[parent];
                let provenance = Provenance::Mutation { parent: parent.id };
                match self.generator.mutate(&parent.metaprompt, &feedback_of(parent)).await {
                    Ok(text) => {
                        debug!("Mutated {}", parent.id);
                        Candidate::new(text, provenance, generation)
                    }
                    Err(e) => {
                        warn!("Mutation of {} failed: {}; using fallback text", parent.id, e);
                        Candidate::new(format!("{} (mutation failed)", parent.metaprompt), provenance, generation)
                            .with_fallback(true)
                    }
                }
            }
            Offspring::Crossover { a, b } => {
                let (a, b) = (&parents[a], &parents[b]);
                let provenance = Provenance::Crossover {
                    parent_a: a.id,
                    parent_b: b.id,
                };
                let feedback = format!("{}\n\n{}", feedback_of(a), feedback_of(b));
                match self.generator.crossover(&a.metaprompt, &b.metaprompt, &feedback).await {
                    Ok(text) => {
                        debug!("Crossed {} with {}", a.id, b.id);
                        Candidate::new(text, provenance, generation)
                    }
                    Err(e) => {
                        warn!("Crossover of {} and {} failed: {}; using fallback text", a.id, b.id, e);
                        Candidate::new(format!("{} (crossover failed)", a.metaprompt), provenance, generation)
                            .with_fallback(true)
                    }
                }
            }
        }
    }
}

fn feedback_of(candidate: &Candidate) -> String {
    candidate
        .fitness
        .as_ref()
        .map(|f| f.explanations.as_feedback())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use metaevo_ai::testing::{EchoGenerator, FailingGenerator};

    fn parent(text: &str) -> Candidate {
        Candidate::new(text, Provenance::InitialVariation, 0)
    }

    #[tokio::test]
    async fn test_population_size_is_preserved() {
        let generator = Arc::new(EchoGenerator::new());
        let engine = GeneticOperatorEngine::new(generator.clone(), 6, 0.5, Some(1));
        let parents = vec![parent("a"), parent("b")];

        let population = engine.next_generation(&parents, 1).await;

        assert_eq!(population.len(), 6);
        assert_eq!(population.generation(), 1);
        assert_eq!(generator.mutations() + generator.crossovers(), 4);
    }

    #[tokio::test]
    async fn test_elites_come_first() {
        let engine = GeneticOperatorEngine::new(Arc::new(EchoGenerator::new()), 4, 0.5, Some(3));
        let parents = vec![parent("a"), parent("b")];

        let population = engine.next_generation(&parents, 2).await;
        let candidates = population.candidates();

        for (elite, parent) in candidates.iter().zip(&parents) {
            assert_eq!(elite.metaprompt, parent.metaprompt);
            assert_eq!(elite.provenance, Provenance::Elitism { source: parent.id });
            assert_ne!(elite.id, parent.id);
            assert!(!elite.is_evaluated());
        }
        assert!(candidates[2..]
            .iter()
            .all(|c| matches!(c.provenance, Provenance::Mutation { .. } | Provenance::Crossover { .. })));
    }

    #[tokio::test]
    async fn test_probability_one_only_mutates() {
        let generator = Arc::new(EchoGenerator::new());
        let engine = GeneticOperatorEngine::new(generator.clone(), 5, 1.0, None);

        engine.next_generation(&[parent("a"), parent("b")], 1).await;
        assert_eq!(generator.mutations(), 3);
        assert_eq!(generator.crossovers(), 0);
    }

    #[tokio::test]
    async fn test_probability_zero_only_crosses_distinct_parents() {
        let generator = Arc::new(EchoGenerator::new());
        let engine = GeneticOperatorEngine::new(generator.clone(), 8, 0.0, Some(9));
        let parents = vec![parent("a"), parent("b"), parent("c")];

        let population = engine.next_generation(&parents, 1).await;

        assert_eq!(generator.crossovers(), 5);
        for child in &population.candidates()[3..] {
            match &child.provenance {
                Provenance::Crossover { parent_a, parent_b } => assert_ne!(parent_a, parent_b),
                other => panic!("unexpected provenance {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_single_parent_never_crosses() {
        let generator = Arc::new(EchoGenerator::new());
        let engine = GeneticOperatorEngine::new(generator.clone(), 3, 0.0, Some(5));

        let population = engine.next_generation(&[parent("only")], 1).await;
        assert_eq!(population.len(), 3);
        assert_eq!(generator.crossovers(), 0);
        assert_eq!(generator.mutations(), 2);
    }

    #[tokio::test]
    async fn test_failed_operators_use_fallback_text() {
        let engine = GeneticOperatorEngine::new(Arc::new(FailingGenerator), 4, 0.5, Some(11));
        let parents = vec![parent("a"), parent("b")];

        let population = engine.next_generation(&parents, 1).await;

        assert_eq!(population.len(), 4);
        for child in &population.candidates()[2..] {
            assert!(child.fallback);
            assert!(
                child.metaprompt.ends_with("(mutation failed)") || child.metaprompt.ends_with("(crossover failed)")
            );
        }
    }

    #[tokio::test]
    async fn test_more_parents_than_slots() {
        let engine = GeneticOperatorEngine::new(Arc::new(EchoGenerator::new()), 2, 0.5, Some(2));
        let parents = vec![parent("a"), parent("b"), parent("c")];

        let population = engine.next_generation(&parents, 1).await;
        assert_eq!(population.len(), 2);
        assert!(population
            .candidates()
            .iter()
            .all(|c| matches!(c.provenance, Provenance::Elitism { .. })));
    }

    #[test]
    fn test_seeded_plan_is_reproducible() {
        let make = || GeneticOperatorEngine::new(Arc::new(EchoGenerator::new()), 10, 0.5, Some(42));
        assert_eq!(make().plan(3, 8), make().plan(3, 8));
    }
}
