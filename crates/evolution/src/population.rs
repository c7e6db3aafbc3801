//! In-memory population store.

use tracing::{info, warn};

use metaevo_ai::CandidateGenerator;
use metaevo_core::{Candidate, Provenance};

/// Ordered candidates of one generation.
#[derive(Debug, Clone, Default)]
pub struct Population {
    generation: usize,
    candidates: Vec<Candidate>,
}

impl Population {
    /// Create an empty population for `generation`.
    pub fn new(generation: usize) -> Self {
        Self {
            generation,
            candidates: Vec::new(),
        }
    }

    /// Build generation 0: the seed plus `size - 1` variations.
    ///
    /// Missing variations are padded with deterministic textual variants.
    pub async fn initial(seed: &str, size: usize, generator: &dyn CandidateGenerator) -> Self {
        let mut population = Self::new(0);
        if size == 0 {
            return population;
        }
        population.push(Candidate::new(seed, Provenance::InitialBase, 0));

        let wanted = size - 1;
        let variations = match generator.generate_variations(seed, wanted).await {
            Ok(v) => v,
            Err(e) => {
                warn!("Variation generation failed: {}; padding with fallback variants", e);
                Vec::new()
            }
        };

        for text in variations.into_iter().take(wanted) {
            population.push(Candidate::new(text, Provenance::InitialVariation, 0));
        }

        let mut n = 1;
        while population.len() < size {
            population.push(
                Candidate::new(
                    format!("{} (variation {})", seed, n),
                    Provenance::InitialVariation,
                    0,
                )
                .with_fallback(true),
            );
            n += 1;
        }

        info!("Initialized population of {} candidates", population.len());
        population
    }

    /// Generation index.
    pub fn generation(&self) -> usize {
        self.generation
    }

    /// Add a candidate.
    pub fn push(&mut self, candidate: Candidate) {
        self.candidates.push(candidate);
    }

    /// Number of candidates.
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    /// Whether the population has no candidates.
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Borrow the candidates in order.
    pub fn candidates(&self) -> &[Candidate] {
        &self.candidates
    }

    /// Take ownership of the candidates.
    pub fn into_candidates(self) -> Vec<Candidate> {
        self.candidates
    }
}
