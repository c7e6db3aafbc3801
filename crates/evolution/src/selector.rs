//! Parent selection with tie arbitration.
//!
//! Candidates are ranked by combined score. When the score at rank K equals
//! the score at rank K+1, or the top two are equal, every candidate at or
//! above the cutoff score is handed to a [`TieBreaker`]. An unusable judge
//! answer falls back to [`RandomJudge`], which only randomizes among the
//! candidates actually tied.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::seq::{index, SliceRandom};
use rand::SeedableRng;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use metaevo_ai::templates::{judge_prompt, judge_schema, JudgeEntry};
use metaevo_ai::{generate_with_retry, parse_json_reply, EvalError, GenerateRequest, GenerationCapability};
use metaevo_core::{Candidate, RetryConfig, TieBreakMethod, TieBreakRecord};

/// Decision returned by a tie breaker, as indices into the contender list.
#[derive(Debug, Clone, PartialEq)]
pub struct Arbitration {
    /// Chosen contenders, best first
    pub ranking: Vec<usize>,
    /// The single best parent (must appear in `ranking`)
    pub best: usize,
    /// Free-text justification
    pub reasoning: Option<String>,
}

impl Arbitration {
    /// Check the decision against `contenders` and trim it to `want` entries.
    pub fn validated(mut self, contenders: usize, want: usize) -> Result<Self, EvalError> {
        let mut seen = HashSet::new();
        for &i in &self.ranking {
            if i >= contenders {
                return Err(EvalError::Parse(format!("ranking references unknown candidate {}", i + 1)));
            }
            if !seen.insert(i) {
                return Err(EvalError::Parse(format!("ranking repeats candidate {}", i + 1)));
            }
        }
        if self.ranking.len() < want {
            return Err(EvalError::Parse(format!(
                "ranking has {} entries, expected {}",
                self.ranking.len(),
                want
            )));
        }
        self.ranking.truncate(want);
        if !self.ranking.contains(&self.best) {
            return Err(EvalError::Parse(format!("best candidate {} is not in the ranking", self.best + 1)));
        }
        Ok(self)
    }
}

/// Resolves ties between near-equal candidates.
#[async_trait]
pub trait TieBreaker: Send + Sync {
    /// Rank up to `k` of `contenders` and pick a best parent among them.
    async fn arbitrate(&self, contenders: &[Candidate], k: usize) -> Result<Arbitration, EvalError>;

    /// How this breaker decides.
    fn method(&self) -> TieBreakMethod;
}

/// Random tie breaker.
///
/// Only candidates tied at the cutoff are drawn at random. Contenders that
/// strictly outscore the cutoff always keep their slots, and the best parent
/// is drawn from those tied at the top.
pub struct RandomJudge {
    rng: Mutex<StdRng>,
    epsilon: f64,
}

impl RandomJudge {
    /// Seeded for reproducible runs.
    pub fn seeded(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    /// Seeded from OS entropy.
    pub fn from_entropy() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            rng: Mutex::new(rng),
            epsilon: 1e-6,
        }
    }

    /// Scores within `epsilon` count as tied.
    pub fn with_epsilon(mut self, epsilon: f64) -> Self {
        self.epsilon = epsilon;
        self
    }

    fn tied(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.epsilon
    }

    /// Pick `min(k, contenders)` of `contenders`, returning indices into it.
    pub fn pick(&self, contenders: &[Candidate], k: usize) -> Arbitration {
        let want = k.min(contenders.len());
        if want == 0 {
            return Arbitration {
                ranking: Vec::new(),
                best: 0,
                reasoning: None,
            };
        }

        let mut order: Vec<usize> = (0..contenders.len()).collect();
        order.sort_by(|&a, &b| score_of(&contenders[b]).total_cmp(&score_of(&contenders[a])));
        let cutoff = score_of(&contenders[order[want - 1]]);

        let (mut ranking, tied): (Vec<usize>, Vec<usize>) = order
            .into_iter()
            .filter(|&i| score_of(&contenders[i]) >= cutoff - self.epsilon)
            .partition(|&i| score_of(&contenders[i]) > cutoff + self.epsilon);

        let mut rng = match self.rng.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let open = want.saturating_sub(ranking.len());
        ranking.extend(index::sample(&mut *rng, tied.len(), open).into_iter().map(|j| tied[j]));

        let top = ranking
            .iter()
            .map(|&i| score_of(&contenders[i]))
            .fold(f64::NEG_INFINITY, f64::max);
        let leaders: Vec<usize> = ranking
            .iter()
            .copied()
            .filter(|&i| self.tied(score_of(&contenders[i]), top))
            .collect();
        let best = leaders
            .choose(&mut *rng)
            .or_else(|| ranking.first())
            .copied()
            .unwrap_or(0);

        Arbitration {
            ranking,
            best,
            reasoning: None,
        }
    }
}

#[async_trait]
impl TieBreaker for RandomJudge {
    async fn arbitrate(&self, contenders: &[Candidate], k: usize) -> Result<Arbitration, EvalError> {
        if contenders.is_empty() {
            return Err(EvalError::InvalidInput("no contenders".to_string()));
        }
        Ok(self.pick(contenders, k))
    }

    fn method(&self) -> TieBreakMethod {
        TieBreakMethod::Random
    }
}

#[derive(Deserialize)]
struct JudgeReply {
    ranking: Vec<i64>,
    best: i64,
    #[serde(default)]
    reasoning: String,
}

/// Tie breaker that asks a judge model.
pub struct LlmJudge {
    capability: Arc<dyn GenerationCapability>,
    retry: RetryConfig,
    model: Option<String>,
}

impl LlmJudge {
    /// Create a judge.
    pub fn new(capability: Arc<dyn GenerationCapability>, retry: RetryConfig) -> Self {
        Self {
            capability,
            retry,
            model: None,
        }
    }

    /// Judge with a specific model.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }
}

fn label_to_index(label: i64) -> Result<usize, EvalError> {
    usize::try_from(label)
        .ok()
        .and_then(|l| l.checked_sub(1))
        .ok_or_else(|| EvalError::Parse(format!("invalid candidate number {}", label)))
}

#[async_trait]
impl TieBreaker for LlmJudge {
    async fn arbitrate(&self, contenders: &[Candidate], k: usize) -> Result<Arbitration, EvalError> {
        let entries: Vec<JudgeEntry<'_>> = contenders
            .iter()
            .map(|c| {
                let fitness = c.fitness.as_ref();
                JudgeEntry {
                    metaprompt: &c.metaprompt,
                    combined_score: c.combined_score().unwrap_or_default(),
                    sub_scores: fitness
                        .map(|f| {
                            format!(
                                "instructional_quality={:.3}, augmented_effectiveness={:.3}, intent_preservation={:.3}",
                                f.sub_scores.instructional_quality,
                                f.sub_scores.augmented_effectiveness,
                                f.sub_scores.intent_preservation
                            )
                        })
                        .unwrap_or_default(),
                    explanations: fitness.map(|f| f.explanations.as_feedback()).unwrap_or_default(),
                }
            })
            .collect();

        let want = k.min(contenders.len());
        let request = GenerateRequest::new(judge_prompt(&entries, want))
            .with_schema(judge_schema())
            .with_model(self.model.clone());
        let reply = generate_with_retry(self.capability.as_ref(), &request, &self.retry).await?;
        let parsed: JudgeReply = parse_json_reply(&reply)?;

        let ranking = parsed
            .ranking
            .into_iter()
            .map(label_to_index)
            .collect::<Result<Vec<_>, _>>()?;
        let reasoning = parsed.reasoning.trim();

        Arbitration {
            ranking,
            best: label_to_index(parsed.best)?,
            reasoning: (!reasoning.is_empty()).then(|| reasoning.to_string()),
        }
        .validated(contenders.len(), want)
    }

    fn method(&self) -> TieBreakMethod {
        TieBreakMethod::Judge
    }
}

/// Parents chosen for reproduction.
#[derive(Debug, Clone)]
pub struct Selection {
    /// Selected parents; the best parent is always first
    pub parents: Vec<Candidate>,
    /// The single best parent
    pub best_parent: Candidate,
    /// Present when a tie was arbitrated
    pub tie_break: Option<TieBreakRecord>,
}

/// Ranks evaluated candidates and picks parents.
pub struct Selector {
    top_k: usize,
    epsilon: f64,
    judge: Arc<dyn TieBreaker>,
    fallback: RandomJudge,
}

impl Selector {
    /// Create a selector.
    pub fn new(top_k: usize, epsilon: f64, judge: Arc<dyn TieBreaker>, fallback: RandomJudge) -> Self {
        Self {
            top_k: top_k.max(1),
            epsilon,
            judge,
            fallback,
        }
    }

    fn tied(&self, a: f64, b: f64) -> bool {
        (a - b).abs() <= self.epsilon
    }

    /// Whether the ranked scores call for arbitration.
    pub fn needs_arbitration(&self, sorted_scores: &[f64]) -> bool {
        let n = sorted_scores.len();
        let cutoff_tie = n > self.top_k && self.tied(sorted_scores[self.top_k - 1], sorted_scores[self.top_k]);
        let top_tie = n >= 2 && self.tied(sorted_scores[0], sorted_scores[1]);
        cutoff_tie || top_tie
    }

    /// Select parents from `evaluated`. Returns None when nothing was evaluated.
    pub async fn select(&self, evaluated: &[Candidate]) -> Option<Selection> {
        if evaluated.is_empty() {
            return None;
        }

        let mut ranked: Vec<Candidate> = evaluated.to_vec();
        ranked.sort_by(|a, b| score_of(b).total_cmp(&score_of(a)));
        let scores: Vec<f64> = ranked.iter().map(score_of).collect();
        let want = self.top_k.min(ranked.len());

        if !self.needs_arbitration(&scores) {
            let parents: Vec<Candidate> = ranked.into_iter().take(want).collect();
            let best_parent = parents[0].clone();
            debug!("Selected {} parents without tie (best {:.4})", parents.len(), scores[0]);
            return Some(Selection {
                parents,
                best_parent,
                tie_break: None,
            });
        }

        let cutoff = scores[want - 1];
        let contenders: Vec<Candidate> = ranked
            .into_iter()
            .filter(|c| score_of(c) >= cutoff - self.epsilon)
            .collect();
        info!(
            "Tie at cutoff {:.4}: arbitrating among {} contenders for {} slots",
            cutoff,
            contenders.len(),
            want
        );

        let (arbitration, method) = match self
            .judge
            .arbitrate(&contenders, want)
            .await
            .and_then(|a| a.validated(contenders.len(), want))
        {
            Ok(a) => (a, self.judge.method()),
            Err(e) => {
                warn!("Tie arbitration unusable ({}); falling back to random selection", e);
                (self.fallback.pick(&contenders, want), TieBreakMethod::Random)
            }
        };

        let best_parent = contenders[arbitration.best].clone();
        let mut parents = vec![best_parent.clone()];
        parents.extend(
            arbitration
                .ranking
                .iter()
                .filter(|&&i| i != arbitration.best)
                .map(|&i| contenders[i].clone()),
        );

        Some(Selection {
            parents,
            best_parent,
            tie_break: Some(TieBreakRecord {
                method,
                contenders: contenders.iter().map(|c| c.id).collect(),
                reasoning: arbitration.reasoning,
            }),
        })
    }
}

fn score_of(candidate: &Candidate) -> f64 {
    candidate.combined_score().unwrap_or(f64::NEG_INFINITY)
}
