//! Response selection: expected value minus a divergence penalty towards a
//! trusted baseline, under an optional worst-case exploitability ceiling.

mod baseline;
mod payoff;

pub use baseline::Baseline;
pub use payoff::PayoffMatrix;

use std::collections::BTreeMap;

use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::model::{PosteriorDistribution, StrategyId};

/// Selection weights fixed for the lifetime of a [`Selector`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SelectorConfig {
    /// Weight on `KL(induced ∥ baseline)`.
    pub kl_reg: f64,
    /// Candidates whose exploitability exceeds this are never deployed.
    pub exploitability_limit: Option<f64>,
}

/// How candidates are valued before regularization.
#[derive(Debug, Clone, PartialEq)]
pub enum Valuation {
    /// Externally supplied score per candidate. Missing candidates are
    /// unscored and rank below every scored one.
    Scores(BTreeMap<StrategyId, f64>),
    /// Posterior-weighted payoff of each candidate against the hypotheses.
    Payoffs {
        belief: PosteriorDistribution,
        matrix: PayoffMatrix,
    },
}

impl Valuation {
    /// Scores each candidate by the posterior mass of the same name.
    pub fn from_posterior(posterior: &PosteriorDistribution) -> Self {
        Valuation::Scores(posterior.to_map())
    }

    pub fn scores<I, K>(scores: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<StrategyId>,
    {
        Valuation::Scores(scores.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    fn value(&self, candidate: &StrategyId) -> Result<Option<f64>> {
        match self {
            Valuation::Scores(scores) => {
                let Some(value) = scores.get(candidate).copied() else {
                    return Ok(None);
                };
                if value.is_nan() || value == f64::INFINITY {
                    return Err(Error::parameter(
                        "scores",
                        format!("score {value} for '{candidate}' is not usable"),
                    ));
                }
                Ok(value.is_finite().then_some(value))
            }
            Valuation::Payoffs { belief, matrix } => {
                Ok(Some(matrix.expected_value(candidate.as_str(), belief)))
            }
        }
    }

    fn derived_exploitability(&self, candidate: &StrategyId) -> Option<f64> {
        match self {
            Valuation::Scores(_) => None,
            Valuation::Payoffs { belief, matrix } => {
                Some(matrix.exploitability(candidate.as_str(), belief))
            }
        }
    }
}

/// Inputs to one selection decision.
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub candidates: &'a [StrategyId],
    pub valuation: &'a Valuation,
    pub baseline: &'a Baseline,
    /// Externally computed worst-case exploitability per candidate. Takes
    /// precedence over values derived from a payoff matrix.
    pub exploitability: Option<&'a BTreeMap<StrategyId, f64>>,
    /// When set, deploy the candidate closest to the baseline.
    pub novelty: bool,
}

static UNIFORM_BASELINE: Baseline = Baseline::Uniform;

impl<'a> SelectionRequest<'a> {
    pub fn new(candidates: &'a [StrategyId], valuation: &'a Valuation) -> Self {
        Self {
            candidates,
            valuation,
            baseline: &UNIFORM_BASELINE,
            exploitability: None,
            novelty: false,
        }
    }

    pub fn with_baseline(mut self, baseline: &'a Baseline) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_exploitability(mut self, exploitability: &'a BTreeMap<StrategyId, f64>) -> Self {
        self.exploitability = Some(exploitability);
        self
    }

    pub fn with_novelty(mut self, novelty: bool) -> Self {
        self.novelty = novelty;
        self
    }
}

/// Why the selector bypassed score maximization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fallback {
    /// The exploitability ceiling excluded every candidate.
    Infeasible,
    /// The novelty detector fired; the baseline-nearest candidate was used.
    Novelty,
}

impl Fallback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Fallback::Infeasible => "infeasible",
            Fallback::Novelty => "novelty",
        }
    }
}

/// Per-candidate breakdown of a decision.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub id: StrategyId,
    /// `None` when the valuation has no finite value for the candidate.
    pub value: Option<f64>,
    /// `+inf` when the candidate leaves the baseline's support.
    pub divergence: f64,
    pub exploitability: Option<f64>,
    pub feasible: bool,
    /// `value - kl_reg · divergence`; `None` when unscored or when the
    /// penalty is infinite.
    pub score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub chosen: StrategyId,
    /// Score of the chosen candidate; `None` when it could not be scored.
    pub score: Option<f64>,
    pub fallback: Option<Fallback>,
    pub scored: Vec<CandidateScore>,
}

impl Selection {
    pub fn chosen_score(&self) -> Option<&CandidateScore> {
        self.scored.iter().find(|c| c.id == self.chosen)
    }
}

/// Stateless chooser over a candidate list; safe to share across sessions.
#[derive(Debug, Clone, Copy)]
pub struct Selector {
    config: SelectorConfig,
}

impl Selector {
    pub fn new(config: SelectorConfig) -> Result<Self> {
        if !config.kl_reg.is_finite() || config.kl_reg < 0.0 {
            return Err(Error::parameter(
                "kl_reg",
                format!("must be finite and non-negative, got {}", config.kl_reg),
            ));
        }
        if let Some(limit) = config.exploitability_limit
            && !limit.is_finite()
        {
            return Err(Error::parameter(
                "exploitability_limit",
                format!("must be finite when set, got {limit}"),
            ));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> SelectorConfig {
        self.config
    }

    pub fn select(&self, request: &SelectionRequest<'_>) -> Result<Selection> {
        if request.candidates.is_empty() {
            return Err(Error::EmptyCandidateSet);
        }

        let mut scored = Vec::with_capacity(request.candidates.len());
        for id in request.candidates {
            let value = request.valuation.value(id)?;
            let divergence = request.baseline.divergence(id, request.candidates);
            let penalty = if self.config.kl_reg == 0.0 {
                0.0
            } else {
                self.config.kl_reg * divergence
            };
            let exploitability = request
                .exploitability
                .and_then(|known| known.get(id).copied())
                .or_else(|| request.valuation.derived_exploitability(id));
            let feasible = match self.config.exploitability_limit {
                None => true,
                Some(limit) => exploitability.is_some_and(|e| e <= limit),
            };
            scored.push(CandidateScore {
                id: id.clone(),
                value,
                divergence,
                exploitability,
                feasible,
                score: value.map(|v| v - penalty).filter(|s| s.is_finite()),
            });
        }

        let feasible: Vec<usize> = (0..scored.len()).filter(|i| scored[*i].feasible).collect();

        let (index, fallback) = if feasible.is_empty() {
            let all: Vec<usize> = (0..scored.len()).collect();
            (nearest_to_baseline(&scored, &all), Some(Fallback::Infeasible))
        } else if request.novelty {
            (nearest_to_baseline(&scored, &feasible), Some(Fallback::Novelty))
        } else {
            (best_score(&scored, &feasible), None)
        };

        let chosen = scored[index].id.clone();
        let score = scored[index].score;

        if let Some(reason) = fallback {
            tracing::warn!(
                target: "stratformer_core::select",
                chosen = %chosen,
                reason = reason.as_str(),
                candidates = scored.len(),
                "selection fell back to the baseline-nearest candidate"
            );
        } else if tracing::enabled!(Level::DEBUG) {
            event!(
                target: "stratformer_core::select",
                Level::DEBUG,
                chosen = %chosen,
                score,
                feasible = feasible.len(),
                candidates = scored.len(),
            );
        }

        Ok(Selection {
            chosen,
            score,
            fallback,
            scored,
        })
    }
}

/// Highest score; unscored candidates rank last and the earliest candidate
/// wins ties.
fn best_score(scored: &[CandidateScore], indices: &[usize]) -> usize {
    let mut best = indices[0];
    for &i in &indices[1..] {
        if scored[i].score > scored[best].score {
            best = i;
        }
    }
    best
}

/// Smallest divergence; the earliest candidate wins ties.
fn nearest_to_baseline(scored: &[CandidateScore], indices: &[usize]) -> usize {
    let mut best = indices[0];
    for &i in &indices[1..] {
        if scored[i].divergence < scored[best].divergence {
            best = i;
        }
    }
    best
}
