//! Per-session decision loop: posterior update, novelty check, selection.

use std::collections::{BTreeMap, HashSet};

use stratformer_core::{
    Baseline, Error, Evidence, NoveltyDetector, PayoffMatrix, PosteriorDistribution,
    PosteriorTracker, Result, SelectionRequest, Selector, StrategyId, Valuation,
};
use tracing::{Level, event};

use crate::session::{RoundDecision, SessionCheckpoint};

/// Where candidate values come from each round.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ValuationSource {
    /// Each candidate scores its own posterior mass; candidates are the
    /// hypotheses themselves.
    #[default]
    Posterior,
    /// Posterior-weighted payoffs against the hypotheses.
    Payoffs(PayoffMatrix),
}

impl ValuationSource {
    fn valuation(&self, posterior: &PosteriorDistribution) -> Valuation {
        match self {
            ValuationSource::Posterior => Valuation::from_posterior(posterior),
            ValuationSource::Payoffs(matrix) => Valuation::Payoffs {
                belief: posterior.clone(),
                matrix: matrix.clone(),
            },
        }
    }
}

/// One opponent, one session. Owns its tracker and detector; the selector
/// is configuration only.
#[derive(Debug, Clone)]
pub struct AdaptiveAgent {
    session: String,
    tracker: PosteriorTracker,
    detector: NoveltyDetector,
    selector: Selector,
    candidates: Vec<StrategyId>,
    valuation: ValuationSource,
    baseline: Baseline,
    exploitability: Option<BTreeMap<StrategyId, f64>>,
    rounds: u64,
}

impl AdaptiveAgent {
    pub fn new<I, K>(
        tracker: PosteriorTracker,
        detector: NoveltyDetector,
        selector: Selector,
        candidates: I,
    ) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<StrategyId>,
    {
        let candidates: Vec<StrategyId> = candidates.into_iter().map(Into::into).collect();
        if candidates.is_empty() {
            return Err(Error::EmptyCandidateSet);
        }
        let mut seen = HashSet::new();
        for id in &candidates {
            if !seen.insert(id) {
                return Err(Error::DuplicateStrategy(id.clone()));
            }
        }
        Ok(Self {
            session: String::new(),
            tracker,
            detector,
            selector,
            candidates,
            valuation: ValuationSource::Posterior,
            baseline: Baseline::Uniform,
            exploitability: None,
            rounds: 0,
        })
    }

    /// Label attached to every round event.
    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn with_valuation(mut self, valuation: ValuationSource) -> Self {
        self.valuation = valuation;
        self
    }

    pub fn with_baseline(mut self, baseline: Baseline) -> Self {
        self.baseline = baseline;
        self
    }

    pub fn with_exploitability(mut self, exploitability: BTreeMap<StrategyId, f64>) -> Self {
        self.exploitability = Some(exploitability);
        self
    }

    /// Runs one round. An update that eliminates every hypothesis is
    /// returned to the caller with the session untouched; see
    /// [`AdaptiveAgent::recover_by_reset`].
    pub fn observe_round(&mut self, evidence: &Evidence) -> Result<RoundDecision> {
        if let Err(err) = self.tracker.update(evidence) {
            tracing::warn!(
                target: "stratformer_agent::round",
                session = %self.session,
                round = self.rounds + 1,
                error = %err,
                "round rejected"
            );
            return Err(err);
        }

        let posterior = self.tracker.posteriors();
        let novelty = self.detector.update(posterior.max_mass())?;

        let valuation = self.valuation.valuation(&posterior);
        let mut request =
            SelectionRequest::new(&self.candidates, &valuation).with_baseline(&self.baseline);
        if let Some(exploitability) = self.exploitability.as_ref() {
            request = request.with_exploitability(exploitability);
        }
        let selection = self.selector.select(&request.with_novelty(novelty))?;

        self.rounds += 1;
        emit_round_event(&self.session, self.rounds, &posterior, novelty, &selection);

        Ok(RoundDecision {
            round: self.rounds,
            posterior,
            novelty,
            selection,
        })
    }

    /// Restores the tracker to its prior. The novelty window is kept.
    pub fn recover_by_reset(&mut self) {
        self.tracker.reset();
        event!(
            target: "stratformer_agent::round",
            Level::INFO,
            session = %self.session,
            round = self.rounds,
            "posterior reset to prior"
        );
    }

    pub fn checkpoint(&self) -> SessionCheckpoint {
        SessionCheckpoint {
            rounds: self.rounds,
            tracker: self.tracker.checkpoint(),
            novelty: self.detector.checkpoint(),
        }
    }

    /// Replaces tracker and detector state with a checkpoint taken from an
    /// agent built with the same prior.
    pub fn restore(&mut self, checkpoint: &SessionCheckpoint) -> Result<()> {
        let prior = self.tracker.prior();
        let tracker = PosteriorTracker::restore(prior.iter(), &checkpoint.tracker)?;
        let detector = NoveltyDetector::restore(&checkpoint.novelty)?;
        self.tracker = tracker;
        self.detector = detector;
        self.rounds = checkpoint.rounds;
        Ok(())
    }

    pub fn posterior(&self) -> PosteriorDistribution {
        self.tracker.posteriors()
    }

    pub fn tracker(&self) -> &PosteriorTracker {
        &self.tracker
    }

    pub fn detector(&self) -> &NoveltyDetector {
        &self.detector
    }

    pub fn candidates(&self) -> &[StrategyId] {
        &self.candidates
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}

fn emit_round_event(
    session: &str,
    round: u64,
    posterior: &PosteriorDistribution,
    novelty: bool,
    selection: &stratformer_core::Selection,
) {
    if !tracing::enabled!(Level::INFO) {
        return;
    }
    let map = posterior
        .map_estimate()
        .map(StrategyId::as_str)
        .unwrap_or_default();
    event!(
        target: "stratformer_agent::round",
        Level::INFO,
        session = %session,
        round,
        max_posterior = posterior.max_mass(),
        entropy = posterior.entropy(),
        map_estimate = %map,
        novelty,
        chosen = %selection.chosen,
        score = selection.score,
        fallback = selection.fallback.map(|f| f.as_str()).unwrap_or("none"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratformer_core::SelectorConfig;

    fn agent(prior: &[(&str, f64)], window: usize, threshold: f64) -> AdaptiveAgent {
        let tracker = PosteriorTracker::new(prior.iter().copied()).unwrap();
        let detector = NoveltyDetector::new(window, threshold).unwrap();
        let selector = Selector::new(SelectorConfig::default()).unwrap();
        let names: Vec<&str> = prior.iter().map(|(n, _)| *n).collect();
        AdaptiveAgent::new(tracker, detector, selector, names).unwrap()
    }

    #[test]
    fn rejects_empty_and_duplicate_candidates() {
        let tracker = PosteriorTracker::uniform(["a", "b"]).unwrap();
        let detector = NoveltyDetector::new(2, 0.5).unwrap();
        let selector = Selector::new(SelectorConfig::default()).unwrap();
        let empty: [&str; 0] = [];
        assert_eq!(
            AdaptiveAgent::new(tracker.clone(), detector.clone(), selector, empty).unwrap_err(),
            Error::EmptyCandidateSet
        );
        assert!(matches!(
            AdaptiveAgent::new(tracker, detector, selector, ["a", "a"]),
            Err(Error::DuplicateStrategy(_))
        ));
    }

    #[test]
    fn round_counter_advances_only_on_success() {
        let mut agent = agent(&[("a", 0.5), ("b", 0.5)], 2, 0.5);
        agent
            .observe_round(&Evidence::new().with("a", -0.1).with("b", -1.0))
            .unwrap();
        assert_eq!(agent.rounds(), 1);
        assert!(agent.observe_round(&Evidence::new()).is_err());
        assert_eq!(agent.rounds(), 1);
    }

    #[test]
    fn posterior_valuation_follows_map_estimate() {
        let mut agent = agent(&[("a", 0.5), ("b", 0.5)], 4, 0.5);
        let decision = agent
            .observe_round(&Evidence::new().with("a", -2.0).with("b", -0.1))
            .unwrap();
        assert_eq!(decision.selection.chosen.as_str(), "b");
        assert_eq!(decision.round, 1);
        assert!(!decision.novelty);
    }
}
