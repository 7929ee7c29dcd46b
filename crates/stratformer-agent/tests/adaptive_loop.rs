use std::collections::BTreeMap;

use serde_json::Map;
use stratformer_agent::{AdaptiveAgent, SessionCheckpoint, ValuationSource};
use stratformer_core::{
    Baseline, DecisionPoint, Error, Evidence, Fallback, NoveltyDetector, Observation,
    PayoffMatrix, PolicyLikelihood, PosteriorTracker, Selector, SelectorConfig, StrategyPool,
    TablePolicy,
};

fn table(name: &str, weights: [f64; 3]) -> Box<TablePolicy> {
    let row: BTreeMap<u32, f64> = weights.iter().enumerate().map(|(a, w)| (a as u32, *w)).collect();
    let rows = BTreeMap::from([("throw".to_string(), row)]);
    Box::new(TablePolicy::new(name, rows).expect("valid table"))
}

fn pool() -> StrategyPool {
    let mut pool = StrategyPool::new();
    pool.add_policy("rock_heavy", table("rock_heavy", [0.8, 0.1, 0.1]), Map::new())
        .unwrap();
    pool.add_policy("paper_heavy", table("paper_heavy", [0.1, 0.8, 0.1]), Map::new())
        .unwrap();
    pool.add_policy("scissors_heavy", table("scissors_heavy", [0.1, 0.1, 0.8]), Map::new())
        .unwrap();
    pool
}

/// Win +1, loss -1, draw 0 against each hypothesis' favourite throw.
fn payoffs() -> PayoffMatrix {
    let mut m = PayoffMatrix::new();
    let rows = [
        ("play_rock", [0.0, -1.0, 1.0]),
        ("play_paper", [1.0, 0.0, -1.0]),
        ("play_scissors", [-1.0, 1.0, 0.0]),
        ("mixed", [0.0, 0.0, 0.0]),
    ];
    let hypotheses = ["rock_heavy", "paper_heavy", "scissors_heavy"];
    for (candidate, values) in rows {
        for (h, v) in hypotheses.iter().zip(values) {
            m.set(candidate, *h, v).unwrap();
        }
    }
    m
}

fn candidates() -> Vec<&'static str> {
    vec!["play_rock", "play_paper", "play_scissors", "mixed"]
}

fn rps_agent(pool: &StrategyPool, kl_reg: f64) -> AdaptiveAgent {
    let tracker = PosteriorTracker::new(pool.uniform_prior()).unwrap();
    let detector = NoveltyDetector::new(3, 0.5).unwrap();
    let selector = Selector::new(SelectorConfig {
        kl_reg,
        exploitability_limit: None,
    })
    .unwrap();
    let baseline =
        Baseline::mixture([("play_rock", 0.1), ("play_paper", 0.1), ("play_scissors", 0.1), ("mixed", 0.7)])
            .unwrap();
    AdaptiveAgent::new(tracker, detector, selector, candidates())
        .unwrap()
        .with_session("rps")
        .with_valuation(ValuationSource::Payoffs(payoffs()))
        .with_baseline(baseline)
}

fn throw(action: u32) -> Observation {
    Observation {
        point: DecisionPoint::new("throw", vec![0, 1, 2]),
        action,
    }
}

#[test]
fn identifies_known_opponent_and_counters_it() {
    let pool = pool();
    let likelihood = PolicyLikelihood::new(&pool);
    let mut agent = rps_agent(&pool, 0.0);

    let mut last = None;
    for _ in 0..6 {
        let evidence = likelihood.observe(&throw(0)).unwrap();
        last = Some(agent.observe_round(&evidence).unwrap());
    }
    let decision = last.unwrap();
    assert_eq!(
        decision.posterior.map_estimate().map(|id| id.as_str()),
        Some("rock_heavy")
    );
    assert!(decision.max_posterior() > 0.99);
    assert!(!decision.novelty);
    assert_eq!(decision.selection.chosen.as_str(), "play_paper");
    assert_eq!(decision.selection.fallback, None);
    assert_eq!(decision.round, 6);
}

#[test]
fn unexplained_opponent_triggers_novelty_fallback() {
    let pool = pool();
    let mut agent = rps_agent(&pool, 0.0);
    // Equal likelihood under every hypothesis keeps the posterior flat.
    let flat = Evidence::new()
        .with("rock_heavy", -1.1)
        .with("paper_heavy", -1.1)
        .with("scissors_heavy", -1.1);

    let flags: Vec<bool> = (0..4)
        .map(|_| agent.observe_round(&flat).unwrap().novelty)
        .collect();
    assert_eq!(flags, vec![false, false, true, true]);

    let decision = agent.observe_round(&flat).unwrap();
    assert_eq!(decision.selection.fallback, Some(Fallback::Novelty));
    assert_eq!(decision.selection.chosen.as_str(), "mixed");
}

#[test]
fn elimination_is_surfaced_and_reset_recovers() {
    let pool = pool();
    let mut agent = rps_agent(&pool, 0.0);
    agent
        .observe_round(&Evidence::new().with("rock_heavy", -0.2))
        .unwrap();
    let before = agent.posterior();

    let err = agent
        .observe_round(&Evidence::new().with("paper_heavy", -0.2))
        .expect_err("every remaining hypothesis is eliminated");
    assert_eq!(err, Error::AllHypothesesEliminated);
    assert_eq!(agent.posterior(), before);

    agent.recover_by_reset();
    let prior = agent.tracker().prior();
    for (id, p) in agent.posterior().iter() {
        assert!((p - prior.get(id.as_str()).unwrap()).abs() < 1e-9);
    }
    assert!(
        agent
            .observe_round(&Evidence::new().with("paper_heavy", -0.2))
            .is_ok()
    );
}

#[test]
fn checkpoint_resumes_identically() {
    let pool = pool();
    let likelihood = PolicyLikelihood::new(&pool);
    let throws = [0, 1, 1, 2, 1, 1, 0, 1];

    let mut original = rps_agent(&pool, 0.05);
    for action in &throws[..3] {
        original
            .observe_round(&likelihood.observe(&throw(*action)).unwrap())
            .unwrap();
    }

    let json = serde_json::to_string(&original.checkpoint()).unwrap();
    let checkpoint: SessionCheckpoint = serde_json::from_str(&json).unwrap();
    let mut resumed = rps_agent(&pool, 0.05);
    resumed.restore(&checkpoint).unwrap();
    assert_eq!(resumed.rounds(), 3);

    for action in &throws[3..] {
        let evidence = likelihood.observe(&throw(*action)).unwrap();
        assert_eq!(
            original.observe_round(&evidence).unwrap(),
            resumed.observe_round(&evidence).unwrap()
        );
    }
}

#[test]
fn identical_inputs_give_identical_sessions() {
    let pool = pool();
    let likelihood = PolicyLikelihood::new(&pool);
    let throws = [2, 2, 0, 2, 1, 2, 2];

    let run = || {
        let mut agent = rps_agent(&pool, 0.1);
        throws
            .iter()
            .map(|a| {
                agent
                    .observe_round(&likelihood.observe(&throw(*a)).unwrap())
                    .unwrap()
            })
            .collect::<Vec<_>>()
    };
    assert_eq!(run(), run());
}

#[test]
fn exploitability_ceiling_excludes_pure_counters() {
    let pool = pool();
    let likelihood = PolicyLikelihood::new(&pool);
    let tracker = PosteriorTracker::new(pool.uniform_prior()).unwrap();
    let detector = NoveltyDetector::new(5, 0.2).unwrap();
    let selector = Selector::new(SelectorConfig {
        kl_reg: 0.0,
        exploitability_limit: Some(0.5),
    })
    .unwrap();
    let mut agent = AdaptiveAgent::new(tracker, detector, selector, candidates())
        .unwrap()
        .with_valuation(ValuationSource::Payoffs(payoffs()));

    let decision = agent
        .observe_round(&likelihood.observe(&throw(0)).unwrap())
        .unwrap();
    assert_eq!(decision.selection.chosen.as_str(), "mixed");
    assert_eq!(decision.selection.fallback, None);
}
