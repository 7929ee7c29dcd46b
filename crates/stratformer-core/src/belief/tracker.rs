//! Streaming Bayesian posterior over a closed set of strategy hypotheses.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{Level, event};

use crate::error::{Error, Result};
use crate::math::logsumexp;
use crate::model::{Evidence, PosteriorDistribution, StrategyId};

/// Allowed deviation of a prior's total mass from 1.
pub const PRIOR_TOLERANCE: f64 = 1e-6;

/// Posterior over strategy identities, stored as log-probabilities.
///
/// The hypothesis set is fixed at construction. Key order follows the order
/// the prior was supplied in and is used for every snapshot.
#[derive(Debug, Clone)]
pub struct PosteriorTracker {
    strategies: Vec<StrategyId>,
    prior: Vec<f64>,
    log_prior: Vec<f64>,
    log_post: Vec<f64>,
    updates: u64,
}

impl PosteriorTracker {
    /// Builds a tracker from `(strategy, probability)` pairs.
    pub fn new<I, K>(prior: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<StrategyId>,
    {
        let mut strategies = Vec::new();
        let mut probs = Vec::new();
        let mut seen = HashSet::new();
        for (key, prob) in prior {
            let id = key.into();
            if !seen.insert(id.clone()) {
                return Err(Error::prior(format!("strategy '{id}' appears more than once")));
            }
            if prob.is_nan() || prob < 0.0 {
                return Err(Error::prior(format!(
                    "strategy '{id}' has invalid mass {prob}"
                )));
            }
            strategies.push(id);
            probs.push(prob);
        }

        if strategies.is_empty() {
            return Err(Error::prior("prior must name at least one strategy"));
        }

        let total: f64 = probs.iter().sum();
        if !total.is_finite() || (total - 1.0).abs() > PRIOR_TOLERANCE {
            return Err(Error::prior(format!("masses sum to {total}, expected 1")));
        }

        let log_prior: Vec<f64> = probs.iter().map(|p| p.ln()).collect();
        Ok(Self {
            strategies,
            prior: probs,
            log_post: log_prior.clone(),
            log_prior,
            updates: 0,
        })
    }

    /// Uniform prior over `strategies`.
    pub fn uniform<I, K>(strategies: I) -> Result<Self>
    where
        I: IntoIterator<Item = K>,
        K: Into<StrategyId>,
    {
        let ids: Vec<StrategyId> = strategies.into_iter().map(Into::into).collect();
        if ids.is_empty() {
            return Err(Error::prior("prior must name at least one strategy"));
        }
        let mass = 1.0 / ids.len() as f64;
        Self::new(ids.into_iter().map(|id| (id, mass)))
    }

    /// Bayes update: adds each hypothesis' log-likelihood to its log-posterior
    /// and renormalizes. Hypotheses absent from `evidence` are eliminated.
    pub fn update(&mut self, evidence: &Evidence) -> Result<()> {
        self.update_weighted(evidence, 1.0)
    }

    /// Tempered update that scales every log-likelihood by `weight`.
    ///
    /// The tracker is left untouched when this returns an error.
    pub fn update_weighted(&mut self, evidence: &Evidence, weight: f64) -> Result<()> {
        if !weight.is_finite() || weight <= 0.0 || weight > 1.0 {
            return Err(Error::parameter(
                "weight",
                format!("must lie in (0, 1], got {weight}"),
            ));
        }

        for (id, ll) in evidence.iter() {
            if !self.strategies.contains(id) {
                return Err(Error::UnknownStrategy(id.clone()));
            }
            if ll.is_nan() || ll == f64::INFINITY {
                return Err(Error::InvalidEvidence {
                    strategy: id.clone(),
                    value: ll,
                });
            }
        }

        let mut next = Vec::with_capacity(self.log_post.len());
        for (id, log_post) in self.strategies.iter().zip(&self.log_post) {
            let ll = evidence.get(id.as_str()).unwrap_or(f64::NEG_INFINITY);
            let value = log_post + weight * ll;
            if value.is_nan() || value == f64::INFINITY {
                return Err(Error::InvalidEvidence {
                    strategy: id.clone(),
                    value: ll,
                });
            }
            next.push(value);
        }

        let norm = logsumexp(&next);
        if norm == f64::NEG_INFINITY {
            event!(
                target: "stratformer_core::posterior",
                Level::WARN,
                updates = self.updates,
                "evidence eliminated every hypothesis"
            );
            return Err(Error::AllHypothesesEliminated);
        }

        for value in next.iter_mut() {
            *value -= norm;
        }
        self.log_post = next;
        self.updates += 1;

        if tracing::enabled!(Level::DEBUG) {
            let alive = self.log_post.iter().filter(|v| v.is_finite()).count();
            event!(
                target: "stratformer_core::posterior",
                Level::DEBUG,
                updates = self.updates,
                alive,
                weight,
                log_norm = norm,
            );
        }

        Ok(())
    }

    /// Normalized snapshot; renormalized on every read.
    pub fn posteriors(&self) -> PosteriorDistribution {
        let norm = logsumexp(&self.log_post);
        let mut probs: Vec<f64> = self
            .log_post
            .iter()
            .map(|lp| (lp - norm).exp())
            .collect();
        let total: f64 = probs.iter().sum();
        if total > 0.0 && total.is_finite() {
            for p in probs.iter_mut() {
                *p /= total;
            }
        }
        PosteriorDistribution::from_entries(self.strategies.iter().cloned().zip(probs).collect())
    }

    pub fn max_posterior(&self) -> f64 {
        self.posteriors().max_mass()
    }

    /// Restores the log-posteriors to `ln(prior)`.
    pub fn reset(&mut self) {
        self.log_post.copy_from_slice(&self.log_prior);
        self.updates = 0;
    }

    pub fn log_posteriors(&self) -> &[f64] {
        &self.log_post
    }

    pub fn strategies(&self) -> &[StrategyId] {
        &self.strategies
    }

    pub fn prior(&self) -> PosteriorDistribution {
        PosteriorDistribution::from_entries(
            self.strategies
                .iter()
                .cloned()
                .zip(self.prior.iter().copied())
                .collect(),
        )
    }

    /// Number of successful updates since construction or the last reset.
    pub fn updates(&self) -> u64 {
        self.updates
    }

    pub fn checkpoint(&self) -> TrackerCheckpoint {
        TrackerCheckpoint {
            strategies: self.strategies.clone(),
            log_posteriors: self
                .log_post
                .iter()
                .map(|lp| lp.is_finite().then_some(*lp))
                .collect(),
            updates: self.updates,
        }
    }

    /// Rebuilds a tracker from its prior and a checkpoint taken from a
    /// tracker built with the same prior.
    pub fn restore<I, K>(prior: I, checkpoint: &TrackerCheckpoint) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<StrategyId>,
    {
        let mut tracker = Self::new(prior)?;
        if tracker.strategies != checkpoint.strategies {
            return Err(Error::parameter(
                "checkpoint",
                "strategy order does not match the prior",
            ));
        }
        if checkpoint.log_posteriors.len() != tracker.log_post.len() {
            return Err(Error::parameter(
                "checkpoint",
                "log-posterior vector has the wrong length",
            ));
        }

        let restored: Vec<f64> = checkpoint
            .log_posteriors
            .iter()
            .map(|lp| lp.unwrap_or(f64::NEG_INFINITY))
            .collect();
        if restored.iter().any(|lp| lp.is_nan() || *lp == f64::INFINITY) {
            return Err(Error::parameter(
                "checkpoint",
                "log-posteriors must be finite or eliminated",
            ));
        }
        let norm = logsumexp(&restored);
        if !norm.is_finite() || norm.abs() > PRIOR_TOLERANCE {
            return Err(Error::parameter(
                "checkpoint",
                format!("log-posteriors are not normalized (log-sum {norm})"),
            ));
        }

        tracker.log_post = restored;
        tracker.updates = checkpoint.updates;
        Ok(tracker)
    }
}

/// Verbatim, order-preserving tracker state. Eliminated hypotheses are
/// stored as `None` since JSON has no representation for `-inf`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerCheckpoint {
    pub strategies: Vec<StrategyId>,
    pub log_posteriors: Vec<Option<f64>>,
    pub updates: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(prior: &[(&str, f64)]) -> PosteriorTracker {
        PosteriorTracker::new(prior.iter().copied()).expect("valid prior")
    }

    fn assert_normalized(dist: &PosteriorDistribution) {
        assert!((dist.total() - 1.0).abs() < 1e-6, "total {}", dist.total());
        assert!(dist.iter().all(|(_, p)| (0.0..=1.0).contains(&p)));
    }

    #[test]
    fn fresh_tracker_reports_prior() {
        let prior = [("a", 0.2), ("b", 0.3), ("c", 0.5)];
        let t = tracker(&prior);
        let post = t.posteriors();
        for (name, p) in prior {
            assert!((post.get(name).unwrap() - p).abs() < 1e-9);
        }
    }

    #[test]
    fn rejects_invalid_priors() {
        let cases: Vec<Vec<(&str, f64)>> = vec![
            vec![],
            vec![("a", 0.6), ("b", 0.6)],
            vec![("a", -0.1), ("b", 1.1)],
            vec![("a", 0.5), ("a", 0.5)],
            vec![("a", f64::NAN), ("b", 1.0)],
        ];
        for prior in cases {
            let err = PosteriorTracker::new(prior.clone()).expect_err("prior should fail");
            assert!(
                matches!(err, Error::InvalidPrior { .. }),
                "{prior:?} gave {err:?}"
            );
        }
    }

    #[test]
    fn update_moves_mass_towards_supported_hypothesis() {
        let mut t = tracker(&[("a", 0.6), ("b", 0.4)]);
        t.update(&Evidence::new().with("a", 0.0).with("b", 2.0f64.ln()))
            .expect("update");
        let post = t.posteriors();
        assert_normalized(&post);
        assert!(post.get("b").unwrap() > 0.4);
        // 0.4 * 2 / (0.6 + 0.8)
        assert!((post.get("b").unwrap() - 0.8 / 1.4).abs() < 1e-12);
    }

    #[test]
    fn likelihood_ratio_scales_odds_exactly() {
        let mut t = tracker(&[("a", 0.25), ("b", 0.25), ("c", 0.5)]);
        t.update(&Evidence::new().with("a", -3.0).with("b", -1.0).with("c", -0.2))
            .expect("warm-up");
        let before = t.posteriors();
        let odds_before = before.get("b").unwrap() / before.get("a").unwrap();

        let r = 1.7;
        t.update(
            &Evidence::new()
                .with("a", -250.0)
                .with("b", -250.0 + r)
                .with("c", -1.0),
        )
        .expect("update");
        let after = t.posteriors();
        let odds_after = after.get("b").unwrap() / after.get("a").unwrap();
        assert!((odds_after / odds_before - r.exp()).abs() < 1e-9);
    }

    #[test]
    fn absent_hypotheses_are_eliminated() {
        let mut t = tracker(&[("a", 0.5), ("b", 0.5)]);
        t.update(&Evidence::new().with("a", -0.7)).expect("update");
        let post = t.posteriors();
        assert_eq!(post.get("b"), Some(0.0));
        assert!((post.get("a").unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn eliminating_everything_is_an_error_and_keeps_state() {
        let mut t = tracker(&[("a", 0.3), ("b", 0.7)]);
        t.update(&Evidence::new().with("a", -1.0).with("b", -2.0))
            .expect("update");
        let snapshot = t.log_posteriors().to_vec();

        let err = t.update(&Evidence::new()).expect_err("all eliminated");
        assert_eq!(err, Error::AllHypothesesEliminated);
        let err = t
            .update(&Evidence::new().with("a", f64::NEG_INFINITY))
            .expect_err("all eliminated");
        assert_eq!(err, Error::AllHypothesesEliminated);
        assert_eq!(t.log_posteriors(), snapshot.as_slice());
        assert_eq!(t.updates(), 1);
    }

    #[test]
    fn rejects_unknown_and_non_finite_evidence() {
        let mut t = tracker(&[("a", 0.5), ("b", 0.5)]);
        assert!(matches!(
            t.update(&Evidence::new().with("zzz", 0.0)),
            Err(Error::UnknownStrategy(_))
        ));
        assert!(matches!(
            t.update(&Evidence::new().with("a", f64::NAN).with("b", 0.0)),
            Err(Error::InvalidEvidence { .. })
        ));
        assert!(matches!(
            t.update(&Evidence::new().with("a", f64::INFINITY).with("b", 0.0)),
            Err(Error::InvalidEvidence { .. })
        ));
        assert_eq!(t.updates(), 0);
    }

    #[test]
    fn survives_extreme_log_likelihoods() {
        let mut t = tracker(&[("a", 0.5), ("b", 0.3), ("c", 0.2)]);
        for step in 0..50 {
            let sign = if step % 2 == 0 { 1.0 } else { -1.0 };
            t.update(
                &Evidence::new()
                    .with("a", 300.0 * sign)
                    .with("b", -300.0 * sign)
                    .with("c", 0.0),
            )
            .expect("update");
            let post = t.posteriors();
            assert_normalized(&post);
            assert!(t.log_posteriors().iter().all(|lp| !lp.is_nan()));
        }
    }

    #[test]
    fn sums_to_one_across_many_finite_updates() {
        let mut t = tracker(&[("a", 0.1), ("b", 0.2), ("c", 0.3), ("d", 0.4)]);
        for step in 0..500 {
            let x = step as f64;
            t.update(
                &Evidence::new()
                    .with("a", -(x % 7.0))
                    .with("b", -(x % 3.0) * 0.5)
                    .with("c", -(x % 5.0) * 0.1)
                    .with("d", -1.0),
            )
            .expect("update");
            assert_normalized(&t.posteriors());
        }
    }

    #[test]
    fn reset_restores_prior_exactly() {
        let mut t = tracker(&[("a", 0.6), ("b", 0.4)]);
        let fresh = t.posteriors();
        for _ in 0..20 {
            t.update(&Evidence::new().with("a", -0.3).with("b", -1.9))
                .expect("update");
        }
        t.reset();
        assert_eq!(t.posteriors(), fresh);
        assert_eq!(t.updates(), 0);
    }

    #[test]
    fn single_hypothesis_stays_certain() {
        let mut t = tracker(&[("only", 1.0)]);
        for ll in [-500.0, 0.0, -3.2, -1e-3] {
            t.update(&Evidence::new().with("only", ll)).expect("update");
            assert_eq!(t.posteriors().get("only"), Some(1.0));
        }
    }

    #[test]
    fn weighted_update_tempers_likelihood() {
        let mut full = tracker(&[("a", 0.5), ("b", 0.5)]);
        let mut half = full.clone();
        let evidence = Evidence::new().with("a", 0.0).with("b", -2.0);
        full.update(&evidence).expect("full");
        half.update_weighted(&evidence, 0.5).expect("half");
        let a_full = full.posteriors().get("a").unwrap();
        let a_half = half.posteriors().get("a").unwrap();
        assert!(a_half < a_full);
        assert!(a_half > 0.5);
        assert!(half.update_weighted(&evidence, 0.0).is_err());
        assert!(half.update_weighted(&evidence, 1.5).is_err());
    }

    #[test]
    fn identical_sequences_are_bitwise_identical() {
        let run = || {
            let mut t = tracker(&[("a", 0.2), ("b", 0.5), ("c", 0.3)]);
            for step in 0..100 {
                let x = step as f64 * 0.37;
                t.update(
                    &Evidence::new()
                        .with("a", -x.sin().abs())
                        .with("b", -x.cos().abs())
                        .with("c", -0.5),
                )
                .expect("update");
            }
            t.posteriors()
                .iter()
                .map(|(_, p)| p.to_bits())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn checkpoint_round_trips_through_json() {
        let prior = [("a", 0.5), ("b", 0.25), ("c", 0.25)];
        let mut t = tracker(&prior);
        t.update(&Evidence::new().with("a", -1.0).with("b", -0.5))
            .expect("update");

        let json = serde_json::to_string(&t.checkpoint()).expect("serialize");
        let checkpoint: TrackerCheckpoint = serde_json::from_str(&json).expect("deserialize");
        let restored = PosteriorTracker::restore(prior, &checkpoint).expect("restore");

        assert_eq!(restored.posteriors(), t.posteriors());
        assert_eq!(restored.log_posteriors(), t.log_posteriors());
        assert_eq!(restored.updates(), 1);
        assert_eq!(checkpoint.log_posteriors[2], None);
    }

    #[test]
    fn restore_rejects_mismatched_order() {
        let t = tracker(&[("a", 0.5), ("b", 0.5)]);
        let checkpoint = t.checkpoint();
        let err = PosteriorTracker::restore([("b", 0.5), ("a", 0.5)], &checkpoint)
            .expect_err("order mismatch");
        assert!(matches!(err, Error::InvalidParameter { name: "checkpoint", .. }));
    }
}
