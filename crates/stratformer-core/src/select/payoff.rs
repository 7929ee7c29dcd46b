use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::model::{PosteriorDistribution, StrategyId};

/// Payoff of each response candidate against each opponent hypothesis,
/// from the selecting player's perspective.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayoffMatrix {
    rows: BTreeMap<StrategyId, BTreeMap<StrategyId, f64>>,
}

impl PayoffMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        candidate: impl Into<StrategyId>,
        hypothesis: impl Into<StrategyId>,
        payoff: f64,
    ) -> Result<()> {
        if !payoff.is_finite() {
            return Err(Error::parameter(
                "payoff",
                format!("payoff must be finite, got {payoff}"),
            ));
        }
        self.rows
            .entry(candidate.into())
            .or_default()
            .insert(hypothesis.into(), payoff);
        Ok(())
    }

    /// Missing entries count as zero.
    pub fn payoff(&self, candidate: &str, hypothesis: &str) -> f64 {
        self.rows
            .get(candidate)
            .and_then(|row| row.get(hypothesis))
            .copied()
            .unwrap_or(0.0)
    }

    /// `Σ_h belief(h) · payoff(candidate, h)`.
    pub fn expected_value(&self, candidate: &str, belief: &PosteriorDistribution) -> f64 {
        belief
            .iter()
            .map(|(h, p)| p * self.payoff(candidate, h.as_str()))
            .sum()
    }

    /// Best opponent payoff against `candidate` over every hypothesis in
    /// `belief`, under the zero-sum convention. Missing entries count as
    /// zero, matching [`PayoffMatrix::expected_value`].
    pub fn exploitability(&self, candidate: &str, belief: &PosteriorDistribution) -> f64 {
        belief
            .iter()
            .map(|(h, _)| -self.payoff(candidate, h.as_str()))
            .reduce(f64::max)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::belief::PosteriorTracker;

    fn matrix() -> PayoffMatrix {
        let mut m = PayoffMatrix::new();
        m.set("counter_a", "a", 1.0).unwrap();
        m.set("counter_a", "b", -0.5).unwrap();
        m.set("counter_b", "a", -0.25).unwrap();
        m.set("counter_b", "b", 1.0).unwrap();
        m
    }

    #[test]
    fn expected_value_weights_by_belief() {
        let belief = PosteriorTracker::new([("a", 0.25), ("b", 0.75)])
            .unwrap()
            .posteriors();
        let m = matrix();
        assert!((m.expected_value("counter_a", &belief) - (0.25 - 0.375)).abs() < 1e-12);
        assert!((m.expected_value("counter_b", &belief) - (-0.0625 + 0.75)).abs() < 1e-12);
        assert_eq!(m.expected_value("unknown", &belief), 0.0);
    }

    #[test]
    fn exploitability_is_worst_case_opponent_gain() {
        let belief = PosteriorTracker::uniform(["a", "b"]).unwrap().posteriors();
        let m = matrix();
        assert_eq!(m.exploitability("counter_a", &belief), 0.5);
        assert_eq!(m.exploitability("counter_b", &belief), 0.25);
    }

    #[test]
    fn exploitability_counts_missing_entries_as_zero() {
        let belief = PosteriorTracker::uniform(["h1", "h2"]).unwrap().posteriors();
        let mut m = PayoffMatrix::new();
        m.set("greedy", "h1", 2.0).unwrap();
        m.set("greedy", "h2", -3.0).unwrap();
        m.set("partial", "h1", 1.0).unwrap();

        assert_eq!(m.exploitability("greedy", &belief), 3.0);
        // h2 is absent from the row, so the opponent can still reach 0.
        assert_eq!(m.exploitability("partial", &belief), 0.0);
        assert_eq!(m.exploitability("neutral", &belief), 0.0);
        assert_eq!(m.expected_value("neutral", &belief), 0.0);
    }

    #[test]
    fn rejects_non_finite_payoffs() {
        let mut m = PayoffMatrix::new();
        assert!(m.set("x", "a", f64::NAN).is_err());
        assert!(m.set("x", "a", f64::INFINITY).is_err());
    }
}
