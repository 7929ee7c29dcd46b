//! Converts observed opponent actions into per-strategy evidence.

use crate::error::Result;
use crate::model::Evidence;
use crate::policy::DecisionPoint;
use crate::pool::StrategyPool;

/// One observed opponent decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub point: DecisionPoint,
    pub action: u32,
}

/// Likelihood model backed by the policies in a [`StrategyPool`]:
/// `ln π_s(action | point)` for every strategy `s`.
#[derive(Debug, Clone, Copy)]
pub struct PolicyLikelihood<'a> {
    pool: &'a StrategyPool,
}

impl<'a> PolicyLikelihood<'a> {
    pub fn new(pool: &'a StrategyPool) -> Self {
        Self { pool }
    }

    /// Evidence for a single observation. Strategies that give the action
    /// zero probability receive `-inf`.
    pub fn observe(&self, observation: &Observation) -> Result<Evidence> {
        let mut evidence = Evidence::new();
        for (id, policy) in self.pool.iter() {
            let dist = policy.action_probabilities(&observation.point)?;
            let prob = dist.prob(observation.action);
            let ll = if prob > 0.0 { prob.ln() } else { f64::NEG_INFINITY };
            evidence.insert(id, ll);
        }
        Ok(evidence)
    }

    /// Joint evidence for several observations made in the same round.
    pub fn observe_sequence(&self, observations: &[Observation]) -> Result<Evidence> {
        let mut total: Evidence = self.pool.iter().map(|(id, _)| (id, 0.0)).collect();
        for observation in observations {
            total.accumulate(&self.observe(observation)?);
        }
        Ok(total)
    }
}
