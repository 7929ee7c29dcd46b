mod table;
mod uniform;

pub use table::TablePolicy;
pub use uniform::UniformPolicy;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// One decision the opponent faces: an opaque state key plus the legal
/// action ids at that state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionPoint {
    pub key: String,
    pub legal_actions: Vec<u32>,
}

impl DecisionPoint {
    pub fn new(key: impl Into<String>, legal_actions: Vec<u32>) -> Self {
        Self {
            key: key.into(),
            legal_actions,
        }
    }

    pub(crate) fn ensure_actions(&self) -> Result<()> {
        if self.legal_actions.is_empty() {
            return Err(Error::parameter(
                "legal_actions",
                format!("decision point '{}' has no legal actions", self.key),
            ));
        }
        Ok(())
    }
}

/// Probability per legal action, in the decision point's action order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDistribution {
    entries: Vec<(u32, f64)>,
}

impl ActionDistribution {
    pub fn uniform(actions: &[u32]) -> Self {
        let prob = 1.0 / actions.len() as f64;
        Self {
            entries: actions.iter().map(|a| (*a, prob)).collect(),
        }
    }

    pub(crate) fn from_entries(entries: Vec<(u32, f64)>) -> Self {
        Self { entries }
    }

    /// Probability of `action`; zero for actions outside the support.
    pub fn prob(&self, action: u32) -> f64 {
        self.entries
            .iter()
            .find(|(a, _)| *a == action)
            .map(|(_, p)| *p)
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f64)> + '_ {
        self.entries.iter().copied()
    }

    pub fn probabilities(&self) -> Vec<f64> {
        self.entries.iter().map(|(_, p)| *p).collect()
    }

    /// Draws an action by inverse-CDF sampling.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<u32> {
        let last = self.entries.last()?.0;
        let draw: f64 = rng.r#gen();
        let mut cumulative = 0.0;
        for (action, prob) in &self.entries {
            cumulative += prob;
            if draw < cumulative {
                return Some(*action);
            }
        }
        Some(last)
    }
}

/// Anything that yields an action distribution over a decision point's
/// legal actions.
pub trait Policy: Send + Sync {
    fn action_probabilities(&self, point: &DecisionPoint) -> Result<ActionDistribution>;
}

impl<P: Policy + ?Sized> Policy for Box<P> {
    fn action_probabilities(&self, point: &DecisionPoint) -> Result<ActionDistribution> {
        (**self).action_probabilities(point)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn sampling_respects_support() {
        let dist = ActionDistribution::from_entries(vec![(3, 0.0), (7, 1.0)]);
        let mut rng = SmallRng::seed_from_u64(7);
        for _ in 0..100 {
            assert_eq!(dist.sample(&mut rng), Some(7));
        }
    }

    #[test]
    fn sampling_is_seed_deterministic() {
        let dist = ActionDistribution::uniform(&[0, 1, 2, 3]);
        let draw = |seed| {
            let mut rng = SmallRng::seed_from_u64(seed);
            (0..32)
                .map(|_| dist.sample(&mut rng).expect("non-empty"))
                .collect::<Vec<_>>()
        };
        assert_eq!(draw(11), draw(11));
    }

    #[test]
    fn prob_outside_support_is_zero() {
        let dist = ActionDistribution::uniform(&[0, 1]);
        assert_eq!(dist.prob(5), 0.0);
        assert_eq!(dist.prob(1), 0.5);
    }
}
