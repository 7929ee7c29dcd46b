use super::{ActionDistribution, DecisionPoint, Policy};
use crate::error::Result;

/// Uniform random play over the legal actions.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformPolicy;

impl Policy for UniformPolicy {
    fn action_probabilities(&self, point: &DecisionPoint) -> Result<ActionDistribution> {
        point.ensure_actions()?;
        Ok(ActionDistribution::uniform(&point.legal_actions))
    }
}
