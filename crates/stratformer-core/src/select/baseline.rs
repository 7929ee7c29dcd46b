use std::collections::BTreeMap;

use crate::belief::PRIOR_TOLERANCE;
use crate::error::{Error, Result};
use crate::math::kl_divergence;
use crate::model::StrategyId;

/// Trusted reference point for the divergence penalty.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Baseline {
    /// Uniform mixture over the request's candidates.
    #[default]
    Uniform,
    /// Mixture over candidates. Deploying `c` induces the point mass on `c`,
    /// so its divergence is `-ln baseline(c)`.
    Mixture(BTreeMap<StrategyId, f64>),
    /// Each candidate's induced action distribution, compared to a reference
    /// distribution over the same action set.
    Behavior {
        reference: Vec<f64>,
        induced: BTreeMap<StrategyId, Vec<f64>>,
    },
}

impl Baseline {
    pub fn mixture<I, K>(weights: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<StrategyId>,
    {
        let weights: BTreeMap<StrategyId, f64> =
            weights.into_iter().map(|(k, v)| (k.into(), v)).collect();
        check_distribution("baseline", weights.values().copied())?;
        Ok(Baseline::Mixture(weights))
    }

    pub fn behavior(reference: Vec<f64>, induced: BTreeMap<StrategyId, Vec<f64>>) -> Result<Self> {
        check_distribution("baseline.reference", reference.iter().copied())?;
        for (id, dist) in &induced {
            if dist.len() != reference.len() {
                return Err(Error::parameter(
                    "baseline.induced",
                    format!(
                        "'{id}' covers {} actions but the reference covers {}",
                        dist.len(),
                        reference.len()
                    ),
                ));
            }
            check_distribution("baseline.induced", dist.iter().copied())?;
        }
        Ok(Baseline::Behavior { reference, induced })
    }

    /// `KL(induced(candidate) ∥ baseline)`; `+inf` when the candidate's
    /// behavior is unknown or leaves the baseline's support.
    pub fn divergence(&self, candidate: &StrategyId, candidates: &[StrategyId]) -> f64 {
        match self {
            Baseline::Uniform => (candidates.len().max(1) as f64).ln(),
            Baseline::Mixture(weights) => match weights.get(candidate) {
                Some(w) if *w > 0.0 => -w.ln(),
                _ => f64::INFINITY,
            },
            Baseline::Behavior { reference, induced } => induced
                .get(candidate)
                .map(|dist| kl_divergence(dist, reference))
                .unwrap_or(f64::INFINITY),
        }
    }
}

fn check_distribution(name: &'static str, values: impl Iterator<Item = f64>) -> Result<()> {
    let mut total = 0.0;
    for value in values {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::parameter(
                name,
                format!("mass {value} is negative or not finite"),
            ));
        }
        total += value;
    }
    if (total - 1.0).abs() > PRIOR_TOLERANCE {
        return Err(Error::parameter(name, format!("masses sum to {total}, expected 1")));
    }
    Ok(())
}
