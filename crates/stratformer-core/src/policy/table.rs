use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::{ActionDistribution, DecisionPoint, Policy};
use crate::error::{Error, Result};

/// Table-driven policy: per state key, a weight for each action id.
///
/// Weights are renormalized over the legal actions at query time. Unknown
/// states, or rows with no mass on any legal action, fall back to uniform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TablePolicy {
    name: String,
    rows: BTreeMap<String, BTreeMap<u32, f64>>,
}

impl TablePolicy {
    pub fn new(name: impl Into<String>, rows: BTreeMap<String, BTreeMap<u32, f64>>) -> Result<Self> {
        let name = name.into();
        for (state, row) in &rows {
            if row.values().any(|w| !w.is_finite() || *w < 0.0) {
                return Err(Error::InvalidPolicy {
                    policy: name,
                    message: format!("state '{state}' has a negative or non-finite weight"),
                });
            }
            if row.values().sum::<f64>() <= 0.0 {
                return Err(Error::InvalidPolicy {
                    policy: name,
                    message: format!("state '{state}' has no positive weight"),
                });
            }
        }
        Ok(Self { name, rows })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn states(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }
}

impl Policy for TablePolicy {
    fn action_probabilities(&self, point: &DecisionPoint) -> Result<ActionDistribution> {
        point.ensure_actions()?;
        let Some(row) = self.rows.get(&point.key) else {
            return Ok(ActionDistribution::uniform(&point.legal_actions));
        };

        let weights: Vec<f64> = point
            .legal_actions
            .iter()
            .map(|a| row.get(a).copied().unwrap_or(0.0))
            .collect();
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Ok(ActionDistribution::uniform(&point.legal_actions));
        }

        Ok(ActionDistribution::from_entries(
            point
                .legal_actions
                .iter()
                .copied()
                .zip(weights.into_iter().map(|w| w / total))
                .collect(),
        ))
    }
}
