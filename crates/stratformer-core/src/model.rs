//! Shared value types: strategy identities, per-round evidence, and the
//! normalized posterior snapshot handed to callers.

use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Immutable key naming one candidate strategy within a session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StrategyId(String);

impl StrategyId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StrategyId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for StrategyId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&StrategyId> for StrategyId {
    fn from(value: &StrategyId) -> Self {
        value.clone()
    }
}

impl Borrow<str> for StrategyId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Log-likelihood of one round's observation under each hypothesis.
///
/// Hypotheses missing from the map are treated as impossible for the round.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    log_likelihoods: BTreeMap<StrategyId, f64>,
}

impl Evidence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, strategy: impl Into<StrategyId>, log_likelihood: f64) {
        self.log_likelihoods.insert(strategy.into(), log_likelihood);
    }

    pub fn with(mut self, strategy: impl Into<StrategyId>, log_likelihood: f64) -> Self {
        self.insert(strategy, log_likelihood);
        self
    }

    pub fn get(&self, strategy: &str) -> Option<f64> {
        self.log_likelihoods.get(strategy).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StrategyId, f64)> {
        self.log_likelihoods.iter().map(|(id, ll)| (id, *ll))
    }

    pub fn len(&self) -> usize {
        self.log_likelihoods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log_likelihoods.is_empty()
    }

    /// Adds another round's log-likelihoods; a hypothesis missing from
    /// either side stays impossible.
    pub fn accumulate(&mut self, other: &Evidence) {
        self.log_likelihoods.retain(|id, _| other.get(id.as_str()).is_some());
        for (id, ll) in self.log_likelihoods.iter_mut() {
            *ll += other.get(id.as_str()).unwrap_or(f64::NEG_INFINITY);
        }
    }
}

impl<K: Into<StrategyId>> FromIterator<(K, f64)> for Evidence {
    fn from_iter<T: IntoIterator<Item = (K, f64)>>(iter: T) -> Self {
        Self {
            log_likelihoods: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

/// Normalized belief over the tracked hypotheses, in tracker order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorDistribution {
    entries: Vec<(StrategyId, f64)>,
}

impl PosteriorDistribution {
    pub(crate) fn from_entries(entries: Vec<(StrategyId, f64)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, strategy: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(id, _)| id.as_str() == strategy)
            .map(|(_, p)| *p)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StrategyId, f64)> {
        self.entries.iter().map(|(id, p)| (id, *p))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|(_, p)| p).sum()
    }

    /// Largest posterior mass; this is the novelty detector's input sample.
    pub fn max_mass(&self) -> f64 {
        self.entries
            .iter()
            .map(|(_, p)| *p)
            .fold(0.0f64, f64::max)
    }

    /// Most probable hypothesis; the earliest one wins ties.
    pub fn map_estimate(&self) -> Option<&StrategyId> {
        let mut best: Option<(&StrategyId, f64)> = None;
        for (id, p) in &self.entries {
            match best {
                Some((_, best_p)) if *p <= best_p => {}
                _ => best = Some((id, *p)),
            }
        }
        best.map(|(id, _)| id)
    }

    /// Shannon entropy in nats.
    pub fn entropy(&self) -> f64 {
        self.entries
            .iter()
            .filter(|(_, p)| *p > 0.0)
            .map(|(_, p)| -p * p.ln())
            .sum()
    }

    pub fn to_map(&self) -> BTreeMap<StrategyId, f64> {
        self.entries.iter().cloned().collect()
    }
}
