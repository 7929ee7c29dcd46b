//! Named catalog of strategies with per-strategy metadata.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::model::StrategyId;
use crate::policy::Policy;

struct PoolEntry {
    id: StrategyId,
    policy: Box<dyn Policy>,
    metadata: Map<String, Value>,
}

/// Policies stored under unique names, in insertion order.
#[derive(Default)]
pub struct StrategyPool {
    entries: Vec<PoolEntry>,
}

impl StrategyPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_policy(
        &mut self,
        name: impl Into<StrategyId>,
        policy: Box<dyn Policy>,
        metadata: Map<String, Value>,
    ) -> Result<()> {
        let id = name.into();
        if self.contains(id.as_str()) {
            return Err(Error::DuplicateStrategy(id));
        }
        self.entries.push(PoolEntry {
            id,
            policy,
            metadata,
        });
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.id.as_str() == name)
    }

    pub fn policy(&self, name: &str) -> Option<&dyn Policy> {
        self.entry(name).map(|entry| entry.policy.as_ref())
    }

    pub fn metadata(&self, name: &str) -> Option<&Map<String, Value>> {
        self.entry(name).map(|entry| &entry.metadata)
    }

    pub fn names(&self) -> Vec<StrategyId> {
        self.entries.iter().map(|entry| entry.id.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StrategyId, &dyn Policy)> {
        self.entries
            .iter()
            .map(|entry| (&entry.id, entry.policy.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Equal prior mass on every registered strategy, in pool order.
    pub fn uniform_prior(&self) -> Vec<(StrategyId, f64)> {
        let mass = 1.0 / self.entries.len().max(1) as f64;
        self.entries
            .iter()
            .map(|entry| (entry.id.clone(), mass))
            .collect()
    }

    fn entry(&self, name: &str) -> Option<&PoolEntry> {
        self.entries.iter().find(|entry| entry.id.as_str() == name)
    }
}

impl std::fmt::Debug for StrategyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyPool")
            .field("strategies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::UniformPolicy;
    use serde_json::json;

    #[test]
    fn add_get_list() {
        let mut pool = StrategyPool::new();
        let mut metadata = Map::new();
        metadata.insert("foo".to_string(), json!(1));
        pool.add_policy("p1", Box::new(UniformPolicy), metadata)
            .expect("add");
        pool.add_policy("p2", Box::new(UniformPolicy), Map::new())
            .expect("add");

        assert_eq!(pool.names(), vec![StrategyId::from("p1"), StrategyId::from("p2")]);
        assert!(pool.policy("p1").is_some());
        assert_eq!(pool.metadata("p1").and_then(|m| m.get("foo")), Some(&json!(1)));
        assert!(pool.metadata("missing").is_none());
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut pool = StrategyPool::new();
        pool.add_policy("p1", Box::new(UniformPolicy), Map::new())
            .expect("add");
        let err = pool
            .add_policy("p1", Box::new(UniformPolicy), Map::new())
            .expect_err("duplicate");
        assert_eq!(err, Error::DuplicateStrategy(StrategyId::from("p1")));
    }

    #[test]
    fn uniform_prior_sums_to_one() {
        let mut pool = StrategyPool::new();
        for name in ["a", "b", "c"] {
            pool.add_policy(name, Box::new(UniformPolicy), Map::new())
                .expect("add");
        }
        let total: f64 = pool.uniform_prior().iter().map(|(_, p)| p).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}
