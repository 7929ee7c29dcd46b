//! Online opponent modeling: a streaming posterior over known strategies,
//! a novelty signal for opponents outside that set, and a regularized,
//! exploitability-bounded response selector.

pub mod belief;
pub mod error;
pub mod math;
pub mod model;
pub mod novelty;
pub mod policy;
pub mod pool;
pub mod select;

pub use belief::{Observation, PolicyLikelihood, PosteriorTracker, TrackerCheckpoint};
pub use error::{Error, Result};
pub use model::{Evidence, PosteriorDistribution, StrategyId};
pub use novelty::{NoveltyCheckpoint, NoveltyDetector};
pub use policy::{ActionDistribution, DecisionPoint, Policy, TablePolicy, UniformPolicy};
pub use pool::StrategyPool;
pub use select::{
    Baseline, CandidateScore, Fallback, PayoffMatrix, Selection, SelectionRequest, Selector,
    SelectorConfig, Valuation,
};

pub struct AppInfo;

impl AppInfo {
    pub const fn name() -> &'static str {
        "stratformer"
    }

    pub const fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }
}
