use serde::{Deserialize, Serialize};
use stratformer_core::{NoveltyCheckpoint, PosteriorDistribution, Selection, TrackerCheckpoint};

/// Everything one round of the loop produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundDecision {
    /// 1-based index of the round within the session.
    pub round: u64,
    pub posterior: PosteriorDistribution,
    pub novelty: bool,
    pub selection: Selection,
}

impl RoundDecision {
    pub fn max_posterior(&self) -> f64 {
        self.posterior.max_mass()
    }

    pub fn fallback_label(&self) -> Option<&'static str> {
        self.selection.fallback.map(|f| f.as_str())
    }
}

/// Serializable session state: the tracker's log-posterior vector and the
/// detector's window, both order-preserving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionCheckpoint {
    pub rounds: u64,
    pub tracker: TrackerCheckpoint,
    pub novelty: NoveltyCheckpoint,
}
