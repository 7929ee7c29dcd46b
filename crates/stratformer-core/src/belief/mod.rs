//! Opponent belief tracking.
//!
//! - `tracker`: log-space Bayesian posterior over a closed hypothesis set.
//! - `likelihood`: turns observed opponent actions into per-strategy evidence.

mod likelihood;
mod tracker;

pub use likelihood::{Observation, PolicyLikelihood};
pub use tracker::{PRIOR_TOLERANCE, PosteriorTracker, TrackerCheckpoint};
