pub mod agent;
pub mod session;

pub use agent::{AdaptiveAgent, ValuationSource};
pub use session::{RoundDecision, SessionCheckpoint};
