use thiserror::Error;

use crate::model::StrategyId;

/// Failures surfaced by the opponent-modeling core.
#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid prior: {reason}")]
    InvalidPrior { reason: String },

    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },

    #[error("invalid evidence for strategy '{strategy}': log-likelihood {value} is not allowed")]
    InvalidEvidence { strategy: StrategyId, value: f64 },

    #[error("strategy '{0}' is not tracked by this session")]
    UnknownStrategy(StrategyId),

    #[error("evidence eliminated every tracked hypothesis")]
    AllHypothesesEliminated,

    #[error("no candidate strategies provided")]
    EmptyCandidateSet,

    #[error("strategy '{0}' is already registered")]
    DuplicateStrategy(StrategyId),

    #[error("invalid policy '{policy}': {message}")]
    InvalidPolicy { policy: String, message: String },
}

impl Error {
    pub(crate) fn parameter(name: &'static str, message: impl Into<String>) -> Self {
        Error::InvalidParameter {
            name,
            message: message.into(),
        }
    }

    pub(crate) fn prior(reason: impl Into<String>) -> Self {
        Error::InvalidPrior {
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
