use thiserror::Error;

use crate::id::SubPlanId;

/// Canonical result for core.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid configuration: {0} does not belong to the base plan")]
    ForeignSubPlan(SubPlanId),

    #[error("Hashing error: {0}")]
    Hash(String),

    // Returned by `Plan::validate`; the optimizer turns it into a panic.
    #[error("Internal invariant failed: {0}")]
    Invariant(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Hash(e.to_string())
    }
}
