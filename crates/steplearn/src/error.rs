use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LearnError {
    #[error("A/B test not found: {0}")]
    AbTestNotFound(String),

    #[error("Unknown variant '{variant}' for A/B test {test_id}")]
    UnknownVariant { test_id: String, variant: String },

    #[error("Non-finite value {value} for metric '{metric}'")]
    NonFiniteValue { metric: String, value: f64 },

    #[error("{detector} detection failed: {reason}")]
    Detection { detector: String, reason: String },
}
