use thiserror::Error;

/// Failure of a single step attempt
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Invalid parameter '{field}': expected {expected}")]
    InvalidParameter { field: String, expected: String },

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Upstream step '{0}' failed")]
    UpstreamFailed(String),
}

impl StepError {
    pub fn failed(message: impl Into<String>) -> Self {
        StepError::ExecutionFailed(message.into())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),

    #[error("Step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("Cyclic dependency detected at step '{0}'")]
    CyclicDependency(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConditionError {
    #[error("Unexpected character '{ch}' at offset {offset}")]
    UnexpectedChar { ch: char, offset: usize },

    #[error("Unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    #[error("Unexpected token {found} (expected {expected})")]
    UnexpectedToken { found: String, expected: String },

    #[error("Unexpected end of expression")]
    UnexpectedEnd,

    #[error("Cannot compare {left} with {right}")]
    Incomparable { left: String, right: String },

    #[error("len() is not defined for {0}")]
    NoLength(String),
}
