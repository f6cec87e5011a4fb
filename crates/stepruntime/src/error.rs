use stepcore::TemplateError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OrchestratorError {
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),

    #[error("Invalid template: {0}")]
    Template(#[from] TemplateError),

    #[error("Orchestrator is shutting down")]
    ShuttingDown,
}
