//! Core abstractions for stepflow
//!
//! Workflow templates, executions and their step results, the condition
//! language steps are gated on, and the agent interface the orchestrator
//! dispatches to. Runtime concerns live in `stepruntime`.

mod agent;
pub mod condition;
mod error;
pub mod events;
mod execution;
mod step;
mod template;

pub use agent::{Agent, StepContext, StepOutput};
pub use condition::{evaluate_condition, Condition};
pub use error::{ConditionError, StepError, TemplateError};
pub use events::*;
pub use execution::{
    new_execution_id, Execution, ExecutionId, ExecutionSnapshot, ExecutionStatus, StepErrorKind,
    StepResult, StepStatus, WorkflowMetrics,
};
pub use step::{Priority, Step, StepType};
pub use template::{StepId, Template, TemplateId};
