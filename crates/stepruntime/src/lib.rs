//! Workflow orchestration runtime
//!
//! Holds the template and agent registries, runs executions as DAGs of
//! concurrent batches, and keeps the per-template metrics used for
//! bottleneck analysis.

mod analysis;
mod builtin;
mod error;
mod executor;
mod params;
mod registry;
mod runtime;
mod state;

pub use analysis::{analyze, AnalysisThresholds, PerformanceReport, StepTiming};
pub use builtin::BuiltinHandler;
pub use error::OrchestratorError;
pub use executor::{ExecutionEnv, WorkflowExecutor};
pub use params::resolve_parameters;
pub use registry::{AgentRegistry, FnAgent};
pub use runtime::{Orchestrator, RuntimeConfig};
pub use state::{ExecutionStore, PerformanceTracker};
