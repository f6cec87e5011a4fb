//! Standard agent library
//!
//! Built-in agents for common step operations, mock sales agents, and the
//! default workflow templates they back.

mod debug;
mod sales;
mod templates;
mod time;
mod transform;

pub use debug::DebugAgent;
pub use sales::{LeadScannerAgent, OutreachComposerAgent};
pub use templates::default_templates;
pub use time::DelayAgent;
pub use transform::TransformAgent;

use std::sync::Arc;
use stepruntime::Orchestrator;

/// Register all standard agents with an orchestrator under their class names
pub async fn register_all(orchestrator: &Orchestrator) {
    orchestrator.register_agent("DebugAgent", Arc::new(DebugAgent)).await;
    orchestrator.register_agent("DelayAgent", Arc::new(DelayAgent)).await;
    orchestrator.register_agent("TransformAgent", Arc::new(TransformAgent)).await;
    orchestrator
        .register_agent("LeadScannerAgent", Arc::new(LeadScannerAgent::default()))
        .await;
    orchestrator
        .register_agent("OutreachComposerAgent", Arc::new(OutreachComposerAgent::default()))
        .await;
}
