use async_trait::async_trait;
use stepcore::{Agent, StepContext, StepError, StepOutput};

/// Simple debug agent that logs its parameters
pub struct DebugAgent;

#[async_trait]
impl Agent for DebugAgent {
    fn functions(&self) -> Vec<String> {
        vec!["log".to_string()]
    }

    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError> {
        if function != "log" {
            return Err(StepError::failed(format!("DebugAgent has no function '{}'", function)));
        }

        let message = ctx.param_str("message").unwrap_or("(no message)").to_string();

        ctx.events.info(format!("DEBUG: {}", message));
        tracing::info!(execution_id = %ctx.execution_id, step_id = %ctx.step_id, "DEBUG: {}", message);

        // Also log all parameters for visibility
        for (key, value) in &ctx.params {
            ctx.events.info(format!("  {}: {}", key, value));
        }

        Ok(StepOutput::new().with("message", message))
    }
}
