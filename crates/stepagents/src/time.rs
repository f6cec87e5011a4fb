use async_trait::async_trait;
use stepcore::{Agent, StepContext, StepError, StepOutput};
use tokio::time::{sleep, Duration};

/// Delay a step for a specified duration
pub struct DelayAgent;

#[async_trait]
impl Agent for DelayAgent {
    fn functions(&self) -> Vec<String> {
        vec!["delay".to_string()]
    }

    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError> {
        if function != "delay" {
            return Err(StepError::failed(format!("DelayAgent has no function '{}'", function)));
        }

        // Default to 1 second if not specified
        let delay_ms = match ctx.params.get("delay_ms") {
            None => 1000,
            Some(v) => v.as_u64().ok_or_else(|| StepError::InvalidParameter {
                field: "delay_ms".to_string(),
                expected: "non-negative integer".to_string(),
            })?,
        };

        ctx.events.info(format!("Delaying for {}ms", delay_ms));

        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => {}
            _ = ctx.cancellation.cancelled() => return Err(StepError::Cancelled),
        }

        Ok(StepOutput::new().with("delayed_ms", delay_ms))
    }
}
