use chrono::Utc;
use serde_json::{json, Map, Value};
use stepcore::{Step, StepContext, StepError, StepOutput, StepType};
use tokio::time::{sleep, Duration};

/// Fallback for steps with no registered agent function
///
/// `custom` steps echo their resolved parameters; every other step type
/// simulates work for a short delay and reports what it would have done.
#[derive(Debug, Clone, Copy)]
pub struct BuiltinHandler {
    delay: Duration,
}

impl BuiltinHandler {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub async fn handle(&self, step: &Step, ctx: &StepContext) -> Result<StepOutput, StepError> {
        let parameters: Map<String, Value> = step
            .parameters
            .keys()
            .filter_map(|k| ctx.params.get(k).map(|v| (k.clone(), v.clone())))
            .collect();

        if step.step_type == StepType::Custom {
            return Ok(StepOutput::from(parameters));
        }

        tracing::debug!(step_id = %step.step_id, step_type = step.step_type.as_str(), "Running builtin step");

        if !self.delay.is_zero() {
            sleep(self.delay).await;
        }

        Ok(StepOutput::new()
            .with("step_type", step.step_type.as_str())
            .with("executed_at", Utc::now().to_rfc3339())
            .with("parameters", json!(parameters)))
    }
}
