use crate::{events::EventEmitter, StepError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Capability object that steps invoke by function name
#[async_trait]
pub trait Agent: Send + Sync {
    /// Names of the functions this agent can be called with
    fn functions(&self) -> Vec<String>;

    fn has_function(&self, function: &str) -> bool {
        self.functions().iter().any(|f| f == function)
    }

    /// Invoke `function` for one step attempt
    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError>;
}

/// Everything an agent function receives for one attempt
#[derive(Clone)]
pub struct StepContext {
    pub execution_id: String,
    pub step_id: String,

    /// Resolved step parameters overlaid with the execution parameters
    pub params: Map<String, Value>,

    /// Snapshot of the execution's shared context taken when the batch started
    pub context: Map<String, Value>,

    /// Emitter for progress and log events tied to this step
    pub events: EventEmitter,

    /// Fires when the execution is cancelled or the orchestrator shuts down
    pub cancellation: tokio_util::sync::CancellationToken,
}

impl StepContext {
    pub fn new(execution_id: impl Into<String>, step_id: impl Into<String>, events: EventEmitter) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            params: Map::new(),
            context: Map::new(),
            events,
            cancellation: tokio_util::sync::CancellationToken::new(),
        }
    }

    /// Get required parameter or return error
    pub fn require_param(&self, name: &str) -> Result<&Value, StepError> {
        self.params
            .get(name)
            .ok_or_else(|| StepError::MissingParameter(name.to_string()))
    }

    pub fn param_or(&self, name: &str, default: Value) -> Value {
        self.params.get(name).cloned().unwrap_or(default)
    }

    pub fn param_f64(&self, name: &str) -> Option<f64> {
        self.params.get(name).and_then(Value::as_f64)
    }

    pub fn param_str(&self, name: &str) -> Option<&str> {
        self.params.get(name).and_then(Value::as_str)
    }
}

/// Successful result of an agent call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutput {
    /// Merged into the execution context and recorded on the step result
    pub data: Map<String, Value>,

    /// Actual cost; the step's estimate is used when absent
    pub cost: Option<f64>,
}

impl StepOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

impl From<Map<String, Value>> for StepOutput {
    fn from(data: Map<String, Value>) -> Self {
        Self { data, cost: None }
    }
}

/// Non-object values carry no mergeable data and are stored under `result`
impl From<Value> for StepOutput {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(data) => data.into(),
            Value::Null => Self::default(),
            other => Self::new().with("result", other),
        }
    }
}
