use crate::{Priority, StepError, Template};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

pub type ExecutionId = String;

/// Generate an `exec_xxxxxxxx` identifier
pub fn new_execution_id() -> ExecutionId {
    let hex = Uuid::new_v4().simple().to_string();
    format!("exec_{}", &hex[..8])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Completed, failed, or skipped
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Error,
    Timeout,
    Cancelled,
    UpstreamFailed,
}

impl From<&StepError> for StepErrorKind {
    fn from(err: &StepError) -> Self {
        match err {
            StepError::Timeout { .. } => StepErrorKind::Timeout,
            StepError::Cancelled => StepErrorKind::Cancelled,
            StepError::UpstreamFailed(_) => StepErrorKind::UpstreamFailed,
            _ => StepErrorKind::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub result_data: Map<String, Value>,
    pub error_message: Option<String>,
    pub error_kind: Option<StepErrorKind>,
    /// Zero-based index of the last attempt made
    pub retry_attempts: u32,
    pub cost_actual: f64,
}

impl StepResult {
    pub fn new(step_id: impl Into<String>, status: StepStatus) -> Self {
        Self {
            step_id: step_id.into(),
            status,
            start_time: None,
            end_time: None,
            duration_seconds: None,
            result_data: Map::new(),
            error_message: None,
            error_kind: None,
            retry_attempts: 0,
            cost_actual: 0.0,
        }
    }

    pub fn running(step_id: impl Into<String>) -> Self {
        let mut result = Self::new(step_id, StepStatus::Running);
        result.start_time = Some(Utc::now());
        result
    }

    pub fn skipped(step_id: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut result = Self::new(step_id, StepStatus::Skipped);
        result.start_time = Some(now);
        result.end_time = Some(now);
        result.duration_seconds = Some(0.0);
        result
    }

    pub fn complete(&mut self, data: Map<String, Value>, cost: f64) {
        self.status = StepStatus::Completed;
        self.result_data = data;
        self.cost_actual = cost;
        self.finish();
    }

    pub fn fail(&mut self, error: &StepError) {
        self.status = StepStatus::Failed;
        self.error_message = Some(error.to_string());
        self.error_kind = Some(StepErrorKind::from(error));
        self.finish();
    }

    fn finish(&mut self) {
        let end = Utc::now();
        let start = *self.start_time.get_or_insert(end);
        self.end_time = Some(end);
        self.duration_seconds = Some((end - start).num_microseconds().unwrap_or(0) as f64 / 1_000_000.0);
    }
}

/// One run of a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub execution_id: ExecutionId,
    pub template_id: String,
    pub template_name: String,
    pub status: ExecutionStatus,
    pub parameters: Map<String, Value>,
    pub step_results: BTreeMap<String, StepResult>,
    /// Data shared between steps; successful step payloads are merged in
    pub context_data: Map<String, Value>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub total_duration: Option<f64>,
    pub total_cost: f64,
    pub priority: Priority,
    pub created_by: String,
    pub tags: Vec<String>,
    pub error: Option<String>,
}

impl Execution {
    /// Create a pending execution; template defaults are overlaid by `parameters`
    pub fn new(template: &Template, parameters: Map<String, Value>, priority: Priority) -> Self {
        let mut merged = template.default_parameters.clone();
        merged.extend(parameters);

        Self {
            execution_id: new_execution_id(),
            template_id: template.template_id.clone(),
            template_name: template.name.clone(),
            status: ExecutionStatus::Pending,
            parameters: merged,
            step_results: BTreeMap::new(),
            context_data: Map::new(),
            start_time: Some(Utc::now()),
            end_time: None,
            total_duration: None,
            total_cost: 0.0,
            priority,
            created_by: "system".to_string(),
            tags: template.tags.clone(),
            error: None,
        }
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    pub fn count_with_status(&self, status: StepStatus) -> usize {
        self.step_results.values().filter(|r| r.status == status).count()
    }

    /// Seconds since start, up to `end_time` once finished
    pub fn elapsed_seconds(&self) -> Option<f64> {
        let start = self.start_time?;
        let end = self.end_time.unwrap_or_else(Utc::now);
        Some((end - start).num_milliseconds() as f64 / 1000.0)
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        let end = Utc::now();
        self.status = status;
        self.end_time = Some(end);
        self.total_duration = self.elapsed_seconds();
        self.total_cost = self.step_results.values().map(|r| r.cost_actual).sum();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.finish(ExecutionStatus::Failed);
    }
}

/// Point-in-time view returned by status queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub execution_id: ExecutionId,
    pub template_id: String,
    pub status: ExecutionStatus,
    /// Percentage of steps completed or skipped
    pub progress: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<f64>,
    pub step_results: BTreeMap<String, StepResult>,
    pub error: Option<String>,
}

impl ExecutionSnapshot {
    pub fn capture(execution: &Execution, total_steps: usize) -> Self {
        let done = execution.count_with_status(StepStatus::Completed)
            + execution.count_with_status(StepStatus::Skipped);
        let progress = if total_steps > 0 {
            done as f64 / total_steps as f64 * 100.0
        } else {
            0.0
        };

        Self {
            execution_id: execution.execution_id.clone(),
            template_id: execution.template_id.clone(),
            status: execution.status,
            progress,
            start_time: execution.start_time,
            duration: execution.elapsed_seconds(),
            step_results: execution.step_results.clone(),
            error: execution.error.clone(),
        }
    }
}

/// Aggregate run statistics for one template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowMetrics {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub average_duration: f64,
    pub average_cost: f64,
    pub bottleneck_steps: Vec<String>,
    pub optimization_suggestions: Vec<String>,
    pub last_calculated: DateTime<Utc>,
}

impl Default for WorkflowMetrics {
    fn default() -> Self {
        Self {
            total_executions: 0,
            successful_executions: 0,
            failed_executions: 0,
            average_duration: 0.0,
            average_cost: 0.0,
            bottleneck_steps: Vec::new(),
            optimization_suggestions: Vec::new(),
            last_calculated: Utc::now(),
        }
    }
}

impl WorkflowMetrics {
    /// Fold a terminal execution into the running counters and averages
    pub fn record(&mut self, execution: &Execution) {
        self.total_executions += 1;
        match execution.status {
            ExecutionStatus::Completed => self.successful_executions += 1,
            _ => self.failed_executions += 1,
        }

        let n = self.total_executions as f64;
        if let Some(duration) = execution.total_duration {
            self.average_duration = (self.average_duration * (n - 1.0) + duration) / n;
        }
        self.average_cost = (self.average_cost * (n - 1.0) + execution.total_cost) / n;
        self.last_calculated = Utc::now();
    }

    pub fn failure_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.failed_executions as f64 / self.total_executions as f64
    }
}
