use crate::{ExecutionStatus, StepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    WorkflowStarted {
        execution_id: String,
        template_id: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: String,
        status: ExecutionStatus,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    StepStarted {
        execution_id: String,
        step_id: String,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
    StepCompleted {
        execution_id: String,
        step_id: String,
        result: StepResult,
        timestamp: DateTime<Utc>,
    },
    StepFailed {
        execution_id: String,
        step_id: String,
        result: StepResult,
        timestamp: DateTime<Utc>,
    },
    StepSkipped {
        execution_id: String,
        step_id: String,
        timestamp: DateTime<Utc>,
    },
    StepRetrying {
        execution_id: String,
        step_id: String,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    StepEvent {
        execution_id: String,
        step_id: String,
        event: StepEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            ExecutionEvent::WorkflowStarted { execution_id, .. }
            | ExecutionEvent::WorkflowCompleted { execution_id, .. }
            | ExecutionEvent::StepStarted { execution_id, .. }
            | ExecutionEvent::StepCompleted { execution_id, .. }
            | ExecutionEvent::StepFailed { execution_id, .. }
            | ExecutionEvent::StepSkipped { execution_id, .. }
            | ExecutionEvent::StepRetrying { execution_id, .. }
            | ExecutionEvent::StepEvent { execution_id, .. } => execution_id,
        }
    }
}

/// Events raised by agents while a step runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum StepEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
    Data { key: String, value: Value },
}

/// Event emitter for agents to send real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: String,
    step_id: String,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: impl Into<String>,
        step_id: impl Into<String>,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            step_id: step_id.into(),
            sender,
        }
    }

    pub fn emit(&self, event: StepEvent) {
        let _ = self.sender.send(ExecutionEvent::StepEvent {
            execution_id: self.execution_id.clone(),
            step_id: self.step_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(StepEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(StepEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(StepEvent::Progress { percent, message });
    }

    pub fn data(&self, key: impl Into<String>, value: Value) {
        self.emit(StepEvent::Data {
            key: key.into(),
            value,
        });
    }
}

/// Broadcast channel shared by every execution of one orchestrator
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: &str, step_id: &str) -> EventEmitter {
        EventEmitter::new(execution_id, step_id, self.sender.clone())
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}
