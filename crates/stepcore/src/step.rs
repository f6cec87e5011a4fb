use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Operation category of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    ScanLeads,
    EnrichLeads,
    ComposeOutreach,
    SendEmail,
    TrackResponse,
    FollowUp,
    ScheduleMeeting,
    UpdateCrm,
    GenerateReport,
    Custom,
}

impl StepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::ScanLeads => "scan_leads",
            StepType::EnrichLeads => "enrich_leads",
            StepType::ComposeOutreach => "compose_outreach",
            StepType::SendEmail => "send_email",
            StepType::TrackResponse => "track_response",
            StepType::FollowUp => "follow_up",
            StepType::ScheduleMeeting => "schedule_meeting",
            StepType::UpdateCrm => "update_crm",
            StepType::GenerateReport => "generate_report",
            StepType::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// One schedulable unit of work in a template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: String,
    pub name: String,
    pub step_type: StepType,
    #[serde(default)]
    pub agent_class: Option<String>,
    #[serde(default)]
    pub function_name: Option<String>,
    /// Static parameters; string values may carry `{{var}}` placeholders
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub parallel_group: Option<String>,
    /// Expression evaluated against the execution context before running
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: Priority,
    /// Seconds
    #[serde(default = "default_estimated_duration")]
    pub estimated_duration: u64,
    #[serde(default)]
    pub cost_estimate: f64,
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5_000
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_estimated_duration() -> u64 {
    60
}

impl Step {
    pub fn new(step_id: impl Into<String>, name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            step_id: step_id.into(),
            name: name.into(),
            step_type,
            agent_class: None,
            function_name: None,
            parameters: Map::new(),
            dependencies: Vec::new(),
            parallel_group: None,
            condition: None,
            retry_count: default_retry_count(),
            retry_delay_ms: default_retry_delay_ms(),
            timeout_ms: default_timeout_ms(),
            priority: Priority::default(),
            estimated_duration: default_estimated_duration(),
            cost_estimate: 0.0,
        }
    }

    /// Bind this step to `function` on the agent registered as `agent_class`
    pub fn with_agent(mut self, agent_class: impl Into<String>, function: impl Into<String>) -> Self {
        self.agent_class = Some(agent_class.into());
        self.function_name = Some(function.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.dependencies.push(step_id.into());
        self
    }

    pub fn with_parallel_group(mut self, group: impl Into<String>) -> Self {
        self.parallel_group = Some(group.into());
        self
    }

    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = Some(condition.into());
        self
    }

    pub fn with_retry(mut self, retry_count: u32, retry_delay_ms: u64) -> Self {
        self.retry_count = retry_count;
        self.retry_delay_ms = retry_delay_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_estimate(mut self, duration_secs: u64, cost: f64) -> Self {
        self.estimated_duration = duration_secs;
        self.cost_estimate = cost;
        self
    }
}
