use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use uuid::Uuid;

/// `prefix_xxxxxxxx` identifier
pub(crate) fn short_id(prefix: &str) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &hex[..8])
}

/// One observed metric value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub workflow_id: String,
    pub step_id: String,
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub context: Map<String, Value>,
}

impl DataPoint {
    pub fn new(
        workflow_id: impl Into<String>,
        step_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            workflow_id: workflow_id.into(),
            step_id: step_id.into(),
            metric_name: metric_name.into(),
            value,
            context: Map::new(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.context = context;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Performance,
    Behavioral,
    Temporal,
    Outcome,
    Anomaly,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::Performance => "performance",
            PatternType::Behavioral => "behavioral",
            PatternType::Temporal => "temporal",
            PatternType::Outcome => "outcome",
            PatternType::Anomaly => "anomaly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
    VeryHigh,
}

/// A regularity found in the historical data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pattern {
    pub pattern_id: String,
    pub pattern_type: PatternType,
    pub name: String,
    pub description: String,
    pub confidence: f64,
    pub discovered_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frequency: usize,
    pub context_conditions: Map<String, Value>,
    pub impact_metrics: BTreeMap<String, f64>,
    pub recommendations: Vec<String>,
}

impl Pattern {
    pub fn confidence_level(&self) -> ConfidenceLevel {
        match self.confidence {
            c if c >= 0.95 => ConfidenceLevel::VeryHigh,
            c if c >= 0.85 => ConfidenceLevel::High,
            c if c >= 0.7 => ConfidenceLevel::Medium,
            _ => ConfidenceLevel::Low,
        }
    }

    pub fn impact(&self, metric: &str) -> Option<f64> {
        self.impact_metrics.get(metric).copied()
    }

    pub fn condition_str(&self, key: &str) -> Option<&str> {
        self.context_conditions.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightStatus {
    #[default]
    New,
    Reviewed,
    Implemented,
    Dismissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// Human-facing conclusion drawn from one or more patterns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningInsight {
    pub insight_id: String,
    pub title: String,
    pub description: String,
    pub insight_type: String,
    /// 1 (lowest) to 10
    pub priority: u8,
    pub confidence: f64,
    pub supporting_patterns: Vec<String>,
    pub potential_impact: String,
    pub implementation_effort: Effort,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub status: InsightStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationType {
    Optimization,
    WorkflowChange,
    ParameterTuning,
    ResourceAllocation,
    TimingAdjustment,
    AgentSelection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommendation_id: String,
    pub recommendation_type: RecommendationType,
    pub title: String,
    pub description: String,
    pub target_workflow: Option<String>,
    pub target_step: Option<String>,
    pub suggested_changes: Map<String, Value>,
    pub expected_improvement: BTreeMap<String, f64>,
    pub confidence: f64,
    pub priority: u8,
    pub implementation_complexity: Effort,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Recommendation {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbTestStatus {
    #[default]
    Draft,
    Running,
    Completed,
    Paused,
}

/// Controlled experiment comparing parameter variants of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTest {
    #[serde(default = "default_test_id")]
    pub test_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub hypothesis: String,
    pub workflow_id: String,
    #[serde(default)]
    pub step_id: Option<String>,
    /// Variant name to the parameters it runs with
    pub variants: BTreeMap<String, Map<String, Value>>,
    /// Variant name to its share of traffic
    #[serde(default)]
    pub traffic_allocation: BTreeMap<String, f64>,
    #[serde(default)]
    pub success_metrics: Vec<String>,
    #[serde(default = "Utc::now")]
    pub start_date: DateTime<Utc>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status: AbTestStatus,
    #[serde(default)]
    pub winner: Option<String>,
}

fn default_test_id() -> String {
    short_id("test")
}

impl AbTest {
    /// Draft test with no variants; each `with_variant` rebalances traffic evenly
    pub fn new(name: impl Into<String>, workflow_id: impl Into<String>) -> Self {
        Self {
            test_id: default_test_id(),
            name: name.into(),
            description: String::new(),
            hypothesis: String::new(),
            workflow_id: workflow_id.into(),
            step_id: None,
            variants: BTreeMap::new(),
            traffic_allocation: BTreeMap::new(),
            success_metrics: Vec::new(),
            start_date: Utc::now(),
            end_date: None,
            status: AbTestStatus::Draft,
            winner: None,
        }
    }

    pub fn with_variant(mut self, name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        self.variants.insert(name.into(), parameters);
        let share = 1.0 / self.variants.len() as f64;
        self.traffic_allocation = self.variants.keys().map(|k| (k.clone(), share)).collect();
        self
    }

    pub fn with_success_metric(mut self, metric: impl Into<String>) -> Self {
        self.success_metrics.push(metric.into());
        self
    }

    pub fn with_hypothesis(mut self, hypothesis: impl Into<String>) -> Self {
        self.hypothesis = hypothesis.into();
        self
    }

    /// The metric a winner is chosen on
    pub fn primary_metric(&self) -> &str {
        self.success_metrics
            .first()
            .map(String::as_str)
            .unwrap_or("conversion_rate")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbTestResult {
    pub test_id: String,
    pub variant: String,
    pub metric: String,
    pub value: f64,
    pub sample_size: u64,
    pub confidence_interval: (f64, f64),
    pub p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub mean: f64,
    pub std_dev: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbTestAnalysis {
    pub test_id: String,
    pub primary_metric: String,
    pub variants: BTreeMap<String, VariantStats>,
    pub winner: Option<String>,
    pub runner_up: Option<String>,
    /// 1 - p of Welch's t-test between winner and runner-up
    pub confidence: f64,
    pub p_value: Option<f64>,
    pub significant: bool,
    pub recommendation: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InsightsSummary {
    pub total_insights: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_priority: BTreeMap<u8, usize>,
    pub high_priority: usize,
    pub recent_insights: usize,
}
