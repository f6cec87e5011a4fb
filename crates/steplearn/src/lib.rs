//! Adaptive learning over workflow execution metrics
//!
//! Data points recorded from executions are swept by a set of pattern
//! detectors; confident patterns become insights and recommendations.
//! A/B tests compare parameter variants with Welch's t-test.

mod config;
mod detectors;
mod error;
mod model;
pub mod stats;
mod synthesis;
mod system;

pub use config::AdaptiveConfig;
pub use detectors::{
    default_detectors, AnomalyDetector, BehavioralDetector, Finding, OutcomeDetector, PatternDetector,
    PerformanceDetector, TemporalDetector,
};
pub use error::LearnError;
pub use model::{
    AbTest, AbTestAnalysis, AbTestResult, AbTestStatus, ConfidenceLevel, DataPoint, Effort, InsightStatus,
    InsightsSummary, LearningInsight, Pattern, PatternType, Recommendation, RecommendationType, VariantStats,
};
pub use synthesis::{insight_for, recommendations_for};
pub use system::AdaptiveSystem;
