use serde::{Deserialize, Serialize};

/// Thresholds and housekeeping settings for the adaptive system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Minimum number of observations before a group can yield a pattern
    pub min_pattern_frequency: usize,
    /// Patterns below this confidence produce no insights
    pub min_confidence_threshold: f64,
    /// Patterns below this confidence produce no recommendations
    pub recommendation_confidence: f64,
    pub data_retention_days: i64,
    /// Every n-th stored data point triggers a background sweep; 0 disables it
    pub sweep_interval: u64,
    pub recommendation_ttl_days: i64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            min_pattern_frequency: 5,
            min_confidence_threshold: 0.6,
            recommendation_confidence: 0.7,
            data_retention_days: 90,
            sweep_interval: 100,
            recommendation_ttl_days: 30,
        }
    }
}
