use crate::config::AdaptiveConfig;
use crate::model::{short_id, DataPoint, Pattern, PatternType};
use crate::stats::{self, Outliers};
use crate::LearnError;
use chrono::{DateTime, Timelike, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// A pattern plus the key that identifies its subject across sweeps
#[derive(Debug, Clone)]
pub struct Finding {
    pub signature: String,
    pub pattern: Pattern,
}

/// One family of pattern detection over a snapshot of data points
pub trait PatternDetector: Send + Sync {
    fn pattern_type(&self) -> PatternType;

    fn detect(&self, data: &[DataPoint], config: &AdaptiveConfig) -> Result<Vec<Finding>, LearnError>;
}

/// The five standard detectors
pub fn default_detectors() -> Vec<Box<dyn PatternDetector>> {
    vec![
        Box::new(PerformanceDetector),
        Box::new(BehavioralDetector),
        Box::new(TemporalDetector),
        Box::new(OutcomeDetector),
        Box::new(AnomalyDetector),
    ]
}

const MIN_TREND_SAMPLES: usize = 10;
const MIN_TREND_CONFIDENCE: f64 = 0.6;
const MIN_COST_SAMPLES: usize = 5;
const MIN_SEQUENCE_POINTS: usize = 20;
const MIN_TEMPORAL_HOURS: usize = 3;
const TEMPORAL_IMPROVEMENT: f64 = 0.2;
const TEMPORAL_CONFIDENCE: f64 = 0.8;
/// Hours within this fraction of the best or worst average are grouped with it
const HOUR_BAND: f64 = 0.1;
const SUCCESS_THRESHOLD: f64 = 0.8;
const MIN_OUTCOME_SAMPLES: usize = 10;
const LOW_SUCCESS_RATE: f64 = 0.7;
const OUTCOME_CONFIDENCE: f64 = 0.7;
const MIN_ANOMALY_SAMPLES: usize = 20;
const MIN_ANOMALIES: usize = 3;
const ANOMALY_CONFIDENCE: f64 = 0.7;

struct PatternDraft {
    pattern_type: PatternType,
    prefix: &'static str,
    name: String,
    description: String,
    confidence: f64,
    last_seen: DateTime<Utc>,
    frequency: usize,
    context_conditions: Map<String, Value>,
    impact_metrics: BTreeMap<String, f64>,
    recommendations: Vec<String>,
}

impl PatternDraft {
    fn build(self) -> Pattern {
        Pattern {
            pattern_id: short_id(self.prefix),
            pattern_type: self.pattern_type,
            name: self.name,
            description: self.description,
            confidence: self.confidence.clamp(0.0, 1.0),
            discovered_at: Utc::now(),
            last_seen: self.last_seen,
            frequency: self.frequency,
            context_conditions: self.context_conditions,
            impact_metrics: self.impact_metrics,
            recommendations: self.recommendations,
        }
    }
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn latest(points: &[&DataPoint]) -> DateTime<Utc> {
    points
        .iter()
        .map(|p| p.timestamp)
        .max()
        .unwrap_or_else(Utc::now)
}

/// Group points by key, keeping each group in timestamp order
fn group_by<'a, K: Ord>(
    data: &'a [DataPoint],
    key: impl Fn(&'a DataPoint) -> Option<K>,
) -> BTreeMap<K, Vec<&'a DataPoint>> {
    let mut groups: BTreeMap<K, Vec<&DataPoint>> = BTreeMap::new();
    for point in data {
        if let Some(k) = key(point) {
            groups.entry(k).or_default().push(point);
        }
    }
    for points in groups.values_mut() {
        points.sort_by_key(|p| p.timestamp);
    }
    groups
}

fn values_of(points: &[&DataPoint], metric: &str) -> Vec<f64> {
    points
        .iter()
        .filter(|p| p.metric_name == metric)
        .map(|p| p.value)
        .collect()
}

/// Duration trends and cost outliers per (workflow, step)
pub struct PerformanceDetector;

impl PatternDetector for PerformanceDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Performance
    }

    fn detect(&self, data: &[DataPoint], config: &AdaptiveConfig) -> Result<Vec<Finding>, LearnError> {
        let groups = group_by(data, |p| {
            matches!(p.metric_name.as_str(), "duration" | "cost" | "success_rate")
                .then(|| (p.workflow_id.as_str(), p.step_id.as_str()))
        });

        let mut findings = Vec::new();
        for ((workflow_id, step_id), points) in groups {
            if points.len() < config.min_pattern_frequency {
                continue;
            }

            let durations = values_of(&points, "duration");
            if durations.len() >= MIN_TREND_SAMPLES {
                if let Some(trend) = stats::linear_trend(&durations) {
                    if !trend.slope.is_finite() {
                        return Err(LearnError::Detection {
                            detector: self.pattern_type().as_str().to_string(),
                            reason: format!("non-finite duration slope for {}/{}", workflow_id, step_id),
                        });
                    }
                    let confidence = trend.correlation.abs();
                    if confidence >= MIN_TREND_CONFIDENCE {
                        let direction = if trend.is_increasing() { "increasing" } else { "decreasing" };
                        let pattern = PatternDraft {
                            pattern_type: PatternType::Performance,
                            prefix: "perf",
                            name: format!("Duration Trend in {}", step_id),
                            description: format!("Detected {} trend in step duration", direction),
                            confidence,
                            last_seen: latest(&points),
                            frequency: durations.len(),
                            context_conditions: object(json!({
                                "workflow_id": workflow_id,
                                "step_id": step_id,
                                "direction": direction,
                            })),
                            impact_metrics: BTreeMap::from([
                                ("duration_change".to_string(), trend.relative_change(durations.len())),
                                ("slope".to_string(), trend.slope),
                            ]),
                            recommendations: vec![format!("Investigate {} trend in {}", direction, step_id)],
                        }
                        .build();
                        findings.push(Finding {
                            signature: format!("performance:duration:{}:{}", workflow_id, step_id),
                            pattern,
                        });
                    }
                }
            }

            let costs = values_of(&points, "cost");
            if costs.len() >= MIN_COST_SAMPLES {
                if let Some(outliers) = stats::iqr_outliers(&costs) {
                    let pattern = PatternDraft {
                        pattern_type: PatternType::Performance,
                        prefix: "cost_anom",
                        name: format!("Cost Anomalies in {}", step_id),
                        description: format!("Detected {} cost anomalies", outliers.count),
                        confidence: outliers.confidence(),
                        last_seen: latest(&points),
                        frequency: outliers.count,
                        context_conditions: object(json!({"workflow_id": workflow_id, "step_id": step_id})),
                        impact_metrics: BTreeMap::from([(
                            "anomaly_magnitude".to_string(),
                            outliers.max_deviation,
                        )]),
                        recommendations: vec!["Review cost drivers for this step".to_string()],
                    }
                    .build();
                    findings.push(Finding {
                        signature: format!("performance:cost:{}:{}", workflow_id, step_id),
                        pattern,
                    });
                }
            }
        }
        Ok(findings)
    }
}

/// Frequently repeated step sequences within a workflow
pub struct BehavioralDetector;

impl PatternDetector for BehavioralDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Behavioral
    }

    fn detect(&self, data: &[DataPoint], config: &AdaptiveConfig) -> Result<Vec<Finding>, LearnError> {
        let groups = group_by(data, |p| Some(p.workflow_id.as_str()));

        let mut findings = Vec::new();
        for (workflow_id, points) in groups {
            if points.len() < MIN_SEQUENCE_POINTS {
                continue;
            }
            let sequence: Vec<String> = points.iter().map(|p| p.step_id.clone()).collect();
            let last_seen = latest(&points);

            for (subsequence, frequency) in stats::common_subsequences(&sequence) {
                if frequency < config.min_pattern_frequency {
                    continue;
                }
                let pattern = PatternDraft {
                    pattern_type: PatternType::Behavioral,
                    prefix: "behav",
                    name: "Common Execution Pattern".to_string(),
                    description: format!("Frequent execution sequence: {}", subsequence),
                    confidence: (frequency as f64 / sequence.len() as f64).min(0.9),
                    last_seen,
                    frequency,
                    context_conditions: object(json!({
                        "workflow_id": workflow_id,
                        "sequence": subsequence,
                    })),
                    impact_metrics: BTreeMap::from([("sequence_frequency".to_string(), frequency as f64)]),
                    recommendations: vec!["Consider optimizing this common execution path".to_string()],
                }
                .build();
                findings.push(Finding {
                    signature: format!("behavioral:{}:{}", workflow_id, subsequence),
                    pattern,
                });
            }
        }
        Ok(findings)
    }
}

/// Hour-of-day effects on step duration
pub struct TemporalDetector;

impl PatternDetector for TemporalDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Temporal
    }

    fn detect(&self, data: &[DataPoint], config: &AdaptiveConfig) -> Result<Vec<Finding>, LearnError> {
        let by_hour = group_by(data, |p| (p.metric_name == "duration").then(|| p.timestamp.hour()));

        let hourly: Vec<(u32, f64)> = by_hour
            .iter()
            .filter(|(_, points)| points.len() >= config.min_pattern_frequency)
            .filter_map(|(hour, points)| {
                let values: Vec<f64> = points.iter().map(|p| p.value).collect();
                stats::mean(&values).map(|avg| (*hour, avg))
            })
            .collect();
        if hourly.len() < MIN_TEMPORAL_HOURS {
            return Ok(Vec::new());
        }

        let best = hourly.iter().copied().min_by(|a, b| a.1.total_cmp(&b.1));
        let worst = hourly.iter().copied().max_by(|a, b| a.1.total_cmp(&b.1));
        let (Some((best_hour, best_avg)), Some((worst_hour, worst_avg))) = (best, worst) else {
            return Ok(Vec::new());
        };
        if best_avg <= 0.0 {
            return Ok(Vec::new());
        }

        let improvement = (worst_avg - best_avg) / best_avg;
        if improvement <= TEMPORAL_IMPROVEMENT {
            return Ok(Vec::new());
        }

        let optimal_hours: Vec<u32> = hourly
            .iter()
            .filter(|(_, avg)| *avg <= best_avg * (1.0 + HOUR_BAND))
            .map(|(hour, _)| *hour)
            .collect();
        let avoid_hours: Vec<u32> = hourly
            .iter()
            .filter(|(_, avg)| *avg >= worst_avg * (1.0 - HOUR_BAND))
            .map(|(hour, _)| *hour)
            .collect();

        let last_seen = data
            .iter()
            .filter(|p| p.metric_name == "duration")
            .map(|p| p.timestamp)
            .max()
            .unwrap_or_else(Utc::now);

        let pattern = PatternDraft {
            pattern_type: PatternType::Temporal,
            prefix: "temporal_hourly",
            name: "Optimal Execution Hours".to_string(),
            description: format!(
                "Performance varies by hour: best at {}:00, worst at {}:00",
                best_hour, worst_hour
            ),
            confidence: TEMPORAL_CONFIDENCE,
            last_seen,
            frequency: hourly.len(),
            context_conditions: object(json!({
                "time_pattern": "hourly",
                "optimal_hours": optimal_hours,
                "avoid_hours": avoid_hours,
            })),
            impact_metrics: BTreeMap::from([("potential_improvement".to_string(), improvement)]),
            recommendations: vec![format!("Schedule critical workflows during hour {}", best_hour)],
        }
        .build();

        Ok(vec![Finding {
            signature: "temporal:hourly".to_string(),
            pattern,
        }])
    }
}

/// Steps whose success rate is persistently low, with shared failure context
pub struct OutcomeDetector;

impl PatternDetector for OutcomeDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Outcome
    }

    fn detect(&self, data: &[DataPoint], config: &AdaptiveConfig) -> Result<Vec<Finding>, LearnError> {
        let min_samples = MIN_OUTCOME_SAMPLES.max(config.min_pattern_frequency);
        let groups = group_by(data, |p| {
            (p.metric_name == "success_rate").then(|| (p.workflow_id.as_str(), p.step_id.as_str()))
        });

        let mut findings = Vec::new();
        for ((workflow_id, step_id), points) in groups {
            if points.len() < min_samples {
                continue;
            }
            let (successes, failures): (Vec<&DataPoint>, Vec<&DataPoint>) =
                points.iter().copied().partition(|p| p.value > SUCCESS_THRESHOLD);
            let success_rate = successes.len() as f64 / points.len() as f64;
            if success_rate >= LOW_SUCCESS_RATE {
                continue;
            }

            let failing_contexts: Vec<&Map<String, Value>> = failures.iter().map(|p| &p.context).collect();
            let factors = stats::common_context_factors(&failing_contexts);

            let pattern = PatternDraft {
                pattern_type: PatternType::Outcome,
                prefix: "outcome",
                name: "Low Success Rate Pattern".to_string(),
                description: format!(
                    "Success rate of {:.1}% with common factors: {}",
                    success_rate * 100.0,
                    Value::Object(factors.clone())
                ),
                confidence: OUTCOME_CONFIDENCE,
                last_seen: latest(&points),
                frequency: failures.len(),
                context_conditions: object(json!({
                    "workflow_id": workflow_id,
                    "step_id": step_id,
                    "failure_factors": factors,
                })),
                impact_metrics: BTreeMap::from([("success_rate".to_string(), success_rate)]),
                recommendations: vec!["Address common failure factors".to_string()],
            }
            .build();
            findings.push(Finding {
                signature: format!("outcome:{}:{}", workflow_id, step_id),
                pattern,
            });
        }
        Ok(findings)
    }
}

/// Repeated IQR outliers in any metric of a (workflow, step)
pub struct AnomalyDetector;

impl PatternDetector for AnomalyDetector {
    fn pattern_type(&self) -> PatternType {
        PatternType::Anomaly
    }

    fn detect(&self, data: &[DataPoint], config: &AdaptiveConfig) -> Result<Vec<Finding>, LearnError> {
        let min_samples = MIN_ANOMALY_SAMPLES.max(config.min_pattern_frequency);
        let groups = group_by(data, |p| {
            Some((p.workflow_id.as_str(), p.step_id.as_str(), p.metric_name.as_str()))
        });

        let mut findings = Vec::new();
        for ((workflow_id, step_id, metric), points) in groups {
            if points.len() < min_samples {
                continue;
            }
            let values: Vec<f64> = points.iter().map(|p| p.value).collect();
            let Some(outliers) = stats::iqr_outliers(&values) else {
                continue;
            };
            if !is_significant(&outliers) {
                continue;
            }

            let pattern = PatternDraft {
                pattern_type: PatternType::Anomaly,
                prefix: "anomaly",
                name: format!("Statistical Anomaly in {}", metric),
                description: format!("Detected {} statistical anomalies", outliers.count),
                confidence: outliers.confidence(),
                last_seen: latest(&points),
                frequency: outliers.count,
                context_conditions: object(json!({
                    "workflow_id": workflow_id,
                    "step_id": step_id,
                    "metric": metric,
                })),
                impact_metrics: BTreeMap::from([
                    ("anomaly_magnitude".to_string(), outliers.max_deviation),
                    ("lower_bound".to_string(), outliers.lower_fence),
                    ("upper_bound".to_string(), outliers.upper_fence),
                ]),
                recommendations: vec!["Investigate root cause of anomalies".to_string()],
            }
            .build();
            findings.push(Finding {
                signature: format!("anomaly:{}:{}:{}", workflow_id, step_id, metric),
                pattern,
            });
        }
        Ok(findings)
    }
}

fn is_significant(outliers: &Outliers) -> bool {
    outliers.count >= MIN_ANOMALIES && outliers.confidence() > ANOMALY_CONFIDENCE
}
