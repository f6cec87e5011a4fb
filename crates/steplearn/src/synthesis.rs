use crate::config::AdaptiveConfig;
use crate::model::{short_id, Effort, LearningInsight, Pattern, PatternType, Recommendation, RecommendationType};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

const DEGRADATION_INSIGHT: f64 = 0.2;
const DEGRADATION_RECOMMENDATION: f64 = 0.15;
const LOW_SUCCESS_RATE: f64 = 0.7;

fn is_degrading(pattern: &Pattern, threshold: f64) -> bool {
    pattern.condition_str("direction") == Some("increasing")
        && pattern.impact("duration_change").is_some_and(|c| c > threshold)
}

/// Turn a sufficiently confident pattern into an insight
pub fn insight_for(pattern: &Pattern, config: &AdaptiveConfig, now: DateTime<Utc>) -> Option<LearningInsight> {
    if pattern.confidence < config.min_confidence_threshold {
        return None;
    }

    let insight = |title: &str, description: String, insight_type: &str, priority: u8, impact: String, effort| {
        LearningInsight {
            insight_id: short_id("insight"),
            title: title.to_string(),
            description,
            insight_type: insight_type.to_string(),
            priority,
            confidence: pattern.confidence,
            supporting_patterns: vec![pattern.pattern_id.clone()],
            potential_impact: impact,
            implementation_effort: effort,
            created_at: now,
            status: Default::default(),
        }
    };

    match pattern.pattern_type {
        PatternType::Performance if is_degrading(pattern, DEGRADATION_INSIGHT) => {
            let change = pattern.impact("duration_change").unwrap_or_default();
            Some(insight(
                "Performance Degradation Detected",
                format!("Step performance has degraded by {:.1}%", change * 100.0),
                "performance_alert",
                8,
                "Increased execution time and costs".to_string(),
                Effort::Medium,
            ))
        }
        PatternType::Temporal => {
            let improvement = pattern.impact("potential_improvement")?;
            Some(insight(
                "Optimal Timing Opportunity",
                format!(
                    "Scheduling optimization could improve performance by {:.1}%",
                    improvement * 100.0
                ),
                "optimization_opportunity",
                6,
                format!("Up to {:.1}% performance improvement", improvement * 100.0),
                Effort::Low,
            ))
        }
        PatternType::Outcome => {
            let success_rate = pattern.impact("success_rate").filter(|r| *r < LOW_SUCCESS_RATE)?;
            Some(insight(
                "Low Success Rate Issue",
                format!(
                    "Success rate of {:.1}% indicates systemic issues",
                    success_rate * 100.0
                ),
                "quality_alert",
                9,
                "Improved reliability and user satisfaction".to_string(),
                Effort::High,
            ))
        }
        _ => None,
    }
}

/// Actionable recommendations for a pattern, expiring after the configured TTL
pub fn recommendations_for(pattern: &Pattern, config: &AdaptiveConfig, now: DateTime<Utc>) -> Vec<Recommendation> {
    if pattern.confidence < config.recommendation_confidence {
        return Vec::new();
    }

    let target_workflow = pattern.condition_str("workflow_id").map(str::to_string);
    let target_step = pattern.condition_str("step_id").map(str::to_string);
    let recommendation = |kind, title: &str, description: String, changes: Value, improvement, priority, effort| {
        Recommendation {
            recommendation_id: short_id("rec"),
            recommendation_type: kind,
            title: title.to_string(),
            description,
            target_workflow: target_workflow.clone(),
            target_step: target_step.clone(),
            suggested_changes: match changes {
                Value::Object(map) => map,
                _ => Map::new(),
            },
            expected_improvement: improvement,
            confidence: pattern.confidence,
            priority,
            implementation_complexity: effort,
            created_at: now,
            expires_at: Some(now + Duration::days(config.recommendation_ttl_days)),
        }
    };

    match pattern.pattern_type {
        PatternType::Performance if is_degrading(pattern, DEGRADATION_RECOMMENDATION) => {
            vec![recommendation(
                RecommendationType::Optimization,
                "Optimize Performance Bottleneck",
                format!(
                    "Address performance degradation in {}",
                    target_step.as_deref().unwrap_or("unknown step")
                ),
                json!({
                    "action": "performance_optimization",
                    "priority": "high",
                    "areas": ["caching", "parallelization", "resource_allocation"],
                }),
                BTreeMap::from([
                    ("duration_reduction".to_string(), 0.25),
                    ("cost_reduction".to_string(), 0.15),
                ]),
                8,
                Effort::Medium,
            )]
        }
        PatternType::Temporal => {
            let Some(gain) = pattern.impact("potential_improvement") else {
                return Vec::new();
            };
            let hours = |key: &str| pattern.context_conditions.get(key).cloned().unwrap_or_else(|| json!([]));
            vec![recommendation(
                RecommendationType::TimingAdjustment,
                "Optimize Execution Timing",
                "Schedule workflows during optimal time periods".to_string(),
                json!({
                    "action": "schedule_optimization",
                    "optimal_hours": hours("optimal_hours"),
                    "avoid_hours": hours("avoid_hours"),
                }),
                BTreeMap::from([("performance_gain".to_string(), gain)]),
                6,
                Effort::Low,
            )]
        }
        PatternType::Outcome => {
            let factors = pattern
                .context_conditions
                .get("failure_factors")
                .cloned()
                .unwrap_or_else(|| json!({}));
            let success_rate = pattern.impact("success_rate").unwrap_or_default();
            vec![recommendation(
                RecommendationType::WorkflowChange,
                "Address Recurring Step Failures",
                format!(
                    "{} succeeds {:.1}% of the time; review the shared failure factors",
                    target_step.as_deref().unwrap_or("Step"),
                    success_rate * 100.0
                ),
                json!({
                    "action": "failure_remediation",
                    "failure_factors": factors,
                }),
                BTreeMap::from([("success_rate_gain".to_string(), (LOW_SUCCESS_RATE - success_rate).max(0.0))]),
                7,
                Effort::High,
            )]
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(pattern_type: PatternType, confidence: f64, conditions: Value, impact: &[(&str, f64)]) -> Pattern {
        Pattern {
            pattern_id: "p1".to_string(),
            pattern_type,
            name: "test".to_string(),
            description: String::new(),
            confidence,
            discovered_at: Utc::now(),
            last_seen: Utc::now(),
            frequency: 10,
            context_conditions: conditions.as_object().cloned().unwrap_or_default(),
            impact_metrics: impact.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            recommendations: Vec::new(),
        }
    }

    #[test]
    fn degrading_step_yields_insight_and_optimization() {
        let config = AdaptiveConfig::default();
        let now = Utc::now();
        let p = pattern(
            PatternType::Performance,
            0.9,
            json!({"workflow_id": "wf", "step_id": "scan", "direction": "increasing"}),
            &[("duration_change", 0.5)],
        );

        let insight = insight_for(&p, &config, now).unwrap();
        assert_eq!(insight.title, "Performance Degradation Detected");
        assert_eq!(insight.priority, 8);
        assert_eq!(insight.supporting_patterns, vec!["p1"]);

        let recs = recommendations_for(&p, &config, now);
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].recommendation_type, RecommendationType::Optimization);
        assert_eq!(recs[0].target_step.as_deref(), Some("scan"));
        assert_eq!(recs[0].expires_at, Some(now + Duration::days(30)));
    }

    #[test]
    fn improving_step_is_not_flagged() {
        let config = AdaptiveConfig::default();
        let p = pattern(
            PatternType::Performance,
            0.9,
            json!({"direction": "decreasing"}),
            &[("duration_change", -0.5)],
        );
        assert!(insight_for(&p, &config, Utc::now()).is_none());
        assert!(recommendations_for(&p, &config, Utc::now()).is_empty());
    }

    #[test]
    fn confidence_gates_apply_separately() {
        let config = AdaptiveConfig::default();
        let p = pattern(
            PatternType::Outcome,
            0.65,
            json!({"workflow_id": "wf", "step_id": "send"}),
            &[("success_rate", 0.4)],
        );
        assert!(insight_for(&p, &config, Utc::now()).is_some());
        assert!(recommendations_for(&p, &config, Utc::now()).is_empty());
    }
}
