use chrono::{Duration, Timelike, Utc};
use serde_json::{json, Map, Value};
use stepcore::{Execution, ExecutionStatus, Priority, Step, StepError, StepResult, StepStatus, StepType, Template};
use steplearn::{
    AbTest, AdaptiveConfig, AdaptiveSystem, AnomalyDetector, ConfidenceLevel, DataPoint, InsightStatus, LearnError,
    OutcomeDetector, PatternDetector, PatternType, RecommendationType,
};

fn quiet_config() -> AdaptiveConfig {
    AdaptiveConfig {
        sweep_interval: 0,
        ..AdaptiveConfig::default()
    }
}

fn context(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[tokio::test]
async fn test_increasing_durations_yield_performance_pattern() {
    let system = AdaptiveSystem::new(quiet_config());
    let start = Utc::now() - Duration::minutes(61);
    for i in 0..60 {
        let point = DataPoint::new("lead_generation_basic", "scan", "duration", 1.0 + i as f64)
            .at(start + Duration::minutes(i));
        system.ingest(point).await.unwrap();
    }

    let found = system.detect_patterns().await;
    let trend = found
        .iter()
        .find(|p| p.pattern_type == PatternType::Performance && p.name == "Duration Trend in scan")
        .expect("duration trend pattern");

    assert_eq!(trend.condition_str("direction"), Some("increasing"));
    assert!(trend.confidence >= 0.6);
    assert!(trend.impact("duration_change").unwrap() > 0.2);
    assert_eq!(trend.confidence_level(), ConfidenceLevel::VeryHigh);

    let insights = system.get_insights().await;
    assert!(insights.iter().any(|i| i.title == "Performance Degradation Detected"));

    let recommendations = system.get_recommendations(Some("lead_generation_basic"), 5).await;
    assert_eq!(recommendations[0].recommendation_type, RecommendationType::Optimization);
    assert_eq!(recommendations[0].target_step.as_deref(), Some("scan"));
}

#[tokio::test]
async fn test_low_success_rate_yields_outcome_pattern() {
    let system = AdaptiveSystem::new(quiet_config());
    for i in 0..12 {
        let (value, region) = if i % 2 == 0 { (1.0, "apac") } else { (0.0, "emea") };
        system
            .record_data_point("outreach", "send_email", "success_rate", value, context(json!({"region": region})))
            .await
            .unwrap();
    }

    system.detect_patterns().await;
    let outcomes = system.get_patterns(Some(PatternType::Outcome)).await;
    assert_eq!(outcomes.len(), 1);

    let outcome = &outcomes[0];
    assert!(outcome.impact("success_rate").unwrap() < 0.7);
    assert_eq!(outcome.frequency, 6);
    assert_eq!(
        outcome.context_conditions["failure_factors"],
        json!({"region": "emea"})
    );

    let insights = system.get_insights().await;
    assert_eq!(insights[0].title, "Low Success Rate Issue");
    assert_eq!(insights[0].priority, 9);

    let recommendations = system.get_recommendations(None, 5).await;
    assert!(recommendations
        .iter()
        .any(|r| r.recommendation_type == RecommendationType::WorkflowChange));
}

#[tokio::test]
async fn test_sparse_data_yields_nothing() {
    let system = AdaptiveSystem::new(quiet_config());
    for i in 0..4 {
        system
            .record_data_point("wf", "step", "duration", 10.0 * (i + 1) as f64, Map::new())
            .await
            .unwrap();
    }

    assert!(system.detect_patterns().await.is_empty());
    assert!(system.get_insights().await.is_empty());
    assert!(system.get_recommendations(None, 1).await.is_empty());
}

#[tokio::test]
async fn test_confidences_stay_in_unit_range() {
    let system = AdaptiveSystem::new(quiet_config());
    let start = Utc::now() - Duration::hours(5);
    for i in 0..80i64 {
        let jitter = ((i * 37) % 11) as f64;
        let step = ["scan", "enrich", "compose", "send"][(i % 4) as usize];
        let at = start + Duration::minutes(i * 3);
        for (metric, value) in [
            ("duration", 5.0 + jitter + if i % 13 == 0 { 200.0 } else { 0.0 }),
            ("cost", 0.1 * jitter),
            ("success_rate", if jitter > 3.0 { 1.0 } else { 0.0 }),
        ] {
            system
                .ingest(DataPoint::new("mixed", step, metric, value).at(at))
                .await
                .unwrap();
        }
    }

    let found = system.detect_patterns().await;
    assert!(!found.is_empty());
    for pattern in &found {
        assert!((0.0..=1.0).contains(&pattern.confidence), "{:?}", pattern);
    }
}

#[tokio::test]
async fn test_hourly_durations_yield_temporal_pattern() {
    let system = AdaptiveSystem::new(quiet_config());
    let now = Utc::now();
    let slow_at = now - Duration::hours(3);
    let fast_at = now - Duration::hours(2);
    let medium_at = now - Duration::hours(1);

    for (at, duration) in [(slow_at, 20.0), (fast_at, 10.0), (medium_at, 10.5)] {
        for i in 0..5 {
            let point = DataPoint::new("wf", "scan", "duration", duration)
                .at(at.with_minute(i * 5).unwrap_or(at));
            system.ingest(point).await.unwrap();
        }
    }

    system.detect_patterns().await;
    let temporal = system.get_patterns(Some(PatternType::Temporal)).await;
    assert_eq!(temporal.len(), 1);

    let pattern = &temporal[0];
    assert_eq!(pattern.confidence, 0.8);
    assert!((pattern.impact("potential_improvement").unwrap() - 1.0).abs() < 1e-9);

    let mut optimal = vec![fast_at.hour(), medium_at.hour()];
    optimal.sort();
    assert_eq!(pattern.context_conditions["optimal_hours"], json!(optimal));
    assert_eq!(pattern.context_conditions["avoid_hours"], json!([slow_at.hour()]));

    let recommendations = system.get_recommendations(None, 5).await;
    let timing = recommendations
        .iter()
        .find(|r| r.recommendation_type == RecommendationType::TimingAdjustment)
        .expect("timing recommendation");
    assert_eq!(timing.suggested_changes["avoid_hours"], json!([slow_at.hour()]));
}

#[tokio::test]
async fn test_repeated_outliers_yield_anomaly_pattern() {
    let system = AdaptiveSystem::new(quiet_config());
    let start = Utc::now() - Duration::minutes(30);
    for i in 0..25i64 {
        let value = if i % 8 == 3 { 100.0 } else { 10.0 + (i % 5) as f64 * 0.1 };
        system
            .ingest(DataPoint::new("wf", "enrich", "cost", value).at(start + Duration::minutes(i)))
            .await
            .unwrap();
    }

    system.detect_patterns().await;
    let anomalies = system.get_patterns(Some(PatternType::Anomaly)).await;
    assert_eq!(anomalies.len(), 1);
    assert_eq!(anomalies[0].frequency, 3);
    assert_eq!(anomalies[0].name, "Statistical Anomaly in cost");
    assert!(anomalies[0].confidence > 0.7);

    let performance = system.get_patterns(Some(PatternType::Performance)).await;
    assert!(performance.iter().any(|p| p.name == "Cost Anomalies in enrich"));
}

#[test]
fn test_min_pattern_frequency_raises_outcome_and_anomaly_floors() {
    let start = Utc::now() - Duration::minutes(30);
    let outcomes: Vec<DataPoint> = (0..12i64)
        .map(|i| {
            DataPoint::new("outreach", "send_email", "success_rate", if i % 2 == 0 { 1.0 } else { 0.0 })
                .at(start + Duration::minutes(i))
        })
        .collect();
    let costs: Vec<DataPoint> = (0..25i64)
        .map(|i| {
            let value = if i % 8 == 3 { 100.0 } else { 10.0 + (i % 5) as f64 * 0.1 };
            DataPoint::new("wf", "enrich", "cost", value).at(start + Duration::minutes(i))
        })
        .collect();

    let defaults = quiet_config();
    assert_eq!(OutcomeDetector.detect(&outcomes, &defaults).unwrap().len(), 1);
    assert_eq!(AnomalyDetector.detect(&costs, &defaults).unwrap().len(), 1);

    let strict = AdaptiveConfig {
        min_pattern_frequency: 30,
        ..quiet_config()
    };
    assert!(OutcomeDetector.detect(&outcomes, &strict).unwrap().is_empty());
    assert!(AnomalyDetector.detect(&costs, &strict).unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_sequences_yield_behavioral_pattern() {
    let system = AdaptiveSystem::new(quiet_config());
    let start = Utc::now() - Duration::minutes(40);
    let mut minute = 0;
    for _ in 0..10 {
        for step in ["scan", "enrich", "compose"] {
            system
                .ingest(DataPoint::new("pipeline", step, "cost", 1.0).at(start + Duration::minutes(minute)))
                .await
                .unwrap();
            minute += 1;
        }
    }

    system.detect_patterns().await;
    let behavioral = system.get_patterns(Some(PatternType::Behavioral)).await;
    let pair = behavioral
        .iter()
        .find(|p| p.description == "Frequent execution sequence: scan -> enrich")
        .expect("scan -> enrich sequence");
    assert_eq!(pair.frequency, 10);
    assert!(pair.confidence <= 0.9);
}

#[tokio::test]
async fn test_resweep_supersedes_patterns_and_keeps_insight_status() {
    let system = AdaptiveSystem::new(quiet_config());
    let start = Utc::now() - Duration::minutes(30);
    for i in 0..20 {
        system
            .ingest(DataPoint::new("wf", "scan", "duration", 1.0 + i as f64).at(start + Duration::minutes(i)))
            .await
            .unwrap();
    }

    system.detect_patterns().await;
    let first = system.get_patterns(Some(PatternType::Performance)).await;
    let insight_id = system.get_insights().await[0].insight_id.clone();
    assert!(system.update_insight_status(&insight_id, InsightStatus::Reviewed).await);
    assert!(!system.update_insight_status("insight_missing", InsightStatus::Dismissed).await);

    system.detect_patterns().await;
    let second = system.get_patterns(Some(PatternType::Performance)).await;
    assert_eq!(first.len(), second.len());
    assert_ne!(first[0].pattern_id, second[0].pattern_id);

    let insights = system.get_insights().await;
    assert_eq!(insights.len(), 1);
    assert_eq!(insights[0].status, InsightStatus::Reviewed);

    let summary = system.get_insights_summary().await;
    assert_eq!(summary.total_insights, 1);
    assert_eq!(summary.high_priority, 1);
    assert_eq!(summary.recent_insights, 1);
    assert_eq!(summary.by_type.get("performance_alert"), Some(&1));
}

#[tokio::test]
async fn test_expired_recommendations_are_hidden() {
    let system = AdaptiveSystem::new(AdaptiveConfig {
        sweep_interval: 0,
        recommendation_ttl_days: 0,
        ..AdaptiveConfig::default()
    });
    let start = Utc::now() - Duration::minutes(30);
    for i in 0..20 {
        system
            .ingest(DataPoint::new("wf", "scan", "duration", 1.0 + i as f64).at(start + Duration::minutes(i)))
            .await
            .unwrap();
    }

    system.detect_patterns().await;
    assert!(!system.get_insights().await.is_empty());
    assert!(system.get_recommendations(None, 1).await.is_empty());
}

#[tokio::test]
async fn test_old_points_are_pruned_and_bad_values_rejected() {
    let system = AdaptiveSystem::new(quiet_config());
    system
        .ingest(DataPoint::new("wf", "scan", "duration", 1.0).at(Utc::now() - Duration::days(120)))
        .await
        .unwrap();
    system
        .record_data_point("wf", "scan", "duration", 2.0, Map::new())
        .await
        .unwrap();
    assert_eq!(system.data_point_count().await, 1);

    let err = system
        .record_data_point("wf", "scan", "duration", f64::NAN, Map::new())
        .await
        .unwrap_err();
    assert!(matches!(err, LearnError::NonFiniteValue { .. }));
}

#[tokio::test]
async fn test_background_sweep_runs_on_interval() {
    let system = AdaptiveSystem::new(AdaptiveConfig {
        sweep_interval: 10,
        ..AdaptiveConfig::default()
    });
    let start = Utc::now() - Duration::minutes(20);
    for i in 0..10 {
        system
            .ingest(DataPoint::new("wf", "scan", "duration", 1.0 + i as f64).at(start + Duration::minutes(i)))
            .await
            .unwrap();
    }

    system.shutdown().await;
    let patterns = system.get_patterns(Some(PatternType::Performance)).await;
    assert_eq!(patterns.len(), 1);
}

#[tokio::test]
async fn test_record_execution_emits_step_metrics() {
    let system = AdaptiveSystem::new(quiet_config());
    let template = Template::new("wf", "Workflow", "sales")
        .with_step(Step::new("done", "Done", StepType::Custom))
        .with_step(Step::new("broke", "Broke", StepType::Custom))
        .with_step(Step::new("skipped", "Skipped", StepType::Custom));
    let mut execution = Execution::new(&template, Map::new(), Priority::Medium);

    let mut done = StepResult::running("done");
    done.complete(Map::new(), 0.2);
    let mut broke = StepResult::new("broke", StepStatus::Failed);
    broke.fail(&StepError::Timeout { millis: 50 });
    broke.duration_seconds = None;
    for result in [done, broke, StepResult::skipped("skipped")] {
        execution.step_results.insert(result.step_id.clone(), result);
    }
    execution.finish(ExecutionStatus::Completed);

    let recorded = system.record_execution(&execution).await.unwrap();
    assert_eq!(recorded, 5);
    assert_eq!(system.data_point_count().await, 5);
}

#[tokio::test]
async fn test_ab_test_picks_significant_winner() {
    let system = AdaptiveSystem::new(quiet_config());
    let test = AbTest::new("Subject lines", "outreach_campaign_ai")
        .with_variant("control", context(json!({"subject": "Hello"})))
        .with_variant("personalized", context(json!({"subject": "Hi {{name}}"})))
        .with_success_metric("reply_rate")
        .with_hypothesis("Personalized subjects get more replies");
    let test_id = system.create_ab_test(test).await;

    for (variant, values) in [
        ("control", [0.10, 0.12, 0.11, 0.09, 0.10]),
        ("personalized", [0.20, 0.22, 0.21, 0.19, 0.23]),
    ] {
        for value in values {
            system
                .record_ab_result(&test_id, variant, "reply_rate", value, 100)
                .await
                .unwrap();
        }
    }

    let analysis = system.analyze_ab_test(&test_id).await.unwrap();
    assert_eq!(analysis.primary_metric, "reply_rate");
    assert_eq!(analysis.winner.as_deref(), Some("personalized"));
    assert_eq!(analysis.runner_up.as_deref(), Some("control"));
    assert!(analysis.significant);
    assert!(analysis.confidence > 0.95 && analysis.confidence <= 1.0);
    assert_eq!(analysis.variants["control"].sample_size, 5);

    let stored = system.get_ab_test(&test_id).await.unwrap();
    assert_eq!(stored.winner.as_deref(), Some("personalized"));
    assert_eq!(stored.traffic_allocation["control"], 0.5);
}

#[tokio::test]
async fn test_ab_test_errors_and_thin_data() {
    let system = AdaptiveSystem::new(quiet_config());
    let test_id = system
        .create_ab_test(
            AbTest::new("Timing", "wf")
                .with_variant("a", Map::new())
                .with_variant("b", Map::new()),
        )
        .await;

    let err = system
        .record_ab_result(&test_id, "c", "conversion_rate", 0.1, 10)
        .await
        .unwrap_err();
    assert!(matches!(err, LearnError::UnknownVariant { .. }));

    let err = system.analyze_ab_test("test_missing").await.unwrap_err();
    assert_eq!(err, LearnError::AbTestNotFound("test_missing".to_string()));

    let result = system
        .record_ab_result(&test_id, "a", "conversion_rate", 0.5, 10)
        .await
        .unwrap();
    assert!((result.confidence_interval.0 - 0.402).abs() < 1e-9);
    assert!((result.confidence_interval.1 - 0.598).abs() < 1e-9);
    system
        .record_ab_result(&test_id, "b", "conversion_rate", 0.4, 10)
        .await
        .unwrap();

    let analysis = system.analyze_ab_test(&test_id).await.unwrap();
    assert_eq!(analysis.winner.as_deref(), Some("a"));
    assert_eq!(analysis.confidence, 0.0);
    assert!(analysis.p_value.is_none());
    assert!(!analysis.significant);
}
