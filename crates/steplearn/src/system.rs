use crate::config::AdaptiveConfig;
use crate::detectors::{default_detectors, Finding, PatternDetector};
use crate::model::{
    AbTest, AbTestAnalysis, AbTestResult, DataPoint, InsightStatus, InsightsSummary, LearningInsight, Pattern,
    PatternType, Recommendation, VariantStats,
};
use crate::{stats, synthesis, LearnError};
use chrono::{Duration, Utc};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use stepcore::{Execution, StepStatus};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

const SIGNIFICANCE_LEVEL: f64 = 0.05;
const HIGH_PRIORITY: u8 = 8;
const RECENT_DAYS: i64 = 7;

#[derive(Default)]
struct LearningState {
    data: Vec<DataPoint>,
    /// Keyed by finding signature
    patterns: HashMap<String, Pattern>,
    insights: HashMap<String, LearningInsight>,
    recommendations: HashMap<String, Recommendation>,
    ab_tests: HashMap<String, AbTest>,
    ab_results: HashMap<String, Vec<AbTestResult>>,
}

struct Inner {
    config: AdaptiveConfig,
    detectors: Vec<Box<dyn PatternDetector>>,
    state: RwLock<LearningState>,
    stored: AtomicU64,
    sweeping: AtomicBool,
    closed: AtomicBool,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

/// Learns patterns from execution metrics and turns them into insights,
/// recommendations and A/B test verdicts.
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct AdaptiveSystem {
    inner: Arc<Inner>,
}

impl AdaptiveSystem {
    pub fn new(config: AdaptiveConfig) -> Self {
        Self::with_detectors(config, default_detectors())
    }

    pub fn with_detectors(config: AdaptiveConfig, detectors: Vec<Box<dyn PatternDetector>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                detectors,
                state: RwLock::new(LearningState::default()),
                stored: AtomicU64::new(0),
                sweeping: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                sweep_task: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.inner.config
    }

    /// Record one observation stamped with the current time
    pub async fn record_data_point(
        &self,
        workflow_id: &str,
        step_id: &str,
        metric_name: &str,
        value: f64,
        context: Map<String, Value>,
    ) -> Result<(), LearnError> {
        self.ingest(DataPoint::new(workflow_id, step_id, metric_name, value).with_context(context))
            .await
    }

    /// Store a data point, prune expired history, and trigger a sweep every
    /// `sweep_interval` points.
    pub async fn ingest(&self, point: DataPoint) -> Result<(), LearnError> {
        if !point.value.is_finite() {
            return Err(LearnError::NonFiniteValue {
                metric: point.metric_name,
                value: point.value,
            });
        }

        let cutoff = Utc::now() - Duration::days(self.inner.config.data_retention_days);
        {
            let mut state = self.inner.state.write().await;
            state.data.push(point);
            state.data.retain(|p| p.timestamp > cutoff);
        }

        let stored = self.inner.stored.fetch_add(1, Ordering::SeqCst) + 1;
        let interval = self.inner.config.sweep_interval;
        if interval > 0 && stored % interval == 0 {
            self.spawn_sweep().await;
        }
        Ok(())
    }

    /// Record duration, cost and success of every finished step
    pub async fn record_execution(&self, execution: &Execution) -> Result<usize, LearnError> {
        let mut recorded = 0;
        for (step_id, result) in &execution.step_results {
            let success = match result.status {
                StepStatus::Completed => 1.0,
                StepStatus::Failed => 0.0,
                _ => continue,
            };

            let mut context = Map::new();
            context.insert("template_id".to_string(), json!(execution.template_id));
            context.insert("execution_id".to_string(), json!(execution.execution_id));
            context.insert("status".to_string(), json!(execution.status));
            context.insert("priority".to_string(), json!(execution.priority));
            if let Some(kind) = result.error_kind {
                context.insert("error_kind".to_string(), json!(kind));
            }

            let timestamp = result.end_time.unwrap_or_else(Utc::now);
            let mut metrics = vec![("cost", result.cost_actual), ("success_rate", success)];
            if let Some(duration) = result.duration_seconds {
                metrics.insert(0, ("duration", duration));
            }

            for (metric, value) in metrics {
                let point = DataPoint::new(&execution.template_id, step_id, metric, value)
                    .at(timestamp)
                    .with_context(context.clone());
                self.ingest(point).await?;
                recorded += 1;
            }
        }

        tracing::debug!(
            execution_id = %execution.execution_id,
            template_id = %execution.template_id,
            recorded,
            "Recorded execution metrics"
        );
        Ok(recorded)
    }

    async fn spawn_sweep(&self) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime, skipping pattern sweep");
            return;
        };
        if self
            .inner
            .sweeping
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Pattern sweep already running, skipping");
            return;
        }

        let system = self.clone();
        let task = handle.spawn(async move {
            let found = system.detect_patterns().await;
            tracing::info!(patterns = found.len(), "Background pattern sweep finished");
            system.inner.sweeping.store(false, Ordering::SeqCst);
        });
        *self.inner.sweep_task.lock().await = Some(task);
    }

    /// Run every detector over a snapshot of the data, store what they find,
    /// and derive insights and recommendations from it.
    pub async fn detect_patterns(&self) -> Vec<Pattern> {
        let snapshot = self.inner.state.read().await.data.clone();
        let config = &self.inner.config;
        tracing::info!(data_points = snapshot.len(), "Starting pattern detection");

        let mut findings: Vec<Finding> = Vec::new();
        for detector in &self.inner.detectors {
            let kind = detector.pattern_type();
            match detector.detect(&snapshot, config) {
                Ok(found) => {
                    tracing::info!(pattern_type = kind.as_str(), count = found.len(), "Detected patterns");
                    findings.extend(found);
                }
                Err(e) => {
                    tracing::error!(pattern_type = kind.as_str(), error = %e, "Pattern detection failed");
                }
            }
        }

        let now = Utc::now();
        let mut state = self.inner.state.write().await;
        for finding in &findings {
            let pattern = &finding.pattern;

            match synthesis::insight_for(pattern, config, now) {
                Some(mut insight) => {
                    if let Some(previous) = state.insights.get(&finding.signature) {
                        insight.status = previous.status;
                    }
                    state.insights.insert(finding.signature.clone(), insight);
                }
                None => {
                    state.insights.remove(&finding.signature);
                }
            }

            match synthesis::recommendations_for(pattern, config, now).into_iter().next() {
                Some(recommendation) => {
                    state
                        .recommendations
                        .insert(finding.signature.clone(), recommendation);
                }
                None => {
                    state.recommendations.remove(&finding.signature);
                }
            }

            state
                .patterns
                .insert(finding.signature.clone(), pattern.clone());
        }

        findings.into_iter().map(|f| f.pattern).collect()
    }

    /// Stored patterns, most confident first
    pub async fn get_patterns(&self, pattern_type: Option<PatternType>) -> Vec<Pattern> {
        let state = self.inner.state.read().await;
        let mut patterns: Vec<Pattern> = state
            .patterns
            .values()
            .filter(|p| pattern_type.map_or(true, |t| p.pattern_type == t))
            .cloned()
            .collect();
        patterns.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| a.pattern_id.cmp(&b.pattern_id))
        });
        patterns
    }

    /// Insights, highest priority first
    pub async fn get_insights(&self) -> Vec<LearningInsight> {
        let state = self.inner.state.read().await;
        let mut insights: Vec<LearningInsight> = state.insights.values().cloned().collect();
        insights.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
                .then_with(|| a.insight_id.cmp(&b.insight_id))
        });
        insights
    }

    pub async fn update_insight_status(&self, insight_id: &str, status: InsightStatus) -> bool {
        let mut state = self.inner.state.write().await;
        match state.insights.values_mut().find(|i| i.insight_id == insight_id) {
            Some(insight) => {
                insight.status = status;
                true
            }
            None => false,
        }
    }

    pub async fn get_insights_summary(&self) -> InsightsSummary {
        let state = self.inner.state.read().await;
        let recent_cutoff = Utc::now() - Duration::days(RECENT_DAYS);

        let mut summary = InsightsSummary {
            total_insights: state.insights.len(),
            ..InsightsSummary::default()
        };
        for insight in state.insights.values() {
            *summary.by_type.entry(insight.insight_type.clone()).or_default() += 1;
            *summary.by_priority.entry(insight.priority).or_default() += 1;
            if insight.priority >= HIGH_PRIORITY {
                summary.high_priority += 1;
            }
            if insight.created_at > recent_cutoff {
                summary.recent_insights += 1;
            }
        }
        summary
    }

    /// Unexpired recommendations at or above `priority_threshold`, sorted by
    /// priority then confidence, both descending.
    pub async fn get_recommendations(&self, workflow_id: Option<&str>, priority_threshold: u8) -> Vec<Recommendation> {
        let now = Utc::now();
        let state = self.inner.state.read().await;
        let mut recommendations: Vec<Recommendation> = state
            .recommendations
            .values()
            .filter(|r| !r.is_expired(now))
            .filter(|r| r.priority >= priority_threshold)
            .filter(|r| workflow_id.map_or(true, |w| r.target_workflow.as_deref() == Some(w)))
            .cloned()
            .collect();
        recommendations.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| b.confidence.total_cmp(&a.confidence))
        });
        recommendations
    }

    pub async fn data_point_count(&self) -> usize {
        self.inner.state.read().await.data.len()
    }

    pub async fn create_ab_test(&self, test: AbTest) -> String {
        let test_id = test.test_id.clone();
        tracing::info!(test_id = %test_id, name = %test.name, variants = test.variants.len(), "Created A/B test");
        self.inner.state.write().await.ab_tests.insert(test_id.clone(), test);
        test_id
    }

    pub async fn get_ab_test(&self, test_id: &str) -> Option<AbTest> {
        self.inner.state.read().await.ab_tests.get(test_id).cloned()
    }

    /// Store one observed metric for a variant
    pub async fn record_ab_result(
        &self,
        test_id: &str,
        variant: &str,
        metric: &str,
        value: f64,
        sample_size: u64,
    ) -> Result<AbTestResult, LearnError> {
        if !value.is_finite() {
            return Err(LearnError::NonFiniteValue {
                metric: metric.to_string(),
                value,
            });
        }

        let mut state = self.inner.state.write().await;
        let test = state
            .ab_tests
            .get(test_id)
            .ok_or_else(|| LearnError::AbTestNotFound(test_id.to_string()))?;
        if !test.variants.contains_key(variant) {
            return Err(LearnError::UnknownVariant {
                test_id: test_id.to_string(),
                variant: variant.to_string(),
            });
        }

        // Fixed 10% margin at 95%, not derived from the samples
        let margin = 1.96 * 0.1 * value.abs();
        let result = AbTestResult {
            test_id: test_id.to_string(),
            variant: variant.to_string(),
            metric: metric.to_string(),
            value,
            sample_size,
            confidence_interval: (value - margin, value + margin),
            p_value: None,
        };
        state
            .ab_results
            .entry(test_id.to_string())
            .or_default()
            .push(result.clone());
        Ok(result)
    }

    /// Compare variants on the primary metric and record the winner
    pub async fn analyze_ab_test(&self, test_id: &str) -> Result<AbTestAnalysis, LearnError> {
        let mut state = self.inner.state.write().await;
        let test = state
            .ab_tests
            .get(test_id)
            .ok_or_else(|| LearnError::AbTestNotFound(test_id.to_string()))?;
        let primary_metric = test.primary_metric().to_string();

        let mut samples: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for result in state.ab_results.get(test_id).into_iter().flatten() {
            if result.metric == primary_metric {
                samples.entry(result.variant.clone()).or_default().push(result.value);
            }
        }

        let variants: BTreeMap<String, VariantStats> = samples
            .iter()
            .filter_map(|(name, values)| {
                Some((
                    name.clone(),
                    VariantStats {
                        mean: stats::mean(values)?,
                        std_dev: stats::std_dev(values),
                        sample_size: values.len(),
                    },
                ))
            })
            .collect();

        let mut ranked: Vec<(&String, &VariantStats)> = variants.iter().collect();
        ranked.sort_by(|a, b| b.1.mean.total_cmp(&a.1.mean).then_with(|| a.0.cmp(b.0)));

        let mut analysis = AbTestAnalysis {
            test_id: test_id.to_string(),
            primary_metric,
            variants: variants.clone(),
            winner: None,
            runner_up: None,
            confidence: 0.0,
            p_value: None,
            significant: false,
            recommendation: "Not enough data: at least two variants need results".to_string(),
        };

        if let [(winner, _), (runner_up, _), ..] = ranked.as_slice() {
            let welch = stats::welch_t_test(&samples[*winner], &samples[*runner_up]);
            analysis.winner = Some(winner.to_string());
            analysis.runner_up = Some(runner_up.to_string());
            analysis.p_value = welch.map(|w| w.p_value);
            analysis.confidence = welch.map_or(0.0, |w| (1.0 - w.p_value).clamp(0.0, 1.0));
            analysis.significant = welch.is_some_and(|w| w.p_value < SIGNIFICANCE_LEVEL);
            analysis.recommendation = if analysis.significant {
                format!("Variant {} shows best performance", winner)
            } else {
                format!(
                    "Variant {} leads but the difference is not yet significant; keep collecting data",
                    winner
                )
            };
        }

        if let Some(winner) = &analysis.winner {
            if let Some(test) = state.ab_tests.get_mut(test_id) {
                test.winner = Some(winner.clone());
            }
        }

        tracing::info!(
            test_id,
            winner = ?analysis.winner,
            confidence = analysis.confidence,
            "Analyzed A/B test"
        );
        Ok(analysis)
    }

    /// Stop scheduling sweeps and wait for one in flight
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let task = self.inner.sweep_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Pattern sweep ended abnormally");
            }
        }
    }
}

impl Default for AdaptiveSystem {
    fn default() -> Self {
        Self::new(AdaptiveConfig::default())
    }
}
