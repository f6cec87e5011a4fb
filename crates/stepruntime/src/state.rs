use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};
use stepcore::{Execution, StepResult, WorkflowMetrics};
use tokio::sync::RwLock;

/// In-memory home of every execution this orchestrator knows about
pub struct ExecutionStore {
    inner: RwLock<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    executions: HashMap<String, Execution>,
    order: VecDeque<String>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    pub async fn insert(&self, execution: Execution) {
        let mut inner = self.inner.write().await;
        inner.order.push_back(execution.execution_id.clone());
        inner.executions.insert(execution.execution_id.clone(), execution);
    }

    pub async fn get(&self, execution_id: &str) -> Option<Execution> {
        self.inner.read().await.executions.get(execution_id).cloned()
    }

    /// Apply `f` to the execution, returning its result if the execution exists
    pub async fn update<R>(&self, execution_id: &str, f: impl FnOnce(&mut Execution) -> R) -> Option<R> {
        let mut inner = self.inner.write().await;
        inner.executions.get_mut(execution_id).map(f)
    }

    pub async fn record_step(&self, execution_id: &str, result: StepResult) {
        self.update(execution_id, |e| {
            e.step_results.insert(result.step_id.clone(), result);
        })
        .await;
    }

    pub async fn context(&self, execution_id: &str) -> Map<String, Value> {
        self.inner
            .read()
            .await
            .executions
            .get(execution_id)
            .map(|e| e.context_data.clone())
            .unwrap_or_default()
    }

    /// Drop the oldest finished executions until at most `max` remain.
    /// Running executions are never evicted.
    pub async fn evict_terminal(&self, max: usize) -> usize {
        let mut inner = self.inner.write().await;
        let mut evicted = 0;
        let mut idx = 0;
        while inner.executions.len() > max && idx < inner.order.len() {
            let id = inner.order[idx].clone();
            let terminal = inner
                .executions
                .get(&id)
                .map_or(true, |e| e.status.is_terminal());
            if terminal {
                inner.executions.remove(&id);
                inner.order.remove(idx);
                evicted += 1;
            } else {
                idx += 1;
            }
        }
        evicted
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-template metrics plus rolling per-step duration history
pub struct PerformanceTracker {
    window: usize,
    metrics: RwLock<HashMap<String, WorkflowMetrics>>,
    durations: RwLock<HashMap<(String, String), VecDeque<f64>>>,
}

impl PerformanceTracker {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
            metrics: RwLock::new(HashMap::new()),
            durations: RwLock::new(HashMap::new()),
        }
    }

    /// Start a fresh metrics bucket for `template_id`
    pub async fn reset(&self, template_id: &str) {
        self.metrics
            .write()
            .await
            .insert(template_id.to_string(), WorkflowMetrics::default());
    }

    pub async fn record(&self, execution: &Execution) {
        self.metrics
            .write()
            .await
            .entry(execution.template_id.clone())
            .or_default()
            .record(execution);

        let mut durations = self.durations.write().await;
        for (step_id, result) in &execution.step_results {
            let Some(duration) = result.duration_seconds.filter(|d| *d > 0.0) else {
                continue;
            };
            let history = durations
                .entry((execution.template_id.clone(), step_id.clone()))
                .or_default();
            history.push_back(duration);
            while history.len() > self.window {
                history.pop_front();
            }
        }
    }

    pub async fn metrics(&self, template_id: &str) -> Option<WorkflowMetrics> {
        self.metrics.read().await.get(template_id).cloned()
    }

    pub async fn update_metrics(&self, template_id: &str, f: impl FnOnce(&mut WorkflowMetrics)) {
        if let Some(metrics) = self.metrics.write().await.get_mut(template_id) {
            f(metrics);
        }
    }

    /// Rolling average observed duration per step of `template_id`
    pub async fn step_averages(&self, template_id: &str) -> HashMap<String, f64> {
        self.durations
            .read()
            .await
            .iter()
            .filter(|((template, _), history)| template == template_id && !history.is_empty())
            .map(|((_, step), history)| (step.clone(), history.iter().sum::<f64>() / history.len() as f64))
            .collect()
    }
}
