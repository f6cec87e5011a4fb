use crate::analysis::{self, AnalysisThresholds, PerformanceReport};
use crate::executor::{ExecutionEnv, WorkflowExecutor};
use crate::registry::AgentRegistry;
use crate::state::{ExecutionStore, PerformanceTracker};
use crate::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use stepcore::{
    Agent, EventBus, Execution, ExecutionEvent, ExecutionSnapshot, Priority, Template, WorkflowMetrics,
};
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Configuration for the orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub max_parallel_steps: usize,
    pub event_buffer_size: usize,
    /// Simulated work time of the builtin handler
    pub builtin_step_delay_ms: u64,
    /// Observed durations kept per step for bottleneck analysis
    pub step_history_window: usize,
    pub max_retained_executions: usize,
    pub slow_step_factor: f64,
    pub failure_rate_threshold: f64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel_steps: 10,
            event_buffer_size: 1000,
            builtin_step_delay_ms: 100,
            step_history_window: 100,
            max_retained_executions: 1000,
            slow_step_factor: 1.5,
            failure_rate_threshold: 0.1,
        }
    }
}

struct ActiveRun {
    cancellation: CancellationToken,
    done: watch::Receiver<Option<Execution>>,
}

/// Owns templates, agents and executions, and runs workflows on tokio
pub struct Orchestrator {
    config: RuntimeConfig,
    registry: Arc<RwLock<AgentRegistry>>,
    templates: Arc<RwLock<HashMap<String, Arc<Template>>>>,
    store: Arc<ExecutionStore>,
    performance: Arc<PerformanceTracker>,
    executor: Arc<WorkflowExecutor>,
    event_bus: Arc<EventBus>,
    active: Arc<Mutex<HashMap<String, ActiveRun>>>,
    shutdown: CancellationToken,
}

impl Orchestrator {
    /// Create an orchestrator with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let executor = Arc::new(WorkflowExecutor::new(
            config.max_parallel_steps,
            Duration::from_millis(config.builtin_step_delay_ms),
        ));

        Self {
            registry: Arc::new(RwLock::new(AgentRegistry::new())),
            templates: Arc::new(RwLock::new(HashMap::new())),
            store: Arc::new(ExecutionStore::new()),
            performance: Arc::new(PerformanceTracker::new(config.step_history_window)),
            executor,
            event_bus: Arc::new(EventBus::new(config.event_buffer_size)),
            active: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Validate and store a template, replacing any previous version with the same id
    pub async fn create_template(&self, mut template: Template) -> Result<String, OrchestratorError> {
        template.validate()?;
        template.recalculate_estimates();

        let template_id = template.template_id.clone();
        tracing::info!(
            template_id = %template_id,
            steps = template.steps.len(),
            estimated_duration = template.estimated_total_duration,
            "Created workflow template"
        );

        self.templates
            .write()
            .await
            .insert(template_id.clone(), Arc::new(template));
        self.performance.reset(&template_id).await;
        Ok(template_id)
    }

    pub async fn get_template(&self, template_id: &str) -> Option<Template> {
        self.templates
            .read()
            .await
            .get(template_id)
            .map(|t| Template::clone(t))
    }

    /// Templates sorted by id, optionally restricted to one category
    pub async fn list_templates(&self, category: Option<&str>) -> Vec<Template> {
        let templates = self.templates.read().await;
        let mut listed: Vec<Template> = templates
            .values()
            .filter(|t| category.map_or(true, |c| t.category == c))
            .map(|t| Template::clone(t))
            .collect();
        listed.sort_by(|a, b| a.template_id.cmp(&b.template_id));
        listed
    }

    pub async fn register_agent(&self, name: impl Into<String>, agent: Arc<dyn Agent>) {
        self.registry.write().await.register(name, agent);
    }

    pub async fn list_agents(&self) -> Vec<String> {
        self.registry.read().await.list_agents()
    }

    /// Start a workflow in the background and return its execution id
    pub async fn execute_workflow(
        &self,
        template_id: &str,
        parameters: Map<String, Value>,
        priority: Priority,
    ) -> Result<String, OrchestratorError> {
        let (execution_id, _) = self.start(template_id, parameters, priority).await?;
        Ok(execution_id)
    }

    /// Spawn the run; the receiver yields the final execution once it settles
    async fn start(
        &self,
        template_id: &str,
        parameters: Map<String, Value>,
        priority: Priority,
    ) -> Result<(String, watch::Receiver<Option<Execution>>), OrchestratorError> {
        if self.shutdown.is_cancelled() {
            return Err(OrchestratorError::ShuttingDown);
        }

        let template = self
            .templates
            .read()
            .await
            .get(template_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::TemplateNotFound(template_id.to_string()))?;

        let execution = Execution::new(&template, parameters, priority);
        let execution_id = execution.execution_id.clone();
        self.store.insert(execution).await;

        let cancellation = self.shutdown.child_token();
        let (done_tx, done_rx) = watch::channel(None);
        self.active.lock().await.insert(
            execution_id.clone(),
            ActiveRun {
                cancellation: cancellation.clone(),
                done: done_rx.clone(),
            },
        );

        let env = ExecutionEnv {
            registry: Arc::clone(&self.registry),
            store: Arc::clone(&self.store),
            events: Arc::clone(&self.event_bus),
            cancellation,
        };
        let executor = Arc::clone(&self.executor);
        let store = Arc::clone(&self.store);
        let performance = Arc::clone(&self.performance);
        let active = Arc::clone(&self.active);
        let max_retained = self.config.max_retained_executions;
        let id = execution_id.clone();

        tracing::info!(execution_id = %id, template_id, "Queued workflow execution");
        tokio::spawn(async move {
            let status = executor.execute(template, &id, env).await;
            let execution = store.get(&id).await;
            if let Some(execution) = &execution {
                performance.record(execution).await;
            }
            active.lock().await.remove(&id);
            // Waiters read the final state from here, the store may evict it next
            done_tx.send_replace(execution);

            let evicted = store.evict_terminal(max_retained).await;
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted finished executions");
            }
            tracing::info!(execution_id = %id, ?status, "Workflow execution finished");
        });

        Ok((execution_id, done_rx))
    }

    /// Wait until the execution reaches a terminal status
    pub async fn wait_for_execution(&self, execution_id: &str) -> Option<Execution> {
        let done = self
            .active
            .lock()
            .await
            .get(execution_id)
            .map(|run| run.done.clone());

        match done {
            Some(mut done) => wait_done(&mut done).await,
            None => self.store.get(execution_id).await,
        }
    }

    /// Execute a workflow and wait for it to finish
    pub async fn run_workflow(
        &self,
        template_id: &str,
        parameters: Map<String, Value>,
        priority: Priority,
    ) -> Result<Execution, OrchestratorError> {
        let (execution_id, mut done) = self.start(template_id, parameters, priority).await?;
        wait_done(&mut done)
            .await
            .ok_or(OrchestratorError::ExecutionNotFound(execution_id))
    }

    pub async fn get_execution(&self, execution_id: &str) -> Option<Execution> {
        self.store.get(execution_id).await
    }

    pub async fn get_execution_status(&self, execution_id: &str) -> Option<ExecutionSnapshot> {
        let execution = self.store.get(execution_id).await?;
        let total_steps = self
            .templates
            .read()
            .await
            .get(&execution.template_id)
            .map_or(execution.step_results.len(), |t| t.steps.len());
        Some(ExecutionSnapshot::capture(&execution, total_steps))
    }

    pub async fn get_metrics(&self, template_id: &str) -> Option<WorkflowMetrics> {
        self.performance.metrics(template_id).await
    }

    /// Rank step bottlenecks and derive optimization suggestions
    pub async fn analyze_performance(&self, template_id: &str) -> Option<PerformanceReport> {
        let template = self.templates.read().await.get(template_id).cloned()?;
        let mut metrics = self.performance.metrics(template_id).await?;
        let averages = self.performance.step_averages(template_id).await;

        let report = analysis::analyze(
            &template,
            &mut metrics,
            &averages,
            AnalysisThresholds {
                slow_step_factor: self.config.slow_step_factor,
                failure_rate: self.config.failure_rate_threshold,
            },
        );

        self.performance
            .update_metrics(template_id, |m| {
                m.bottleneck_steps = metrics.bottleneck_steps;
                m.optimization_suggestions = metrics.optimization_suggestions;
            })
            .await;

        tracing::debug!(template_id, bottlenecks = report.bottlenecks.len(), "Analyzed workflow performance");
        Some(report)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Cancel one running execution; false if it is unknown or already finished
    pub async fn cancel_execution(&self, execution_id: &str) -> bool {
        match self.active.lock().await.get(execution_id) {
            Some(run) => {
                tracing::info!(execution_id, "Cancelling execution");
                run.cancellation.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel every active run, wait for them to settle, and refuse new work
    pub async fn shutdown(&self) {
        self.shutdown.cancel();

        let pending: Vec<(String, watch::Receiver<Option<Execution>>)> = self
            .active
            .lock()
            .await
            .iter()
            .map(|(id, run)| (id.clone(), run.done.clone()))
            .collect();
        tracing::info!(active = pending.len(), "Shutting down orchestrator");

        for (execution_id, mut done) in pending {
            wait_done(&mut done).await;
            tracing::debug!(execution_id = %execution_id, "Execution settled");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn wait_done(done: &mut watch::Receiver<Option<Execution>>) -> Option<Execution> {
    loop {
        if let Some(execution) = done.borrow_and_update().clone() {
            return Some(execution);
        }
        if done.changed().await.is_err() {
            return None;
        }
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}
