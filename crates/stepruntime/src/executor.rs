use crate::builtin::BuiltinHandler;
use crate::params::resolve_parameters;
use crate::registry::AgentRegistry;
use crate::state::ExecutionStore;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use stepcore::{
    evaluate_condition, Agent, EventBus, ExecutionEvent, ExecutionStatus, Step, StepContext, StepError,
    StepOutput, StepResult, StepStatus, Template,
};
use tokio::sync::{RwLock, Semaphore};
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

/// Shared handles an execution needs while it runs
#[derive(Clone)]
pub struct ExecutionEnv {
    pub registry: Arc<RwLock<AgentRegistry>>,
    pub store: Arc<ExecutionStore>,
    pub events: Arc<EventBus>,
    pub cancellation: CancellationToken,
}

/// Executes templates as DAGs, one ready batch at a time
pub struct WorkflowExecutor {
    max_parallel: usize,
    builtin: BuiltinHandler,
}

impl WorkflowExecutor {
    pub fn new(max_parallel: usize, builtin_delay: Duration) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
            builtin: BuiltinHandler::new(builtin_delay),
        }
    }

    /// Drive a pending execution to a terminal status
    pub async fn execute(&self, template: Arc<Template>, execution_id: &str, env: ExecutionEnv) -> ExecutionStatus {
        let start_time = Instant::now();

        let parameters = env
            .store
            .update(execution_id, |e| {
                e.status = ExecutionStatus::Running;
                e.parameters.clone()
            })
            .await;
        let Some(parameters) = parameters else {
            tracing::warn!(execution_id, "Execution vanished before it started");
            return ExecutionStatus::Failed;
        };

        env.events.emit(ExecutionEvent::WorkflowStarted {
            execution_id: execution_id.to_string(),
            template_id: template.template_id.clone(),
            timestamp: Utc::now(),
        });
        tracing::info!(execution_id, template_id = %template.template_id, "Starting workflow execution");

        let status = match self
            .execute_dag(&template, execution_id, Arc::new(parameters), &env)
            .await
        {
            Ok(()) => {
                env.store
                    .update(execution_id, |e| e.finish(ExecutionStatus::Completed))
                    .await;
                ExecutionStatus::Completed
            }
            Err(reason) => {
                tracing::error!(execution_id, %reason, "Workflow execution failed");
                env.store.update(execution_id, |e| e.fail(reason)).await;
                ExecutionStatus::Failed
            }
        };

        env.events.emit(ExecutionEvent::WorkflowCompleted {
            execution_id: execution_id.to_string(),
            status,
            duration_ms: start_time.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });

        status
    }

    async fn execute_dag(
        &self,
        template: &Template,
        execution_id: &str,
        parameters: Arc<Map<String, Value>>,
        env: &ExecutionEnv,
    ) -> Result<(), String> {
        let total = template.steps.len();
        let mut done: HashSet<&str> = HashSet::with_capacity(total);
        let mut failed: HashSet<&str> = HashSet::new();
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        while done.len() < total {
            if env.cancellation.is_cancelled() {
                return Err("cancelled".to_string());
            }

            // Steps whose dependencies have all reached a terminal state
            let ready: Vec<&Step> = template
                .steps
                .iter()
                .filter(|s| {
                    !done.contains(s.step_id.as_str())
                        && s.dependencies.iter().all(|d| done.contains(d.as_str()))
                })
                .collect();

            if ready.is_empty() {
                let stuck: Vec<&str> = template
                    .steps
                    .iter()
                    .map(|s| s.step_id.as_str())
                    .filter(|id| !done.contains(id))
                    .collect();
                tracing::warn!(execution_id, ?stuck, "Execution stalled with unreachable steps");
                return Err(format!("stalled with {} unreachable steps", stuck.len()));
            }

            let (blocked, runnable): (Vec<&Step>, Vec<&Step>) = ready
                .into_iter()
                .partition(|s| s.dependencies.iter().any(|d| failed.contains(d.as_str())));

            for step in blocked {
                let upstream = step
                    .dependencies
                    .iter()
                    .find(|d| failed.contains(d.as_str()))
                    .cloned()
                    .unwrap_or_default();
                let mut result = StepResult::new(&step.step_id, StepStatus::Failed);
                result.fail(&StepError::UpstreamFailed(upstream));
                tracing::warn!(execution_id, step_id = %step.step_id, "Step not run, a dependency failed");
                env.store.record_step(execution_id, result.clone()).await;
                env.events.emit(ExecutionEvent::StepFailed {
                    execution_id: execution_id.to_string(),
                    step_id: step.step_id.clone(),
                    result,
                    timestamp: Utc::now(),
                });
                done.insert(&step.step_id);
                failed.insert(&step.step_id);
            }

            if runnable.is_empty() {
                continue;
            }

            let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for step in &runnable {
                let key = step.parallel_group.as_deref().unwrap_or(&step.step_id);
                groups.entry(key).or_default().push(&step.step_id);
            }
            tracing::debug!(execution_id, ?groups, "Dispatching ready batch");

            let context = Arc::new(env.store.context(execution_id).await);
            let handles: Vec<_> = runnable
                .iter()
                .map(|step| {
                    let runner = StepRunner {
                        execution_id: execution_id.to_string(),
                        parameters: Arc::clone(&parameters),
                        env: env.clone(),
                        builtin: self.builtin,
                    };
                    let step = (*step).clone();
                    let context = Arc::clone(&context);
                    let semaphore = Arc::clone(&semaphore);
                    tokio::spawn(async move {
                        let _permit = semaphore.acquire_owned().await;
                        runner.run(step, context).await
                    })
                })
                .collect();

            let outcomes = join_all(handles).await;

            // Merge in declaration order so concurrent writers resolve deterministically
            let mut merged = Map::new();
            for (step, outcome) in runnable.iter().zip(outcomes) {
                let outcome = outcome.map_err(|e| format!("step '{}' task failed: {}", step.step_id, e))?;
                match outcome.status {
                    StepStatus::Completed => merged.extend(outcome.data),
                    StepStatus::Failed => {
                        failed.insert(&step.step_id);
                    }
                    _ => {}
                }
                done.insert(&step.step_id);
            }
            if !merged.is_empty() {
                env.store
                    .update(execution_id, |e| e.context_data.extend(merged))
                    .await;
            }

            if env.cancellation.is_cancelled() {
                return Err("cancelled".to_string());
            }
        }

        Ok(())
    }
}

struct StepOutcome {
    status: StepStatus,
    data: Map<String, Value>,
}

impl StepOutcome {
    fn without_data(status: StepStatus) -> Self {
        Self {
            status,
            data: Map::new(),
        }
    }
}

#[derive(Clone)]
struct StepRunner {
    execution_id: String,
    parameters: Arc<Map<String, Value>>,
    env: ExecutionEnv,
    builtin: BuiltinHandler,
}

impl StepRunner {
    async fn run(self, step: Step, context: Arc<Map<String, Value>>) -> StepOutcome {
        let execution_id = self.execution_id.as_str();

        if let Some(condition) = &step.condition {
            let met = evaluate_condition(condition, &context);
            tracing::debug!(execution_id, step_id = %step.step_id, condition = %condition, met, "Evaluated step condition");
            if !met {
                self.env
                    .store
                    .record_step(execution_id, StepResult::skipped(&step.step_id))
                    .await;
                self.env.events.emit(ExecutionEvent::StepSkipped {
                    execution_id: execution_id.to_string(),
                    step_id: step.step_id.clone(),
                    timestamp: Utc::now(),
                });
                tracing::info!(execution_id, step_id = %step.step_id, "Step skipped due to condition");
                return StepOutcome::without_data(StepStatus::Skipped);
            }
        }

        let mut result = StepResult::running(&step.step_id);
        self.env.store.record_step(execution_id, result.clone()).await;

        let params = resolve_parameters(&step.parameters, &self.parameters);
        let agent = self
            .env
            .registry
            .read()
            .await
            .resolve(step.agent_class.as_deref(), step.function_name.as_deref());
        if agent.is_none() {
            tracing::debug!(execution_id, step_id = %step.step_id, "No agent binding, using builtin handler");
        }

        for attempt in 0..=step.retry_count {
            result.retry_attempts = attempt;
            self.env.events.emit(ExecutionEvent::StepStarted {
                execution_id: execution_id.to_string(),
                step_id: step.step_id.clone(),
                attempt,
                timestamp: Utc::now(),
            });

            let ctx = StepContext {
                execution_id: execution_id.to_string(),
                step_id: step.step_id.clone(),
                params: params.clone(),
                context: (*context).clone(),
                events: self.env.events.create_emitter(execution_id, &step.step_id),
                cancellation: self.env.cancellation.child_token(),
            };

            match self.attempt(&step, agent.as_deref(), ctx).await {
                Ok(output) => {
                    let cost = output.cost.unwrap_or(step.cost_estimate);
                    result.complete(output.data.clone(), cost);
                    tracing::info!(
                        execution_id,
                        step_id = %step.step_id,
                        duration = ?result.duration_seconds,
                        "Step completed"
                    );
                    self.env.store.record_step(execution_id, result.clone()).await;
                    self.env.events.emit(ExecutionEvent::StepCompleted {
                        execution_id: execution_id.to_string(),
                        step_id: step.step_id.clone(),
                        result,
                        timestamp: Utc::now(),
                    });
                    return StepOutcome {
                        status: StepStatus::Completed,
                        data: output.data,
                    };
                }
                Err(err) => {
                    tracing::error!(
                        execution_id,
                        step_id = %step.step_id,
                        attempt = attempt + 1,
                        error = %err,
                        "Step attempt failed"
                    );

                    if err != StepError::Cancelled && attempt < step.retry_count {
                        self.env.events.emit(ExecutionEvent::StepRetrying {
                            execution_id: execution_id.to_string(),
                            step_id: step.step_id.clone(),
                            attempt,
                            error: err.to_string(),
                            timestamp: Utc::now(),
                        });
                        tokio::select! {
                            _ = self.env.cancellation.cancelled() => {
                                result.fail(&StepError::Cancelled);
                                break;
                            }
                            _ = sleep(Duration::from_millis(step.retry_delay_ms)) => continue,
                        }
                    }

                    result.fail(&err);
                    break;
                }
            }
        }

        self.env.store.record_step(execution_id, result.clone()).await;
        self.env.events.emit(ExecutionEvent::StepFailed {
            execution_id: execution_id.to_string(),
            step_id: step.step_id.clone(),
            result,
            timestamp: Utc::now(),
        });
        StepOutcome::without_data(StepStatus::Failed)
    }

    /// One call of the bound function, bounded by the step timeout (0 disables it)
    async fn attempt(&self, step: &Step, agent: Option<&dyn Agent>, ctx: StepContext) -> Result<StepOutput, StepError> {
        let call = async {
            match (agent, step.function_name.as_deref()) {
                (Some(agent), Some(function)) => agent.call(function, ctx).await,
                _ => self.builtin.handle(step, &ctx).await,
            }
        };

        let deadline = step.timeout_ms;
        let bounded = async {
            if deadline == 0 {
                call.await
            } else {
                timeout(Duration::from_millis(deadline), call)
                    .await
                    .unwrap_or(Err(StepError::Timeout { millis: deadline }))
            }
        };

        tokio::select! {
            _ = self.env.cancellation.cancelled() => Err(StepError::Cancelled),
            outcome = bounded => outcome,
        }
    }
}
