use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use stepcore::{
    ExecutionEvent, ExecutionStatus, Priority, Step, StepError, StepErrorKind, StepOutput, StepStatus,
    StepType, Template, TemplateError,
};
use stepruntime::{FnAgent, Orchestrator, OrchestratorError, RuntimeConfig};
use tokio::time::{sleep, Duration};

fn fast_orchestrator() -> Orchestrator {
    Orchestrator::with_config(RuntimeConfig {
        builtin_step_delay_ms: 5,
        ..RuntimeConfig::default()
    })
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Agent with a `work` function that sleeps `sleep_ms` and reports its step id
fn worker() -> Arc<FnAgent> {
    Arc::new(FnAgent::new().with_function("work", |ctx| async move {
        let millis = ctx.param_f64("sleep_ms").unwrap_or(0.0) as u64;
        sleep(Duration::from_millis(millis)).await;
        Ok(StepOutput::new().with(ctx.step_id.clone(), true))
    }))
}

fn work_step(id: &str, sleep_ms: u64) -> Step {
    Step::new(id, id, StepType::Custom)
        .with_agent("worker", "work")
        .with_parameter("sleep_ms", sleep_ms)
        .with_retry(0, 0)
}

#[tokio::test]
async fn test_parallel_group_runs_concurrently() {
    let orchestrator = fast_orchestrator();
    orchestrator.register_agent("worker", worker()).await;

    let template = Template::new("parallel", "Parallel", "test")
        .with_step(work_step("init", 50))
        .with_step(work_step("a", 200).depends_on("init").with_parallel_group("fanout"))
        .with_step(work_step("b", 200).depends_on("init").with_parallel_group("fanout"));
    orchestrator.create_template(template).await.unwrap();

    let started = Instant::now();
    let execution = orchestrator
        .run_workflow("parallel", Map::new(), Priority::Medium)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.count_with_status(StepStatus::Completed), 3);
    assert!(elapsed >= Duration::from_millis(250), "took {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(420), "steps ran serially: {:?}", elapsed);

    let init_end = execution.result("init").unwrap().end_time.unwrap();
    for id in ["a", "b"] {
        assert!(execution.result(id).unwrap().start_time.unwrap() >= init_end);
    }
}

#[tokio::test]
async fn test_condition_gates_on_context() {
    let orchestrator = fast_orchestrator();

    let template = Template::new("gated", "Gated", "test")
        .with_step(Step::new("seed", "Seed", StepType::Custom).with_parameter("score", "{{score}}"))
        .with_step(
            Step::new("gate", "Gate", StepType::Custom)
                .with_parameter("ran", true)
                .depends_on("seed")
                .with_condition("context.get('score', 0) > 80"),
        );
    orchestrator.create_template(template).await.unwrap();

    let high = orchestrator
        .run_workflow("gated", params(json!({"score": 90})), Priority::Medium)
        .await
        .unwrap();
    assert_eq!(high.context_data["score"], json!(90));
    assert_eq!(high.result("gate").unwrap().status, StepStatus::Completed);
    assert_eq!(high.context_data["ran"], json!(true));

    let low = orchestrator
        .run_workflow("gated", params(json!({"score": 50})), Priority::Medium)
        .await
        .unwrap();
    assert_eq!(low.result("gate").unwrap().status, StepStatus::Skipped);
    assert!(!low.context_data.contains_key("ran"));
    assert_eq!(low.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_retries_exhausted_marks_step_failed() {
    let orchestrator = fast_orchestrator();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let agent = FnAgent::new().with_function("flaky", move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err::<StepOutput, _>(StepError::failed("upstream unavailable"))
        }
    });
    orchestrator.register_agent("flaky_agent", Arc::new(agent)).await;

    let template = Template::new("retry", "Retry", "test").with_step(
        Step::new("call", "Call", StepType::Custom)
            .with_agent("flaky_agent", "flaky")
            .with_retry(2, 10),
    );
    orchestrator.create_template(template).await.unwrap();

    let execution = orchestrator
        .run_workflow("retry", Map::new(), Priority::High)
        .await
        .unwrap();

    let result = execution.result("call").unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.retry_attempts, 2);
    assert_eq!(result.error_kind, Some(StepErrorKind::Error));
    assert!(result.error_message.as_deref().unwrap().contains("upstream unavailable"));
    // Step failures are not escalated
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_retry_recovers_after_transient_error() {
    let orchestrator = fast_orchestrator();
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let agent = FnAgent::new().with_function("once", move |_ctx| {
        let counter = Arc::clone(&counter);
        async move {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(StepError::failed("transient"))
            } else {
                Ok(StepOutput::new().with("ok", true).with_cost(0.25))
            }
        }
    });
    orchestrator.register_agent("once_agent", Arc::new(agent)).await;

    let template = Template::new("recover", "Recover", "test").with_step(
        Step::new("call", "Call", StepType::Custom)
            .with_agent("once_agent", "once")
            .with_retry(3, 10)
            .with_estimate(1, 9.0),
    );
    orchestrator.create_template(template).await.unwrap();

    let execution = orchestrator
        .run_workflow("recover", Map::new(), Priority::Medium)
        .await
        .unwrap();

    let result = execution.result("call").unwrap();
    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.retry_attempts, 1);
    assert_eq!(result.cost_actual, 0.25);
    assert_eq!(execution.total_cost, 0.25);
}

#[tokio::test]
async fn test_timeout_fails_step_with_timeout_kind() {
    let orchestrator = fast_orchestrator();
    orchestrator.register_agent("worker", worker()).await;

    let template = Template::new("slow", "Slow", "test")
        .with_step(work_step("sleepy", 1_000).with_timeout_ms(50));
    orchestrator.create_template(template).await.unwrap();

    let started = Instant::now();
    let execution = orchestrator
        .run_workflow("slow", Map::new(), Priority::Medium)
        .await
        .unwrap();

    let result = execution.result("sleepy").unwrap();
    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.error_kind, Some(StepErrorKind::Timeout));
    assert!(started.elapsed() < Duration::from_millis(800));
}

#[tokio::test]
async fn test_failed_dependency_blocks_dependents() {
    let orchestrator = fast_orchestrator();
    let agent = FnAgent::new().with_function("boom", |_ctx| async { Err(StepError::failed("boom")) });
    orchestrator.register_agent("broken", Arc::new(agent)).await;

    let template = Template::new("blocked", "Blocked", "test")
        .with_step(
            Step::new("a", "A", StepType::Custom)
                .with_agent("broken", "boom")
                .with_retry(0, 0),
        )
        .with_step(Step::new("b", "B", StepType::Custom).depends_on("a"))
        .with_step(Step::new("c", "C", StepType::Custom).depends_on("b"))
        .with_step(Step::new("d", "D", StepType::Custom));
    orchestrator.create_template(template).await.unwrap();

    let execution = orchestrator
        .run_workflow("blocked", Map::new(), Priority::Medium)
        .await
        .unwrap();

    assert_eq!(execution.step_results.len(), 4);
    for id in ["b", "c"] {
        let result = execution.result(id).unwrap();
        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error_kind, Some(StepErrorKind::UpstreamFailed));
    }
    assert_eq!(execution.result("d").unwrap().status, StepStatus::Completed);
}

#[tokio::test]
async fn test_batch_payloads_merge_in_declaration_order() {
    let orchestrator = fast_orchestrator();
    let agent = FnAgent::new().with_function("claim", |ctx| async move {
        // The later-declared step finishes first
        let millis = if ctx.step_id == "first" { 60 } else { 5 };
        sleep(Duration::from_millis(millis)).await;
        Ok(StepOutput::new().with("winner", ctx.step_id.clone()))
    });
    orchestrator.register_agent("claimer", Arc::new(agent)).await;

    let template = Template::new("race", "Race", "test")
        .with_step(Step::new("first", "First", StepType::Custom).with_agent("claimer", "claim"))
        .with_step(Step::new("second", "Second", StepType::Custom).with_agent("claimer", "claim"))
        .with_step(
            Step::new("after", "After", StepType::Custom)
                .with_parameter("saw", true)
                .depends_on("first")
                .depends_on("second")
                .with_condition("context.winner == 'second'"),
        );
    orchestrator.create_template(template).await.unwrap();

    let execution = orchestrator
        .run_workflow("race", Map::new(), Priority::Medium)
        .await
        .unwrap();

    assert_eq!(execution.context_data["winner"], json!("second"));
    assert_eq!(execution.result("after").unwrap().status, StepStatus::Completed);
}

#[tokio::test]
async fn test_builtin_handler_reports_step_type() {
    let orchestrator = fast_orchestrator();
    let template = Template::new("builtin", "Builtin", "sales").with_step(
        Step::new("scan", "Scan", StepType::ScanLeads)
            .with_parameter("limit", "{{limit}}")
            .with_parameter("source", "crm")
            .with_estimate(10, 0.5),
    );
    orchestrator.create_template(template).await.unwrap();

    let execution = orchestrator
        .run_workflow("builtin", params(json!({"limit": 25})), Priority::Low)
        .await
        .unwrap();

    let result = execution.result("scan").unwrap();
    assert_eq!(result.status, StepStatus::Completed);
    assert_eq!(result.result_data["step_type"], json!("scan_leads"));
    assert_eq!(result.result_data["parameters"], json!({"limit": 25, "source": "crm"}));
    assert!(result.result_data.contains_key("executed_at"));
    assert_eq!(result.cost_actual, 0.5);
    assert_eq!(execution.parameters["limit"], json!(25));
}

#[tokio::test]
async fn test_status_snapshot_reports_progress() {
    let orchestrator = fast_orchestrator();
    let template = Template::new("progress", "Progress", "test")
        .with_step(Step::new("a", "A", StepType::Custom))
        .with_step(Step::new("b", "B", StepType::Custom).with_condition("context.get('never', False)"))
        .with_step(Step::new("c", "C", StepType::GenerateReport).depends_on("a"));
    orchestrator.create_template(template).await.unwrap();

    let execution = orchestrator
        .run_workflow("progress", Map::new(), Priority::Medium)
        .await
        .unwrap();

    let snapshot = orchestrator
        .get_execution_status(&execution.execution_id)
        .await
        .unwrap();
    assert_eq!(snapshot.status, ExecutionStatus::Completed);
    assert_eq!(snapshot.progress, 100.0);
    assert_eq!(snapshot.step_results.len(), 3);
    assert!(snapshot.duration.is_some());

    assert!(orchestrator.get_execution_status("exec_missing").await.is_none());
}

#[tokio::test]
async fn test_metrics_and_bottleneck_analysis() {
    let orchestrator = fast_orchestrator();
    orchestrator.register_agent("worker", worker()).await;

    let template = Template::new("perf", "Perf", "test")
        .with_step(work_step("quick", 5).with_estimate(1, 0.0))
        .with_step(work_step("heavy", 80).with_estimate(0, 0.0).depends_on("quick"));
    orchestrator.create_template(template).await.unwrap();

    for _ in 0..2 {
        orchestrator
            .run_workflow("perf", Map::new(), Priority::Medium)
            .await
            .unwrap();
    }

    let metrics = orchestrator.get_metrics("perf").await.unwrap();
    assert_eq!(metrics.total_executions, 2);
    assert_eq!(metrics.successful_executions, 2);
    assert!(metrics.average_duration > 0.0);

    let report = orchestrator.analyze_performance("perf").await.unwrap();
    assert_eq!(report.bottlenecks[0].step_id, "heavy");
    assert_eq!(
        report.suggestions,
        vec!["Step 'heavy' taking longer than expected - consider optimization".to_string()]
    );

    let metrics = orchestrator.get_metrics("perf").await.unwrap();
    assert_eq!(metrics.bottleneck_steps[0], "heavy");
    assert!(orchestrator.analyze_performance("unknown").await.is_none());
}

#[tokio::test]
async fn test_template_registration_validates_graph() {
    let orchestrator = fast_orchestrator();

    let cyclic = Template::new("cyclic", "Cyclic", "test")
        .with_step(Step::new("a", "A", StepType::Custom).depends_on("b"))
        .with_step(Step::new("b", "B", StepType::Custom).depends_on("a"));
    let err = orchestrator.create_template(cyclic).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Template(TemplateError::CyclicDependency(_))));

    let dangling = Template::new("dangling", "Dangling", "test")
        .with_step(Step::new("a", "A", StepType::Custom).depends_on("ghost"));
    let err = orchestrator.create_template(dangling).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::Template(TemplateError::UnknownDependency { .. })));

    assert!(orchestrator.list_templates(None).await.is_empty());
}

#[tokio::test]
async fn test_template_listing_and_estimates() {
    let orchestrator = fast_orchestrator();
    let chain = Template::new("chain", "Chain", "sales")
        .with_step(Step::new("a", "A", StepType::Custom).with_estimate(10, 0.1))
        .with_step(Step::new("b", "B", StepType::Custom).with_estimate(10, 0.1).depends_on("a"))
        .with_step(Step::new("c", "C", StepType::Custom).with_estimate(10, 0.1).depends_on("b"));
    orchestrator.create_template(chain).await.unwrap();
    orchestrator
        .create_template(Template::new("alpha", "Alpha", "ops"))
        .await
        .unwrap();

    let stored = orchestrator.get_template("chain").await.unwrap();
    assert_eq!(stored.estimated_total_duration, 30);

    let all: Vec<String> = orchestrator
        .list_templates(None)
        .await
        .into_iter()
        .map(|t| t.template_id)
        .collect();
    assert_eq!(all, vec!["alpha", "chain"]);
    assert_eq!(orchestrator.list_templates(Some("sales")).await.len(), 1);
}

#[tokio::test]
async fn test_unknown_template_is_rejected() {
    let orchestrator = fast_orchestrator();
    let err = orchestrator
        .execute_workflow("missing", Map::new(), Priority::Medium)
        .await
        .unwrap_err();
    assert_eq!(err, OrchestratorError::TemplateNotFound("missing".to_string()));
}

#[tokio::test]
async fn test_cancel_execution_fails_run() {
    let orchestrator = fast_orchestrator();
    orchestrator.register_agent("worker", worker()).await;
    let template = Template::new("long", "Long", "test")
        .with_step(work_step("wait", 5_000))
        .with_step(work_step("next", 0).depends_on("wait"));
    orchestrator.create_template(template).await.unwrap();

    let execution_id = orchestrator
        .execute_workflow("long", Map::new(), Priority::Medium)
        .await
        .unwrap();
    sleep(Duration::from_millis(50)).await;
    assert!(orchestrator.cancel_execution(&execution_id).await);

    let execution = orchestrator.wait_for_execution(&execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.error.as_deref(), Some("cancelled"));
    assert_eq!(execution.result("wait").unwrap().error_kind, Some(StepErrorKind::Cancelled));
    assert!(execution.result("next").is_none());

    assert!(!orchestrator.cancel_execution(&execution_id).await);
}

#[tokio::test]
async fn test_shutdown_cancels_runs_and_rejects_new_work() {
    let orchestrator = fast_orchestrator();
    orchestrator.register_agent("worker", worker()).await;
    orchestrator
        .create_template(Template::new("long", "Long", "test").with_step(work_step("wait", 5_000)))
        .await
        .unwrap();

    let execution_id = orchestrator
        .execute_workflow("long", Map::new(), Priority::Medium)
        .await
        .unwrap();
    sleep(Duration::from_millis(20)).await;

    orchestrator.shutdown().await;

    let execution = orchestrator.get_execution(&execution_id).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert!(orchestrator.is_shutting_down());

    let err = orchestrator
        .execute_workflow("long", Map::new(), Priority::Medium)
        .await
        .unwrap_err();
    assert_eq!(err, OrchestratorError::ShuttingDown);
}

#[tokio::test]
async fn test_events_stream_step_lifecycle() {
    let orchestrator = fast_orchestrator();
    let agent = FnAgent::new().with_function("chatty", |ctx| async move {
        ctx.events.info("working");
        Ok(StepOutput::new())
    });
    orchestrator.register_agent("chatty", Arc::new(agent)).await;

    let template = Template::new("events", "Events", "test")
        .with_step(Step::new("talk", "Talk", StepType::Custom).with_agent("chatty", "chatty"))
        .with_step(Step::new("skip", "Skip", StepType::Custom).with_condition("1 > 2"));
    orchestrator.create_template(template).await.unwrap();

    let mut events = orchestrator.subscribe_events();
    let execution = orchestrator
        .run_workflow("events", Map::new(), Priority::Medium)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        assert_eq!(event.execution_id(), execution.execution_id);
        seen.push(event);
    }

    assert!(matches!(seen.first(), Some(ExecutionEvent::WorkflowStarted { .. })));
    assert!(matches!(seen.last(), Some(ExecutionEvent::WorkflowCompleted { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepSkipped { step_id, .. } if step_id == "skip")));
    assert!(seen
        .iter()
        .any(|e| matches!(e, ExecutionEvent::StepCompleted { step_id, .. } if step_id == "talk")));
    assert!(seen.iter().any(|e| matches!(e, ExecutionEvent::StepEvent { .. })));
}

#[tokio::test]
async fn test_finished_executions_are_evicted() {
    let orchestrator = Orchestrator::with_config(RuntimeConfig {
        builtin_step_delay_ms: 0,
        max_retained_executions: 2,
        ..RuntimeConfig::default()
    });
    orchestrator
        .create_template(Template::new("tiny", "Tiny", "test").with_step(Step::new("a", "A", StepType::Custom)))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        let execution = orchestrator
            .run_workflow("tiny", Map::new(), Priority::Medium)
            .await
            .unwrap();
        ids.push(execution.execution_id);
    }
    // Eviction runs after completion is signalled
    sleep(Duration::from_millis(20)).await;

    assert!(orchestrator.get_execution(&ids[0]).await.is_none());
    assert!(orchestrator.get_execution(&ids[3]).await.is_some());
}

#[tokio::test]
async fn test_concurrent_waiters_survive_eviction() {
    let orchestrator = Orchestrator::with_config(RuntimeConfig {
        builtin_step_delay_ms: 0,
        max_retained_executions: 1,
        ..RuntimeConfig::default()
    });
    orchestrator
        .create_template(Template::new("tiny", "Tiny", "test").with_step(Step::new("a", "A", StepType::Custom)))
        .await
        .unwrap();

    let runs = (0..8).map(|_| orchestrator.run_workflow("tiny", Map::new(), Priority::Medium));
    let finished = futures::future::join_all(runs).await;

    assert_eq!(finished.len(), 8);
    for execution in finished {
        let execution = execution.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.step_results["a"].status, StepStatus::Completed);
    }
}
