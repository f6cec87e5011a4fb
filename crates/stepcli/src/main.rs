use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::path::{Path, PathBuf};
use stepcore::{ExecutionEvent, ExecutionStatus, Priority, Step, StepEvent, StepStatus, StepType, Template};
use steplearn::{AdaptiveConfig, AdaptiveSystem, DataPoint};
use stepruntime::{Orchestrator, RuntimeConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "stepflow")]
#[command(about = "Workflow orchestration and adaptive learning CLI", long_about = None)]
struct Cli {
    /// JSON file with `runtime` and `adaptive` settings
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow template file
    Run {
        /// Path to template JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Execution parameters as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a template file
    Validate {
        /// Path to template JSON file
        file: PathBuf,
    },

    /// Create a new example template
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },

    /// List the built-in workflow templates
    Templates,

    /// List the standard agents and their functions
    Agents,

    /// Run the default templates repeatedly and show what the adaptive system learns
    Demo {
        #[arg(short, long, default_value_t = 20)]
        runs: usize,
    },

    /// Detect patterns in a JSON array of recorded data points
    Learn {
        #[arg(short, long)]
        file: PathBuf,
    },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CliConfig {
    runtime: RuntimeConfig,
    adaptive: AdaptiveConfig,
}

fn load_config(path: Option<&Path>) -> Result<CliConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            Ok(serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))?)
        }
        None => Ok(CliConfig::default()),
    }
}

/// `RUST_LOG` wins over the default level
fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { file, input, verbose } => {
            init_tracing(if verbose { "debug" } else { "info" });
            run_template(file, input, config.runtime).await?;
        }

        Commands::Validate { file } => {
            init_tracing("warn");
            validate_template(file)?;
        }

        Commands::Init { output } => {
            create_example_template(output)?;
        }

        Commands::Templates => {
            list_templates();
        }

        Commands::Agents => {
            init_tracing("warn");
            list_agents().await;
        }

        Commands::Demo { runs } => {
            init_tracing("warn");
            run_demo(runs, config).await?;
        }

        Commands::Learn { file } => {
            init_tracing("warn");
            learn_from_file(file, config.adaptive).await?;
        }
    }

    Ok(())
}

fn read_template(file: &Path) -> Result<Template> {
    let template_json =
        std::fs::read_to_string(file).with_context(|| format!("reading template {}", file.display()))?;
    let template: Template = serde_json::from_str(&template_json)?;
    Ok(template)
}

async fn seeded_orchestrator(config: RuntimeConfig) -> Result<Orchestrator> {
    let orchestrator = Orchestrator::with_config(config);
    stepagents::register_all(&orchestrator).await;
    for template in stepagents::default_templates() {
        orchestrator.create_template(template).await?;
    }
    Ok(orchestrator)
}

async fn run_template(file: PathBuf, input: Option<String>, config: RuntimeConfig) -> Result<()> {
    println!("🚀 Loading template from: {}", file.display());

    let template = read_template(&file)?;

    println!("📋 Template: {} ({})", template.name, template.template_id);
    println!("   Steps: {}", template.steps.len());
    println!();

    let parameters: Map<String, Value> = match input {
        Some(input_str) => match serde_json::from_str::<Value>(&input_str)? {
            Value::Object(obj) => obj,
            _ => return Err(anyhow::anyhow!("Input must be a JSON object")),
        },
        None => Map::new(),
    };

    let orchestrator = seeded_orchestrator(config).await?;
    let template_id = orchestrator.create_template(template).await?;

    // Subscribe before starting so no event is missed
    let mut events = orchestrator.subscribe_events();

    let execution_id = orchestrator
        .execute_workflow(&template_id, parameters, Priority::Medium)
        .await?;

    let watched = execution_id.clone();
    let event_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            };
            if event.execution_id() != watched {
                continue;
            }
            match event {
                ExecutionEvent::WorkflowStarted { .. } => {
                    println!("▶️  Workflow started");
                }
                ExecutionEvent::StepStarted { step_id, attempt, .. } => {
                    if attempt > 0 {
                        println!("  ⚡ Starting step: {} (attempt {})", step_id, attempt + 1);
                    } else {
                        println!("  ⚡ Starting step: {}", step_id);
                    }
                }
                ExecutionEvent::StepCompleted { step_id, result, .. } => {
                    let secs = result.duration_seconds.unwrap_or_default();
                    println!("  ✅ Step {} completed in {:.0}ms", step_id, secs * 1000.0);
                }
                ExecutionEvent::StepFailed { step_id, result, .. } => {
                    println!(
                        "  ❌ Step {} failed: {}",
                        step_id,
                        result.error_message.as_deref().unwrap_or("unknown error")
                    );
                }
                ExecutionEvent::StepSkipped { step_id, .. } => {
                    println!("  ⏭️  Step {} skipped", step_id);
                }
                ExecutionEvent::StepRetrying { step_id, attempt, error, .. } => {
                    println!("  🔁 Step {} retrying after attempt {}: {}", step_id, attempt + 1, error);
                }
                ExecutionEvent::StepEvent { step_id, event, .. } => match event {
                    StepEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", step_id, message);
                    }
                    StepEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", step_id, message);
                    }
                    StepEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {}% - {}", step_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", step_id, percent);
                        }
                    }
                    StepEvent::Data { .. } => {}
                },
                ExecutionEvent::WorkflowCompleted { status, duration_ms, .. } => {
                    if status == ExecutionStatus::Completed {
                        println!("✨ Workflow completed in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let execution = orchestrator
        .wait_for_execution(&execution_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("execution {} disappeared", execution_id))?;
    let _ = event_task.await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", execution.execution_id);
    println!("   Status: {:?}", execution.status);
    println!(
        "   Completed: {}/{} steps ({} skipped, {} failed)",
        execution.count_with_status(StepStatus::Completed),
        execution.step_results.len(),
        execution.count_with_status(StepStatus::Skipped),
        execution.count_with_status(StepStatus::Failed)
    );
    println!("   Cost: {:.3}", execution.total_cost);
    if let Some(error) = &execution.error {
        println!("   Error: {}", error);
    }

    if !execution.context_data.is_empty() {
        println!();
        println!("📤 Context:");
        for (key, value) in &execution.context_data {
            println!("   {}: {}", key, value);
        }
    }

    orchestrator.shutdown().await;
    Ok(())
}

fn validate_template(file: PathBuf) -> Result<()> {
    println!("🔍 Validating template: {}", file.display());

    let mut template = read_template(&file)?;
    template.validate()?;
    template.recalculate_estimates();

    println!("✅ Template is valid:");
    println!("   Name: {}", template.name);
    println!("   Steps: {}", template.steps.len());
    println!("   Critical path: {}s", template.estimated_total_duration);
    println!("   Estimated cost: {:.2}", template.estimated_total_cost);

    for step in &template.steps {
        if let Some(condition) = &step.condition {
            if let Err(e) = stepcore::Condition::parse(condition) {
                println!("   ⚠️  Step {} has an unparseable condition ({}); it will always run", step.step_id, e);
            }
        }
    }

    Ok(())
}

fn list_templates() {
    println!("📦 Built-in Templates:");
    println!();

    for template in stepagents::default_templates() {
        println!("  • {} ({})", template.template_id, template.category);
        println!("    {}", template.description);
        println!(
            "    {} steps, ~{}s, ~{:.2} cost",
            template.steps.len(),
            template.estimated_total_duration,
            template.estimated_total_cost
        );
    }
}

async fn list_agents() {
    println!("🤖 Standard Agents:");
    println!();

    let orchestrator = Orchestrator::new();
    stepagents::register_all(&orchestrator).await;

    for name in orchestrator.list_agents().await {
        println!("  • {}", name);
    }
}

fn create_example_template(output: PathBuf) -> Result<()> {
    let template = Template::new("example_pipeline", "Example Pipeline", "example")
        .with_description("Scans leads, logs the count, and enriches when any were found")
        .with_default_parameter("limit", 10)
        .with_step(
            Step::new("scan", "Scan for Leads", StepType::ScanLeads)
                .with_agent("LeadScannerAgent", "scan_leads")
                .with_parameter("limit", "{{limit}}")
                .with_estimate(30, 0.02),
        )
        .with_step(
            Step::new("log", "Log Lead Count", StepType::Custom)
                .with_agent("DebugAgent", "log")
                .with_parameter("message", "scan finished")
                .depends_on("scan")
                .with_parallel_group("post_scan")
                .with_estimate(1, 0.0),
        )
        .with_step(
            Step::new("enrich", "Enrich Leads", StepType::EnrichLeads)
                .with_agent("LeadScannerAgent", "enrich_leads")
                .with_parameter("min_score", 60)
                .depends_on("scan")
                .with_parallel_group("post_scan")
                .with_condition("context.get('lead_count', 0) > 0")
                .with_estimate(60, 0.10),
        );

    let json = serde_json::to_string_pretty(&template)?;
    std::fs::write(&output, json)?;

    println!("✨ Created example template: {}", output.display());
    println!();
    println!("Run it with:");
    println!("  stepflow run --file {} --input '{{\"limit\": 5}}'", output.display());

    Ok(())
}

async fn run_demo(runs: usize, config: CliConfig) -> Result<()> {
    let orchestrator = seeded_orchestrator(config.runtime).await?;
    let adaptive = AdaptiveSystem::new(config.adaptive);
    let template_ids: Vec<String> = orchestrator
        .list_templates(None)
        .await
        .into_iter()
        .map(|t| t.template_id)
        .collect();

    println!("🎬 Running {} rounds of {} templates", runs, template_ids.len());

    for round in 0..runs {
        let limit = 5 + (round * 7) % 46;
        let pending = template_ids.iter().map(|id| {
            let parameters = json!({"limit": limit}).as_object().cloned().unwrap_or_default();
            orchestrator.run_workflow(id, parameters, Priority::Medium)
        });

        for execution in futures::future::join_all(pending).await {
            let execution = execution?;
            let recorded = adaptive.record_execution(&execution).await?;
            tracing::debug!(round, template_id = %execution.template_id, recorded, "Recorded demo run");
        }

        if (round + 1) % 5 == 0 {
            println!("   ... {} rounds done", round + 1);
        }
    }

    println!();
    for id in &template_ids {
        if let Some(report) = orchestrator.analyze_performance(id).await {
            println!(
                "📈 {}: {} runs, avg {:.2}s, avg cost {:.3}",
                id, report.metrics.total_executions, report.metrics.average_duration, report.metrics.average_cost
            );
            for timing in &report.bottlenecks {
                println!("     slowest: {} ({:.3}s)", timing.step_id, timing.average_duration);
            }
            for suggestion in &report.suggestions {
                println!("     💡 {}", suggestion);
            }
        }
    }

    print_learning(&adaptive).await;

    adaptive.shutdown().await;
    orchestrator.shutdown().await;
    Ok(())
}

async fn learn_from_file(file: PathBuf, config: AdaptiveConfig) -> Result<()> {
    println!("📚 Loading data points from: {}", file.display());

    let text = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    let points: Vec<DataPoint> = serde_json::from_str(&text)?;
    let total = points.len();

    let adaptive = AdaptiveSystem::new(config);
    for point in points {
        adaptive.ingest(point).await?;
    }

    println!("   Retained {}/{} points", adaptive.data_point_count().await, total);
    print_learning(&adaptive).await;

    adaptive.shutdown().await;
    Ok(())
}

async fn print_learning(adaptive: &AdaptiveSystem) {
    let patterns = adaptive.detect_patterns().await;

    println!();
    println!("🔎 Patterns ({}):", patterns.len());
    for pattern in &patterns {
        println!(
            "  • [{}] {} (confidence {:.2}, seen {}x)",
            pattern.pattern_type.as_str(),
            pattern.name,
            pattern.confidence,
            pattern.frequency
        );
        println!("    {}", pattern.description);
    }

    let insights = adaptive.get_insights().await;
    if !insights.is_empty() {
        println!();
        println!("💡 Insights:");
        for insight in &insights {
            println!("  • (p{}) {}: {}", insight.priority, insight.title, insight.description);
        }
    }

    let recommendations = adaptive.get_recommendations(None, 5).await;
    println!();
    println!("🛠️  Recommendations ({}):", recommendations.len());
    for rec in &recommendations {
        let target = match (&rec.target_workflow, &rec.target_step) {
            (Some(wf), Some(step)) => format!("{}/{}", wf, step),
            (Some(wf), None) => wf.clone(),
            _ => "all workflows".to_string(),
        };
        println!(
            "  • (p{}) {} [{:?}] -> {}",
            rec.priority, rec.title, rec.recommendation_type, target
        );
        println!("    {}", rec.description);
    }
}
