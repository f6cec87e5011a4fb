use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use stepcore::{Template, WorkflowMetrics};

/// Average observed duration of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTiming {
    pub step_id: String,
    pub average_duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceReport {
    pub template_id: String,
    pub metrics: WorkflowMetrics,
    /// Slowest steps first, at most three
    pub bottlenecks: Vec<StepTiming>,
    pub suggestions: Vec<String>,
    pub step_performance: BTreeMap<String, f64>,
}

/// Thresholds for the plain-language suggestions
#[derive(Debug, Clone, Copy)]
pub struct AnalysisThresholds {
    pub slow_step_factor: f64,
    pub failure_rate: f64,
}

const MAX_BOTTLENECKS: usize = 3;

/// Rank steps by rolling average duration and derive suggestions.
///
/// Updates `metrics` with the bottleneck ids and suggestions it reports.
pub fn analyze(
    template: &Template,
    metrics: &mut WorkflowMetrics,
    averages: &HashMap<String, f64>,
    thresholds: AnalysisThresholds,
) -> PerformanceReport {
    let mut ranked: Vec<StepTiming> = template
        .steps
        .iter()
        .filter_map(|step| {
            averages.get(&step.step_id).map(|avg| StepTiming {
                step_id: step.step_id.clone(),
                average_duration: *avg,
            })
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.average_duration
            .total_cmp(&a.average_duration)
            .then_with(|| a.step_id.cmp(&b.step_id))
    });

    let step_performance: BTreeMap<String, f64> = ranked
        .iter()
        .map(|t| (t.step_id.clone(), t.average_duration))
        .collect();
    ranked.truncate(MAX_BOTTLENECKS);

    let mut suggestions = Vec::new();
    for timing in &ranked {
        let Some(step) = template.find_step(&timing.step_id) else {
            continue;
        };
        if timing.average_duration > step.estimated_duration as f64 * thresholds.slow_step_factor {
            suggestions.push(format!(
                "Step '{}' taking longer than expected - consider optimization",
                step.name
            ));
        }
    }

    if metrics.failure_rate() > thresholds.failure_rate {
        suggestions.push("High failure rate - review error handling and retry logic".to_string());
    }

    metrics.bottleneck_steps = ranked.iter().map(|t| t.step_id.clone()).collect();
    metrics.optimization_suggestions = suggestions.clone();

    PerformanceReport {
        template_id: template.template_id.clone(),
        metrics: metrics.clone(),
        bottlenecks: ranked,
        suggestions,
        step_performance,
    }
}
