use crate::{Step, TemplateError};
use chrono::{DateTime, Utc};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

pub type TemplateId = String;
pub type StepId = String;

/// Reusable, named workflow definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub template_id: TemplateId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: String,
    pub category: String,
    pub steps: Vec<Step>,
    #[serde(default)]
    pub default_parameters: Map<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Critical-path length in seconds, derived from the steps
    #[serde(default)]
    pub estimated_total_duration: u64,
    #[serde(default)]
    pub estimated_total_cost: f64,
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,
    #[serde(default)]
    pub last_optimized: Option<DateTime<Utc>>,
}

fn default_version() -> String {
    "1.0".to_string()
}

fn default_success_rate() -> f64 {
    0.95
}

impl Template {
    pub fn new(
        template_id: impl Into<String>,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Self {
            template_id: template_id.into(),
            name: name.into(),
            description: String::new(),
            version: default_version(),
            category: category.into(),
            steps: Vec::new(),
            default_parameters: Map::new(),
            tags: Vec::new(),
            estimated_total_duration: 0,
            estimated_total_cost: 0.0,
            success_rate: default_success_rate(),
            last_optimized: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_default_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.default_parameters.insert(key.into(), value.into());
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.add_step(step);
        self
    }

    pub fn add_step(&mut self, step: Step) {
        self.steps.push(step);
        self.recalculate_estimates();
    }

    pub fn find_step(&self, step_id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// Refresh the derived duration/cost estimates.
    ///
    /// The duration is left untouched when the step graph is not a valid DAG;
    /// `validate` reports the reason.
    pub fn recalculate_estimates(&mut self) {
        if let Ok(duration) = self.critical_path() {
            self.estimated_total_duration = duration;
        }
        self.estimated_total_cost = self.steps.iter().map(|s| s.cost_estimate).sum();
    }

    /// Check step ids are unique, dependencies resolve, and the graph is acyclic
    pub fn validate(&self) -> Result<(), TemplateError> {
        self.build_graph().map(|_| ())
    }

    /// Longest duration-weighted path through the dependency DAG.
    ///
    /// Dependent steps are modelled as serial and independent steps as
    /// fully parallel.
    pub fn critical_path(&self) -> Result<u64, TemplateError> {
        let graph = self.build_graph()?;
        let order = toposort(&graph, None)
            .map_err(|cycle| TemplateError::CyclicDependency(self.steps[graph[cycle.node_id()]].step_id.clone()))?;

        let mut path: HashMap<NodeIndex, u64> = HashMap::with_capacity(order.len());
        for idx in order {
            let step = &self.steps[graph[idx]];
            let upstream = graph
                .neighbors_directed(idx, Direction::Incoming)
                .filter_map(|dep| path.get(&dep).copied())
                .max()
                .unwrap_or(0);
            path.insert(idx, upstream.saturating_add(step.estimated_duration));
        }

        Ok(path.values().copied().max().unwrap_or(0))
    }

    /// Dependency graph with an edge from every dependency to its dependent.
    /// Node weights index into `steps`.
    pub fn build_graph(&self) -> Result<DiGraph<usize, ()>, TemplateError> {
        let mut graph = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for (pos, step) in self.steps.iter().enumerate() {
            if index.insert(step.step_id.as_str(), graph.add_node(pos)).is_some() {
                return Err(TemplateError::DuplicateStep(step.step_id.clone()));
            }
        }

        for step in &self.steps {
            let to = index[step.step_id.as_str()];
            for dep in &step.dependencies {
                if dep == &step.step_id {
                    return Err(TemplateError::CyclicDependency(step.step_id.clone()));
                }
                let from = index.get(dep.as_str()).ok_or_else(|| TemplateError::UnknownDependency {
                    step: step.step_id.clone(),
                    dependency: dep.clone(),
                })?;
                graph.add_edge(*from, to, ());
            }
        }

        if let Err(cycle) = toposort(&graph, None) {
            return Err(TemplateError::CyclicDependency(
                self.steps[graph[cycle.node_id()]].step_id.clone(),
            ));
        }

        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StepType;

    fn step(id: &str, secs: u64) -> Step {
        Step::new(id, id, StepType::Custom).with_estimate(secs, 0.0)
    }

    #[test]
    fn serial_chain_sums_durations() {
        let template = Template::new("t", "chain", "test")
            .with_step(step("a", 10))
            .with_step(step("b", 10).depends_on("a"))
            .with_step(step("c", 10).depends_on("b"));

        assert_eq!(template.estimated_total_duration, 30);
    }

    #[test]
    fn parallel_branches_take_the_longest() {
        let template = Template::new("t", "fan", "test")
            .with_step(step("init", 5))
            .with_step(step("a", 20).depends_on("init"))
            .with_step(step("b", 35).depends_on("init"))
            .with_step(step("join", 1).depends_on("a").depends_on("b"));

        assert_eq!(template.critical_path().unwrap(), 41);
    }

    #[test]
    fn raising_an_estimate_never_shortens_the_path() {
        let mut template = Template::new("t", "fan", "test")
            .with_step(step("init", 5))
            .with_step(step("a", 20).depends_on("init"))
            .with_step(step("b", 35).depends_on("init"));
        let before = template.critical_path().unwrap();

        template.steps[1].estimated_duration = 30;
        template.recalculate_estimates();

        assert!(template.estimated_total_duration >= before);
        assert_eq!(template.estimated_total_duration, 40);
    }

    #[test]
    fn huge_estimates_saturate() {
        let template = Template::new("t", "huge", "test")
            .with_step(step("a", u64::MAX))
            .with_step(step("b", 10).depends_on("a"));

        assert_eq!(template.critical_path().unwrap(), u64::MAX);
        assert_eq!(template.estimated_total_duration, u64::MAX);
    }

    #[test]
    fn cost_is_summed() {
        let template = Template::new("t", "cost", "test")
            .with_step(Step::new("a", "a", StepType::Custom).with_estimate(1, 0.10))
            .with_step(Step::new("b", "b", StepType::Custom).with_estimate(1, 0.25));

        assert!((template.estimated_total_cost - 0.35).abs() < 1e-9);
    }

    #[test]
    fn empty_template_has_zero_estimate() {
        let template = Template::new("t", "empty", "test");
        assert_eq!(template.critical_path().unwrap(), 0);
    }

    #[test]
    fn rejects_cycles_and_dangling_dependencies() {
        let cyclic = Template::new("t", "cycle", "test")
            .with_step(step("a", 1).depends_on("b"))
            .with_step(step("b", 1).depends_on("a"));
        assert!(matches!(cyclic.validate(), Err(TemplateError::CyclicDependency(_))));

        let self_loop = Template::new("t", "self", "test").with_step(step("a", 1).depends_on("a"));
        assert_eq!(
            self_loop.validate(),
            Err(TemplateError::CyclicDependency("a".to_string()))
        );

        let dangling = Template::new("t", "dangling", "test").with_step(step("a", 1).depends_on("ghost"));
        assert_eq!(
            dangling.validate(),
            Err(TemplateError::UnknownDependency {
                step: "a".to_string(),
                dependency: "ghost".to_string(),
            })
        );

        let duplicate = Template::new("t", "dup", "test")
            .with_step(step("a", 1))
            .with_step(step("a", 2));
        assert_eq!(duplicate.validate(), Err(TemplateError::DuplicateStep("a".to_string())));
    }
}
