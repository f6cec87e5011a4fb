use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use stepcore::{Agent, StepContext, StepError, StepOutput};

/// Registry of agents keyed by the name steps refer to in `agent_class`
pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    /// Register an agent, replacing any previous binding of `name`
    pub fn register(&mut self, name: impl Into<String>, agent: Arc<dyn Agent>) {
        let name = name.into();
        tracing::info!(agent = %name, functions = ?agent.functions(), "Registering agent");
        self.agents.insert(name, agent);
    }

    /// Find the agent bound to `agent_class` if it exposes `function`
    pub fn resolve(&self, agent_class: Option<&str>, function: Option<&str>) -> Option<Arc<dyn Agent>> {
        let agent = self.agents.get(agent_class?)?;
        agent.has_function(function?).then(|| Arc::clone(agent))
    }

    /// Get all registered agent names, sorted
    pub fn list_agents(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type AgentFn = Arc<dyn Fn(StepContext) -> BoxFuture<'static, Result<StepOutput, StepError>> + Send + Sync>;

/// Agent assembled from async closures, one per function name
#[derive(Clone, Default)]
pub struct FnAgent {
    functions: HashMap<String, AgentFn>,
}

impl FnAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_function<F, Fut>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(StepContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StepOutput, StepError>> + Send + 'static,
    {
        let wrapped: AgentFn = Arc::new(move |ctx: StepContext| -> BoxFuture<'static, Result<StepOutput, StepError>> {
            Box::pin(f(ctx))
        });
        self.functions.insert(name.into(), wrapped);
        self
    }
}

#[async_trait]
impl Agent for FnAgent {
    fn functions(&self) -> Vec<String> {
        let mut names: Vec<String> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    fn has_function(&self, function: &str) -> bool {
        self.functions.contains_key(function)
    }

    async fn call(&self, function: &str, ctx: StepContext) -> Result<StepOutput, StepError> {
        match self.functions.get(function) {
            Some(f) => f(ctx).await,
            None => Err(StepError::failed(format!("unknown function '{}'", function))),
        }
    }
}
