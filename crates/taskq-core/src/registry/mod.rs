//! Process-local, thread-safe Agent/Tool/Workflow registries, built once at
//! worker startup and shared read-only across the state machine's context,
//! with per-name cached singleton construction rather than eager
//! registration of every entry up front.

pub mod agent;
pub mod config;
pub mod tool;
pub mod workflow;

use std::collections::HashMap;
use std::path::Path;

pub use agent::{Agent, AgentFactory, AgentOutput, AgentRegistry, Usage};
pub use config::{RegistryConfig, RegistryConfigError};
pub use tool::{Tool, ToolFactory, ToolOutput, ToolRegistry};
pub use workflow::{CoordinationType, WorkflowDefinition, WorkflowFactory, WorkflowRegistry, WorkflowStep};

/// The factories a binary compiles in, keyed by the `class` identifier used
/// in TOML config entries. The core crate never constructs concrete
/// agents/tools itself -- "no agent code distribution, every worker loads
/// the same registry at boot" means these factories are already part of the
/// worker binary; the registry config only says which name uses which
/// compiled-in factory and with what per-instance config.
pub struct FactoryTable {
    pub agents: HashMap<String, AgentFactory>,
    pub tools: HashMap<String, ToolFactory>,
    pub workflows: HashMap<String, WorkflowFactory>,
}

impl FactoryTable {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            tools: HashMap::new(),
            workflows: HashMap::new(),
        }
    }
}

impl Default for FactoryTable {
    fn default() -> Self {
        Self::new()
    }
}

/// The three registries a worker needs, bundled together for convenient
/// startup wiring and passing through the worker context.
#[derive(Default)]
pub struct Registries {
    pub agents: AgentRegistry,
    pub tools: ToolRegistry,
    pub workflows: WorkflowRegistry,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every entry in a parsed [`RegistryConfig`] against this
    /// registry set, resolving each entry's `class` against `factories`.
    ///
    /// Unknown `class` identifiers are a configuration error at startup
    /// (the binary didn't compile in a factory for a name the config
    /// references), represented the same way an unknown tool reference is.
    pub async fn apply_config(
        &self,
        config: &RegistryConfig,
        factories: &FactoryTable,
    ) -> Result<(), RegistryConfigError> {
        for tool in &config.tools {
            let factory = factories
                .tools
                .get(&tool.class)
                .ok_or_else(|| RegistryConfigError::UnknownToolReference {
                    agent: String::new(),
                    tool: tool.class.clone(),
                })?
                .clone();
            let tool_config = serde_json::to_value(&tool.config).unwrap_or(serde_json::Value::Null);
            self.tools
                .register(tool.name.clone(), factory, tool_config, tool.description.clone())
                .await;
        }

        for agent in &config.agents {
            let factory = factories
                .agents
                .get(&agent.class)
                .ok_or_else(|| RegistryConfigError::UnknownToolReference {
                    agent: agent.name.clone(),
                    tool: agent.class.clone(),
                })?
                .clone();
            let agent_config = serde_json::to_value(&agent.config).unwrap_or(serde_json::Value::Null);
            self.agents
                .register(
                    agent.name.clone(),
                    factory,
                    agent_config,
                    agent.tools.clone(),
                    agent.description.clone(),
                )
                .await;
        }

        for workflow in &config.workflows {
            let steps = workflow
                .steps
                .iter()
                .map(|s| WorkflowStep {
                    agent_type: s.agent_type.clone(),
                    name: s.name.clone(),
                    is_assessment: s.is_assessment,
                })
                .collect::<Vec<_>>();
            let definition = WorkflowDefinition {
                name: workflow.name.clone(),
                description: workflow.description.clone(),
                coordination_type: workflow.coordination_type,
                max_iterations: workflow.max_iterations,
                steps,
            };
            let factory: WorkflowFactory = std::sync::Arc::new(move |_cfg| Ok(definition.clone()));
            self.workflows
                .register(
                    workflow.name.clone(),
                    factory,
                    serde_json::Value::Null,
                    workflow.description.clone(),
                )
                .await;
        }

        Ok(())
    }

    /// Bootstrap in priority order: declarative config file, then filesystem
    /// discovery, then empty. `config_path`/`discovery_dir` come from
    /// `TASKQ_REGISTRY_CONFIG_PATH`/`TASKQ_REGISTRY_DISCOVERY_DIR`.
    pub async fn bootstrap(
        config_path: Option<&Path>,
        discovery_dir: Option<&Path>,
        factories: &FactoryTable,
    ) -> Result<Self, RegistryConfigError> {
        let registries = Self::new();

        if let Some(path) = config_path {
            if path.exists() {
                let config = config::load_from_path(path).await?;
                registries.apply_config(&config, factories).await?;
                return Ok(registries);
            }
        }

        if let Some(dir) = discovery_dir {
            if dir.exists() {
                let config = config::discover_directory(dir).await?;
                registries.apply_config(&config, factories).await?;
                return Ok(registries);
            }
        }

        Ok(registries)
    }
}
