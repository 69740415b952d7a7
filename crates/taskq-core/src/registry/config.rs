//! Declarative TOML registry configuration: parsing and validation for the
//! combined `agents`/`tools`/`workflows` file, plus the filesystem-discovery
//! fallback.
//!
//! Typed TOML structs with `#[serde(default)]`, duplicate-name detection via
//! `HashSet`, unknown-reference validation, and one `ParseError` enum
//! covering every failure mode, over three parallel tables of
//! interdependent registry entries.

use std::collections::HashSet;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use crate::registry::workflow::CoordinationType;

/// Every way [`parse_registry_toml`] and [`discover_directory`] can fail.
#[derive(Debug, Error)]
pub enum RegistryConfigError {
    #[error("failed to parse registry config: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("duplicate agent name: {0:?}")]
    DuplicateAgentName(String),

    #[error("duplicate tool name: {0:?}")]
    DuplicateToolName(String),

    #[error("duplicate workflow name: {0:?}")]
    DuplicateWorkflowName(String),

    #[error("agent {agent:?} references unregistered tool {tool:?}")]
    UnknownToolReference { agent: String, tool: String },

    #[error("workflow {0:?} declares zero steps")]
    EmptyWorkflow(String),

    #[error("workflow {0:?} uses iterative_refinement but declares no assessment step")]
    MissingAssessmentStep(String),

    #[error("workflow {0:?} declares more than one assessment step")]
    MultipleAssessmentSteps(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfigEntry {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub config: toml::Value,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfigEntry {
    pub name: String,
    pub class: String,
    #[serde(default)]
    pub config: toml::Value,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStepEntry {
    pub agent_type: String,
    pub name: String,
    #[serde(default)]
    pub is_assessment: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowConfigEntry {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub coordination_type: CoordinationType,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: i32,
    pub steps: Vec<WorkflowStepEntry>,
}

fn default_max_iterations() -> i32 {
    3
}

/// A fully parsed and validated registry config, from either the combined
/// file or filesystem discovery (which only ever populates `agents`/
/// `tools`; `workflows` stays empty for that path).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistryConfig {
    #[serde(default)]
    pub agents: Vec<AgentConfigEntry>,
    #[serde(default)]
    pub tools: Vec<ToolConfigEntry>,
    #[serde(default)]
    pub workflows: Vec<WorkflowConfigEntry>,
}

/// Parse and validate the combined registry TOML document.
pub fn parse_registry_toml(contents: &str) -> Result<RegistryConfig, RegistryConfigError> {
    let config: RegistryConfig = toml::from_str(contents)?;
    validate(&config)?;
    Ok(config)
}

/// Load and validate the combined registry TOML file at `path`.
pub async fn load_from_path(path: &Path) -> Result<RegistryConfig, RegistryConfigError> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RegistryConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
    parse_registry_toml(&contents)
}

fn validate(config: &RegistryConfig) -> Result<(), RegistryConfigError> {
    let mut agent_names = HashSet::new();
    for agent in &config.agents {
        if !agent_names.insert(agent.name.clone()) {
            return Err(RegistryConfigError::DuplicateAgentName(agent.name.clone()));
        }
    }

    let mut tool_names = HashSet::new();
    for tool in &config.tools {
        if !tool_names.insert(tool.name.clone()) {
            return Err(RegistryConfigError::DuplicateToolName(tool.name.clone()));
        }
    }

    for agent in &config.agents {
        for tool_name in &agent.tools {
            if !tool_names.contains(tool_name) {
                return Err(RegistryConfigError::UnknownToolReference {
                    agent: agent.name.clone(),
                    tool: tool_name.clone(),
                });
            }
        }
    }

    let mut workflow_names = HashSet::new();
    for workflow in &config.workflows {
        if !workflow_names.insert(workflow.name.clone()) {
            return Err(RegistryConfigError::DuplicateWorkflowName(workflow.name.clone()));
        }
        if workflow.steps.is_empty() {
            return Err(RegistryConfigError::EmptyWorkflow(workflow.name.clone()));
        }
        let assessment_count = workflow.steps.iter().filter(|s| s.is_assessment).count();
        if workflow.coordination_type == CoordinationType::IterativeRefinement {
            if assessment_count == 0 {
                return Err(RegistryConfigError::MissingAssessmentStep(workflow.name.clone()));
            }
            if assessment_count > 1 {
                return Err(RegistryConfigError::MultipleAssessmentSteps(workflow.name.clone()));
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
struct DiscoveredAgentFile {
    class: String,
    #[serde(default)]
    config: toml::Value,
    #[serde(default)]
    tools: Vec<String>,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Clone, Deserialize)]
struct DiscoveredToolFile {
    class: String,
    #[serde(default)]
    config: toml::Value,
    #[serde(default)]
    description: String,
}

/// Scan `dir` for `<name>_agent.toml` / `<name>_tool.toml` files, the
/// fallback bootstrap step when no combined declarative file is present.
/// Never discovers workflows -- the bootstrap order only names agents and
/// tools as discoverable by filename convention.
pub async fn discover_directory(dir: &Path) -> Result<RegistryConfig, RegistryConfigError> {
    let mut config = RegistryConfig::default();

    let mut read_dir = tokio::fs::read_dir(dir)
        .await
        .map_err(|source| RegistryConfigError::Io {
            path: dir.display().to_string(),
            source,
        })?;

    while let Some(entry) = read_dir.next_entry().await.map_err(|source| RegistryConfigError::Io {
        path: dir.display().to_string(),
        source,
    })? {
        let path = entry.path();
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(ext) = path.extension().and_then(|s| s.to_str()) else {
            continue;
        };
        if ext != "toml" {
            continue;
        }

        if let Some(name) = stem.strip_suffix("_agent") {
            let contents = tokio::fs::read_to_string(&path).await.map_err(|source| {
                RegistryConfigError::Io {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            let discovered: DiscoveredAgentFile = toml::from_str(&contents)?;
            config.agents.push(AgentConfigEntry {
                name: name.to_owned(),
                class: discovered.class,
                config: discovered.config,
                tools: discovered.tools,
                description: discovered.description,
            });
        } else if let Some(name) = stem.strip_suffix("_tool") {
            let contents = tokio::fs::read_to_string(&path).await.map_err(|source| {
                RegistryConfigError::Io {
                    path: path.display().to_string(),
                    source,
                }
            })?;
            let discovered: DiscoveredToolFile = toml::from_str(&contents)?;
            config.tools.push(ToolConfigEntry {
                name: name.to_owned(),
                class: discovered.class,
                config: discovered.config,
                description: discovered.description,
            });
        }
    }

    validate(&config)?;
    Ok(config)
}
