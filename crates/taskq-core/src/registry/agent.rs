//! The Agent capability and its cached, thread-safe registry.
//!
//! A small `#[async_trait]` capability interface plus a
//! `HashMap<String, Box<dyn Agent>>`-backed registry with per-name cached
//! singleton construction: `get` materializes an instance once and reuses
//! it, rather than requiring every Agent to be eagerly constructed at
//! startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};

use crate::error::TaskqError;
use crate::registry::tool::ToolRegistry;

/// Usage accounting returned by an Agent invocation, propagated onto the
/// parent Task (direct agent tasks) or Subtask (workflow steps).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub model: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost: f64,
}

/// The result of `Agent::execute`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub output: serde_json::Value,
    pub usage: Option<Usage>,
}

/// A single capability: given input and a hashed user identity, produce an
/// output document and optional usage accounting. May internally invoke the
/// LLM client and any of its declared Tools.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        input: &serde_json::Value,
        user_id_hash: Option<&str>,
    ) -> Result<AgentOutput, TaskqError>;
}

// Compile-time object-safety assertion.
#[allow(dead_code)]
fn assert_agent_is_object_safe(_: &dyn Agent) {}

/// Factory invoked on cache miss. Receives the entry's free-form config and
/// the already-resolved Tool instances the Agent declared as dependencies.
pub type AgentFactory =
    Arc<dyn Fn(&serde_json::Value, &ToolRegistry) -> Result<Box<dyn Agent>, TaskqError> + Send + Sync>;

struct AgentEntry {
    factory: AgentFactory,
    config: serde_json::Value,
    dependencies: Vec<String>,
    description: String,
}

/// Metadata returned by `AgentRegistry::metadata`.
#[derive(Debug, Clone)]
pub struct AgentMetadata {
    pub config: serde_json::Value,
    pub dependencies: Vec<String>,
    pub description: String,
}

/// Process-local, thread-safe cache of Agent instances keyed by name.
///
/// `get` materializes and caches on first call; `create_fresh` always
/// re-invokes the factory. Both read the entry table under a shared lock;
/// only `register` takes the write lock, matching the "registries are
/// immutable after initialization" discipline -- the lock exists to support
/// the rare explicit `register` call, not steady-state reads.
#[derive(Default)]
pub struct AgentRegistry {
    entries: RwLock<HashMap<String, AgentEntry>>,
    cache: RwLock<HashMap<String, Arc<OnceCell<Arc<dyn Agent>>>>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        factory: AgentFactory,
        config: serde_json::Value,
        dependencies: Vec<String>,
        description: impl Into<String>,
    ) {
        let name = name.into();
        self.entries.write().await.insert(
            name,
            AgentEntry {
                factory,
                config,
                dependencies,
                description: description.into(),
            },
        );
    }

    pub async fn has(&self, name: &str) -> bool {
        self.entries.read().await.contains_key(name)
    }

    pub async fn list_all(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn metadata(&self, name: &str) -> Option<AgentMetadata> {
        self.entries.read().await.get(name).map(|e| AgentMetadata {
            config: e.config.clone(),
            dependencies: e.dependencies.clone(),
            description: e.description.clone(),
        })
    }

    /// Return the cached instance, constructing it on first call.
    pub async fn get(
        &self,
        name: &str,
        tools: &ToolRegistry,
    ) -> Result<Arc<dyn Agent>, TaskqError> {
        let slot = {
            let mut cache = self.cache.write().await;
            cache
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        slot.get_or_try_init(|| async {
            let instance = self.construct(name, tools).await?;
            Ok::<Arc<dyn Agent>, TaskqError>(Arc::from(instance))
        })
        .await
        .map(Arc::clone)
    }

    /// Construct a fresh instance, bypassing and not populating the cache.
    pub async fn create_fresh(
        &self,
        name: &str,
        tools: &ToolRegistry,
    ) -> Result<Box<dyn Agent>, TaskqError> {
        self.construct(name, tools).await
    }

    async fn construct(
        &self,
        name: &str,
        tools: &ToolRegistry,
    ) -> Result<Box<dyn Agent>, TaskqError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| TaskqError::AgentNotFound(name.to_owned()))?;
        (entry.factory)(&entry.config, tools)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoAgent;

    #[async_trait]
    impl Agent for EchoAgent {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(
            &self,
            input: &serde_json::Value,
            _user_id_hash: Option<&str>,
        ) -> Result<AgentOutput, TaskqError> {
            Ok(AgentOutput {
                output: input.clone(),
                usage: None,
            })
        }
    }

    fn echo_factory() -> AgentFactory {
        Arc::new(|_config, _tools| Ok(Box::new(EchoAgent) as Box<dyn Agent>))
    }

    #[tokio::test]
    async fn get_caches_the_same_instance() {
        let registry = AgentRegistry::new();
        let tools = ToolRegistry::new();
        registry
            .register("echo", echo_factory(), serde_json::json!({}), vec![], "echoes input")
            .await;

        let first = registry.get("echo", &tools).await.expect("first get");
        let second = registry.get("echo", &tools).await.expect("second get");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn create_fresh_bypasses_cache() {
        let registry = AgentRegistry::new();
        let tools = ToolRegistry::new();
        registry
            .register("echo", echo_factory(), serde_json::json!({}), vec![], "echoes input")
            .await;

        let cached = registry.get("echo", &tools).await.expect("get");
        let fresh = registry.create_fresh("echo", &tools).await.expect("fresh");
        assert!(!Arc::ptr_eq(&cached, &Arc::from(fresh)));
    }

    #[tokio::test]
    async fn get_unknown_name_is_not_found() {
        let registry = AgentRegistry::new();
        let tools = ToolRegistry::new();
        let result = registry.get("nope", &tools).await;
        assert!(matches!(result, Err(TaskqError::AgentNotFound(_))));
    }
}
