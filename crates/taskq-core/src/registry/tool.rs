//! The Tool capability and its cached registry.
//!
//! Same shape as [`crate::registry::agent::AgentRegistry`], minus the
//! tool-resolution step Agents need -- Tools have no declared dependencies
//! of their own.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};

use crate::error::TaskqError;

/// The result of `Tool::execute`. Tools never raise for expected failures;
/// an unsuccessful call is `success=false` with `error` populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub success: bool,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub metadata: serde_json::Value,
}

impl ToolOutput {
    pub fn ok(result: serde_json::Value) -> Self {
        Self {
            success: true,
            result: Some(result),
            error: None,
            metadata: serde_json::json!({}),
        }
    }

    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            metadata: serde_json::json!({}),
        }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(&self, params: &serde_json::Value) -> ToolOutput;

    /// JSON-schema-shaped document describing the expected `params` shape.
    fn schema(&self) -> serde_json::Value;
}

#[allow(dead_code)]
fn assert_tool_is_object_safe(_: &dyn Tool) {}

pub type ToolFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Box<dyn Tool>, TaskqError> + Send + Sync>;

struct ToolEntry {
    factory: ToolFactory,
    config: serde_json::Value,
    description: String,
}

#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub config: serde_json::Value,
    pub description: String,
}

#[derive(Default)]
pub struct ToolRegistry {
    entries: RwLock<HashMap<String, ToolEntry>>,
    cache: RwLock<HashMap<String, Arc<OnceCell<Arc<dyn Tool>>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        factory: ToolFactory,
        config: serde_json::Value,
        description: impl Into<String>,
    ) {
        let name = name.into();
        self.entries.write().await.insert(
            name,
            ToolEntry {
                factory,
                config,
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

    pub async fn metadata(&self, name: &str) -> Option<ToolMetadata> {
        self.entries.read().await.get(name).map(|e| ToolMetadata {
            config: e.config.clone(),
            description: e.description.clone(),
        })
    }

    pub async fn get(&self, name: &str) -> Result<Arc<dyn Tool>, TaskqError> {
        let slot = {
            let mut cache = self.cache.write().await;
            cache
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        slot.get_or_try_init(|| async {
            let instance = self.construct(name).await?;
            Ok::<Arc<dyn Tool>, TaskqError>(Arc::from(instance))
        })
        .await
        .map(Arc::clone)
    }

    pub async fn create_fresh(&self, name: &str) -> Result<Box<dyn Tool>, TaskqError> {
        self.construct(name).await
    }

    async fn construct(&self, name: &str) -> Result<Box<dyn Tool>, TaskqError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| TaskqError::ToolNotFound(name.to_owned()))?;
        (entry.factory)(&entry.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UppercaseTool;

    #[async_trait]
    impl Tool for UppercaseTool {
        fn name(&self) -> &str {
            "uppercase"
        }

        async fn execute(&self, params: &serde_json::Value) -> ToolOutput {
            match params.get("text").and_then(|v| v.as_str()) {
                Some(text) => ToolOutput::ok(serde_json::json!({"text": text.to_uppercase()})),
                None => ToolOutput::err("missing 'text' param"),
            }
        }

        fn schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
    }

    fn uppercase_factory() -> ToolFactory {
        Arc::new(|_config| Ok(Box::new(UppercaseTool) as Box<dyn Tool>))
    }

    #[tokio::test]
    async fn execute_returns_success_false_instead_of_raising() {
        let registry = ToolRegistry::new();
        registry
            .register("uppercase", uppercase_factory(), serde_json::json!({}), "uppercases text")
            .await;

        let tool = registry.get("uppercase").await.expect("get");
        let result = tool.execute(&serde_json::json!({})).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn get_caches_the_same_instance() {
        let registry = ToolRegistry::new();
        registry
            .register("uppercase", uppercase_factory(), serde_json::json!({}), "uppercases text")
            .await;

        let first = registry.get("uppercase").await.expect("first");
        let second = registry.get("uppercase").await.expect("second");
        assert!(Arc::ptr_eq(&first, &second));
    }
}
