//! Workflow definitions are static data rather than a trait object --
//! "a Workflow definition is static data: `{name, description,
//! coordination_type, max_iterations, steps}`" -- so this registry caches
//! plain values instead of `Box<dyn Trait>` instances. The `Get`/
//! `CreateFresh`/`Register` surface still matches the Agent/Tool registries
//! for consistency.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{OnceCell, RwLock};

use crate::error::TaskqError;

/// Coordination strategy for a multi-step workflow. See
/// `orchestrator::run` for the per-variant loop structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordinationType {
    Sequential,
    IterativeRefinement,
    ParallelFanout,
}

/// A single step of a workflow, naming the Agent that executes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub agent_type: String,
    pub name: String,
    /// Marks the step whose `output.approved` drives convergence under
    /// `iterative_refinement`. At most one step per workflow should be
    /// marked.
    #[serde(default)]
    pub is_assessment: bool,
}

/// Static definition of a declarative workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: String,
    pub coordination_type: CoordinationType,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: i32,
    pub steps: Vec<WorkflowStep>,
}

fn default_max_iterations() -> i32 {
    3
}

pub type WorkflowFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<WorkflowDefinition, TaskqError> + Send + Sync>;

struct WorkflowEntry {
    factory: WorkflowFactory,
    config: serde_json::Value,
    description: String,
}

#[derive(Debug, Clone)]
pub struct WorkflowMetadata {
    pub config: serde_json::Value,
    pub description: String,
}

#[derive(Default)]
pub struct WorkflowRegistry {
    entries: RwLock<HashMap<String, WorkflowEntry>>,
    cache: RwLock<HashMap<String, Arc<OnceCell<Arc<WorkflowDefinition>>>>>,
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(
        &self,
        name: impl Into<String>,
        factory: WorkflowFactory,
        config: serde_json::Value,
        description: impl Into<String>,
    ) {
        let name = name.into();
        self.entries.write().await.insert(
            name,
            WorkflowEntry {
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

    pub async fn metadata(&self, name: &str) -> Option<WorkflowMetadata> {
        self.entries.read().await.get(name).map(|e| WorkflowMetadata {
            config: e.config.clone(),
            description: e.description.clone(),
        })
    }

    pub async fn get(&self, name: &str) -> Result<Arc<WorkflowDefinition>, TaskqError> {
        let slot = {
            let mut cache = self.cache.write().await;
            cache
                .entry(name.to_owned())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        slot.get_or_try_init(|| async {
            let definition = self.construct(name).await?;
            Ok::<Arc<WorkflowDefinition>, TaskqError>(Arc::new(definition))
        })
        .await
        .map(Arc::clone)
    }

    pub async fn create_fresh(&self, name: &str) -> Result<WorkflowDefinition, TaskqError> {
        self.construct(name).await
    }

    async fn construct(&self, name: &str) -> Result<WorkflowDefinition, TaskqError> {
        let entries = self.entries.read().await;
        let entry = entries
            .get(name)
            .ok_or_else(|| TaskqError::WorkflowNotFound(name.to_owned()))?;
        (entry.factory)(&entry.config)
    }
}
