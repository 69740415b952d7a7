//! Error taxonomy for the execution substrate: transient infrastructure,
//! lease conflicts, handler failures, registry misses, and validation
//! failures. Library functions return `Result<T, TaskqError>`; call sites at
//! the binary boundary wrap these in `anyhow::Context`.

use thiserror::Error;
use uuid::Uuid;

/// Errors raised by the lease manager, registries, executor, and
/// orchestrator.
#[derive(Debug, Error)]
pub enum TaskqError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),

    #[error("lease on task {task_id} is not owned by {worker_id}")]
    LeaseNotOwned { task_id: Uuid, worker_id: String },

    #[error("agent {0:?} is not registered")]
    AgentNotFound(String),

    #[error("tool {0:?} is not registered")]
    ToolNotFound(String),

    #[error("workflow {0:?} is not registered")]
    WorkflowNotFound(String),

    #[error("tool {tool} failed: {message}")]
    ToolExecutionFailed { tool: String, message: String },

    #[error("agent {agent} failed: {message}")]
    AgentExecutionFailed { agent: String, message: String },

    #[error("task type {0:?} does not match any of the agent:/tool:/workflow: prefixes")]
    MalformedTaskType(String),

    #[error("input failed validation: {0}")]
    ValidationFailed(String),

    #[error("registry config error: {0}")]
    RegistryConfig(#[from] crate::registry::config::RegistryConfigError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// `taskq-db`'s query functions return `anyhow::Result` (context-wrapped
    /// for the binary boundary); this variant lets call sites in this crate
    /// `?` those results directly into `TaskqError` without re-wrapping.
    #[error(transparent)]
    DatabaseContext(#[from] anyhow::Error),
}

impl TaskqError {
    /// The error string persisted onto `Task.error` / `Subtask.error` for
    /// registry-miss failures, matching the fixed vocabulary callers (and
    /// tests) match against.
    pub fn terminal_message(&self) -> String {
        match self {
            Self::AgentNotFound(_) => "agent_not_found".to_owned(),
            Self::ToolNotFound(_) => "tool_not_found".to_owned(),
            Self::WorkflowNotFound(_) => "workflow_not_found".to_owned(),
            other => other.to_string(),
        }
    }
}
