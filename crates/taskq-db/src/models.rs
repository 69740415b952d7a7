use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Status of a [`Task`].
///
/// Legal transitions: `pending -> running -> {done, error}`, plus
/// `running -> pending` via lease reclaim with `try_count < max_tries`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
    Error,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskStatus {
    type Err = TaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(TaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`TaskStatus`] string.
#[derive(Debug, Clone)]
pub struct TaskStatusParseError(pub String);

impl fmt::Display for TaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task status: {:?}", self.0)
    }
}

impl std::error::Error for TaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Status of a [`Subtask`] within a workflow iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    Running,
    Done,
    Error,
}

impl fmt::Display for SubtaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

impl FromStr for SubtaskStatus {
    type Err = SubtaskStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(SubtaskStatusParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`SubtaskStatus`] string.
#[derive(Debug, Clone)]
pub struct SubtaskStatusParseError(pub String);

impl fmt::Display for SubtaskStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid subtask status: {:?}", self.0)
    }
}

impl std::error::Error for SubtaskStatusParseError {}

// ---------------------------------------------------------------------------

/// Kind of event recorded in the append-only audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    TaskCreated,
    TaskClaimed,
    TaskCompleted,
    TaskFailed,
    LeaseRecovered,
    SubtaskCompleted,
    WorkflowInitialized,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::TaskCreated => "task_created",
            Self::TaskClaimed => "task_claimed",
            Self::TaskCompleted => "task_completed",
            Self::TaskFailed => "task_failed",
            Self::LeaseRecovered => "lease_recovered",
            Self::SubtaskCompleted => "subtask_completed",
            Self::WorkflowInitialized => "workflow_initialized",
        };
        f.write_str(s)
    }
}

impl FromStr for AuditEventType {
    type Err = AuditEventTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "task_created" => Ok(Self::TaskCreated),
            "task_claimed" => Ok(Self::TaskClaimed),
            "task_completed" => Ok(Self::TaskCompleted),
            "task_failed" => Ok(Self::TaskFailed),
            "lease_recovered" => Ok(Self::LeaseRecovered),
            "subtask_completed" => Ok(Self::SubtaskCompleted),
            "workflow_initialized" => Ok(Self::WorkflowInitialized),
            other => Err(AuditEventTypeParseError(other.to_owned())),
        }
    }
}

/// Error returned when parsing an invalid [`AuditEventType`] string.
#[derive(Debug, Clone)]
pub struct AuditEventTypeParseError(pub String);

impl fmt::Display for AuditEventTypeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid audit event type: {:?}", self.0)
    }
}

impl std::error::Error for AuditEventTypeParseError {}

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A unit of work: a single agent invocation, tool call, or workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: Uuid,
    #[sqlx(rename = "task_type")]
    pub r#type: String,
    pub status: TaskStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub user_id_hash: Option<String>,
    pub tenant_id: Option<String>,
    pub model_used: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub trace_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub try_count: i32,
    pub max_tries: i32,
}

/// A single step of a workflow execution, scoped to one iteration.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subtask {
    pub id: Uuid,
    pub parent_task_id: Uuid,
    pub agent_type: String,
    pub step_name: String,
    pub iteration: i32,
    pub status: SubtaskStatus,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
    pub model_used: Option<String>,
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
    pub total_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Per-parent-task progress through a declarative workflow.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowState {
    pub id: Uuid,
    pub parent_task_id: Uuid,
    pub workflow_name: String,
    pub current_step: i32,
    pub current_iteration: i32,
    pub max_iterations: i32,
    pub converged: bool,
    pub accumulated_output: serde_json::Value,
}

/// An append-only record of a task/subtask/workflow state transition.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AuditEntry {
    pub id: Uuid,
    pub event_type: AuditEventType,
    pub resource_id: Uuid,
    pub user_id_hash: Option<String>,
    pub tenant_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
