//! Audit & Usage Recorder (C7): the append-only sink and the usage rollup
//! it feeds.
//!
//! A free function inserts one row and returns it, same shape as a simple
//! insert-and-record helper. Every transition that writes an audit entry
//! must commit it atomically with the state change it describes, so every
//! caller here threads the same `&mut Transaction` (or, for
//! [`submit_task`], opens and commits one of its own) through both writes.

use sha2::{Digest, Sha256};
use sqlx::PgPool;
use uuid::Uuid;

use taskq_db::models::{AuditEntry, AuditEventType, Task};
use taskq_db::queries::{audit as audit_db, subtasks, tasks};

use crate::error::TaskqError;

/// Hash an end-user email to a fixed-width hex digest before storage; the
/// plaintext is never persisted.
pub fn hash_user_email(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(email.as_bytes());
    hex::encode(hasher.finalize())
}

/// Extract `input._trace_context.trace_id`, if present, for seeding the
/// task's execution span with the caller's trace context.
pub fn extract_trace_id(input: &serde_json::Value) -> Option<String> {
    input
        .get("_trace_context")
        .and_then(|ctx| ctx.get("trace_id"))
        .and_then(|v| v.as_str())
        .map(str::to_owned)
}

/// Append one audit entry. `user_id_hash`/`tenant_id` are taken by value
/// (rather than `taskq_db`'s `Option<&str>`) so call sites that already
/// hold an owned `Task`/`Subtask` field can pass it straight through
/// without an intermediate borrow.
pub async fn insert_audit_entry(
    executor: impl sqlx::PgExecutor<'_>,
    event_type: AuditEventType,
    resource_id: Uuid,
    user_id_hash: Option<String>,
    tenant_id: Option<String>,
    metadata: &serde_json::Value,
) -> Result<AuditEntry, TaskqError> {
    let entry = audit_db::insert_audit_entry(
        executor,
        event_type,
        resource_id,
        user_id_hash.as_deref(),
        tenant_id.as_deref(),
        metadata,
    )
    .await?;
    Ok(entry)
}

/// List every audit entry for a resource, oldest first.
pub async fn list_for_resource(pool: &PgPool, resource_id: Uuid) -> Result<Vec<AuditEntry>, TaskqError> {
    Ok(audit_db::list_for_resource(pool, resource_id).await?)
}

/// Insert a new Task in `pending` status and its `task_created` audit entry
/// atomically. Stands in for an external gateway's write path: creation and
/// its audit entry must commit together, so that write belongs here rather
/// than split across two separate calls.
pub async fn submit_task(
    pool: &PgPool,
    task_type: &str,
    input: &serde_json::Value,
    user_id_hash: Option<&str>,
    tenant_id: Option<&str>,
    trace_id: Option<&str>,
    max_tries: i32,
) -> Result<Task, TaskqError> {
    let mut tx = pool.begin().await?;
    let task = tasks::insert_task(
        &mut *tx,
        task_type,
        input,
        user_id_hash,
        tenant_id,
        trace_id,
        max_tries,
    )
    .await?;

    audit_db::insert_audit_entry(
        &mut *tx,
        AuditEventType::TaskCreated,
        task.id,
        task.user_id_hash.as_deref(),
        task.tenant_id.as_deref(),
        &serde_json::json!({"type": task_type}),
    )
    .await?;

    tx.commit().await?;
    Ok(task)
}

/// Roll a workflow Task's terminal usage up from the sum of its Subtasks:
/// `total_cost(task) = Σ total_cost(subtask)`, same for token counts.
pub async fn aggregate_workflow_usage(
    pool: &PgPool,
    parent_task_id: Uuid,
) -> Result<subtasks::SubtaskUsageTotals, TaskqError> {
    Ok(subtasks::sum_usage_for_parent(pool, parent_task_id).await?)
}
