//! Database query functions for the `tasks` table: the durable work queue.
//!
//! `claim_one_ready` is the one operation in this module that is not a
//! simple optimistic-locked `UPDATE`: it must atomically pick *one* pending
//! row out from under any number of concurrently-polling workers. It uses
//! `SELECT ... FOR UPDATE SKIP LOCKED` inside a CTE so that competing
//! claimants skip rows already locked by another transaction rather than
//! blocking on them.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{Task, TaskStatus};

/// Insert a new task row in `pending` status. Returns the inserted task with
/// server-generated defaults (id, created_at, updated_at, try_count=0).
pub async fn insert_task<'e>(
    executor: impl PgExecutor<'e>,
    task_type: &str,
    input: &serde_json::Value,
    user_id_hash: Option<&str>,
    tenant_id: Option<&str>,
    trace_id: Option<&str>,
    max_tries: i32,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks (task_type, input, user_id_hash, tenant_id, trace_id, max_tries) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(task_type)
    .bind(input)
    .bind(user_id_hash)
    .bind(tenant_id)
    .bind(trace_id)
    .bind(max_tries)
    .fetch_one(executor)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by ID.
pub async fn get_task<'e>(executor: impl PgExecutor<'e>, id: Uuid) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(executor)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// List tasks by status, ordered by creation time.
pub async fn list_by_status<'e>(
    executor: impl PgExecutor<'e>,
    status: TaskStatus,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE status = $1 ORDER BY created_at ASC",
    )
    .bind(status)
    .fetch_all(executor)
    .await
    .context("failed to list tasks by status")?;

    Ok(tasks)
}

/// Atomically claim the oldest `pending` task for `worker_id`.
///
/// Locks the chosen row with `FOR UPDATE SKIP LOCKED` so that concurrent
/// claimants skip rows already locked by another in-flight claim rather
/// than blocking on them, then transitions it to `running` and extends the
/// attempt counter. Returns `None` when no task is claimable.
pub async fn claim_one_ready<'e>(
    executor: impl PgExecutor<'e>,
    worker_id: &str,
    lease_duration: chrono::Duration,
) -> Result<Option<Task>> {
    let lease_expires_at = Utc::now() + lease_duration;

    let task = sqlx::query_as::<_, Task>(
        "WITH candidate AS ( \
             SELECT id FROM tasks \
             WHERE status = 'pending' \
             ORDER BY created_at ASC \
             FOR UPDATE SKIP LOCKED \
             LIMIT 1 \
         ) \
         UPDATE tasks \
         SET status = 'running', \
             lease_owner = $1, \
             lease_expires_at = $2, \
             try_count = try_count + 1, \
             updated_at = now() \
         WHERE id = (SELECT id FROM candidate) \
         RETURNING *",
    )
    .bind(worker_id)
    .bind(lease_expires_at)
    .fetch_optional(executor)
    .await
    .context("failed to claim a ready task")?;

    Ok(task)
}

/// Renew the lease on a task this worker still owns.
///
/// Conditional on `lease_owner = worker_id AND status = 'running'`. Returns
/// the number of rows affected (0 means the lease was lost).
pub async fn renew_lease<'e>(
    executor: impl PgExecutor<'e>,
    task_id: Uuid,
    worker_id: &str,
    lease_duration: chrono::Duration,
) -> Result<u64> {
    let lease_expires_at = Utc::now() + lease_duration;

    let result = sqlx::query(
        "UPDATE tasks \
         SET lease_expires_at = $1 \
         WHERE id = $2 AND lease_owner = $3 AND status = 'running'",
    )
    .bind(lease_expires_at)
    .bind(task_id)
    .bind(worker_id)
    .execute(executor)
    .await
    .context("failed to renew lease")?;

    Ok(result.rows_affected())
}

/// Mark a task `done`, conditional on the caller still owning the lease.
///
/// Returns the number of rows affected (0 means the lease was lost and the
/// write is a no-op, per the at-least-once/idempotent-terminal-write
/// contract).
#[allow(clippy::too_many_arguments)]
pub async fn complete_task<'e>(
    executor: impl PgExecutor<'e>,
    task_id: Uuid,
    worker_id: &str,
    output: &serde_json::Value,
    model_used: Option<&str>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    total_cost: Option<f64>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'done', \
             output = $1, \
             model_used = $2, \
             input_tokens = $3, \
             output_tokens = $4, \
             total_cost = $5, \
             lease_owner = NULL, \
             lease_expires_at = NULL, \
             updated_at = now() \
         WHERE id = $6 AND lease_owner = $7 AND status = 'running'",
    )
    .bind(output)
    .bind(model_used)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(total_cost)
    .bind(task_id)
    .bind(worker_id)
    .execute(executor)
    .await
    .context("failed to complete task")?;

    Ok(result.rows_affected())
}

/// Mark a task `error`, conditional on the caller still owning the lease.
///
/// Returns the number of rows affected (0 means the lease was lost).
pub async fn fail_task<'e>(
    executor: impl PgExecutor<'e>,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE tasks \
         SET status = 'error', \
             error = $1, \
             lease_owner = NULL, \
             lease_expires_at = NULL, \
             updated_at = now() \
         WHERE id = $2 AND lease_owner = $3 AND status = 'running'",
    )
    .bind(error)
    .bind(task_id)
    .bind(worker_id)
    .execute(executor)
    .await
    .context("failed to fail task")?;

    Ok(result.rows_affected())
}

/// Count tasks grouped by status, for a fleet-wide summary.
pub async fn count_by_status<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<(TaskStatus, i64)>> {
    let rows: Vec<(TaskStatus, i64)> =
        sqlx::query_as("SELECT status, COUNT(*) FROM tasks GROUP BY status")
            .fetch_all(executor)
            .await
            .context("failed to count tasks by status")?;

    Ok(rows)
}

/// List the most recently created tasks, newest first.
pub async fn list_recent<'e>(executor: impl PgExecutor<'e>, limit: i64) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks ORDER BY created_at DESC LIMIT $1")
        .bind(limit)
        .fetch_all(executor)
        .await
        .context("failed to list recent tasks")?;

    Ok(tasks)
}

/// Reset every task whose lease has expired and whose `try_count` is still
/// below `max_tries` back to `pending`.
///
/// Returns the tasks that were reclaimed.
pub async fn reclaim_expired_to_pending<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'pending', \
             lease_owner = NULL, \
             lease_expires_at = NULL, \
             updated_at = now() \
         WHERE status = 'running' \
           AND lease_expires_at < now() \
           AND try_count < max_tries \
         RETURNING *",
    )
    .fetch_all(executor)
    .await
    .context("failed to reclaim expired leases to pending")?;

    Ok(tasks)
}

/// Terminally fail every task whose lease has expired and whose
/// `try_count` has already exhausted `max_tries`.
///
/// Returns the tasks that were failed.
pub async fn fail_expired_exhausted<'e>(executor: impl PgExecutor<'e>) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "UPDATE tasks \
         SET status = 'error', \
             error = 'lease expired after max_tries', \
             lease_owner = NULL, \
             lease_expires_at = NULL, \
             updated_at = now() \
         WHERE status = 'running' \
           AND lease_expires_at < now() \
           AND try_count >= max_tries \
         RETURNING *",
    )
    .fetch_all(executor)
    .await
    .context("failed to fail exhausted expired leases")?;

    Ok(tasks)
}
