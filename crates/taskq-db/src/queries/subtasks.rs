//! Database query functions for the `subtasks` table: one row per step
//! execution within one iteration of a workflow run.

use anyhow::{Context, Result};
use chrono::Utc;
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::Subtask;

/// Insert a subtask row in `running` status.
///
/// Subtasks are created immediately before the orchestrator invokes the
/// underlying agent, so there is no `pending` state for a subtask: it is
/// born already in flight.
#[allow(clippy::too_many_arguments)]
pub async fn insert_subtask<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
    agent_type: &str,
    step_name: &str,
    iteration: i32,
    input: &serde_json::Value,
) -> Result<Subtask> {
    let subtask = sqlx::query_as::<_, Subtask>(
        "INSERT INTO subtasks (parent_task_id, agent_type, step_name, iteration, input) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(parent_task_id)
    .bind(agent_type)
    .bind(step_name)
    .bind(iteration)
    .bind(input)
    .fetch_one(executor)
    .await
    .context("failed to insert subtask")?;

    Ok(subtask)
}

/// Mark a subtask `done` with its output and usage accounting.
pub async fn complete_subtask<'e>(
    executor: impl PgExecutor<'e>,
    subtask_id: Uuid,
    output: &serde_json::Value,
    model_used: Option<&str>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    total_cost: Option<f64>,
) -> Result<Subtask> {
    let subtask = sqlx::query_as::<_, Subtask>(
        "UPDATE subtasks \
         SET status = 'done', \
             output = $1, \
             model_used = $2, \
             input_tokens = $3, \
             output_tokens = $4, \
             total_cost = $5, \
             completed_at = $6 \
         WHERE id = $7 \
         RETURNING *",
    )
    .bind(output)
    .bind(model_used)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(total_cost)
    .bind(Utc::now())
    .bind(subtask_id)
    .fetch_one(executor)
    .await
    .context("failed to complete subtask")?;

    Ok(subtask)
}

/// Mark a subtask `error` with the failure message.
pub async fn fail_subtask<'e>(
    executor: impl PgExecutor<'e>,
    subtask_id: Uuid,
    error: &str,
) -> Result<Subtask> {
    let subtask = sqlx::query_as::<_, Subtask>(
        "UPDATE subtasks \
         SET status = 'error', \
             error = $1, \
             completed_at = $2 \
         WHERE id = $3 \
         RETURNING *",
    )
    .bind(error)
    .bind(Utc::now())
    .bind(subtask_id)
    .fetch_one(executor)
    .await
    .context("failed to fail subtask")?;

    Ok(subtask)
}

/// List every subtask of a parent task, ordered by creation time.
pub async fn list_for_parent<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
) -> Result<Vec<Subtask>> {
    let subtasks = sqlx::query_as::<_, Subtask>(
        "SELECT * FROM subtasks WHERE parent_task_id = $1 ORDER BY created_at ASC",
    )
    .bind(parent_task_id)
    .fetch_all(executor)
    .await
    .context("failed to list subtasks for parent")?;

    Ok(subtasks)
}

/// Sum of usage accounting across every subtask of a parent task.
///
/// Used to roll a workflow Task's terminal `total_cost` and token counts up
/// from its Subtasks when the workflow completes.
pub struct SubtaskUsageTotals {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_cost: f64,
}

pub async fn sum_usage_for_parent<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
) -> Result<SubtaskUsageTotals> {
    let row: (i64, i64, f64) = sqlx::query_as(
        "SELECT \
             COALESCE(SUM(input_tokens), 0), \
             COALESCE(SUM(output_tokens), 0), \
             COALESCE(SUM(total_cost), 0.0) \
         FROM subtasks \
         WHERE parent_task_id = $1",
    )
    .bind(parent_task_id)
    .fetch_one(executor)
    .await
    .context("failed to sum subtask usage for parent")?;

    Ok(SubtaskUsageTotals {
        input_tokens: row.0,
        output_tokens: row.1,
        total_cost: row.2,
    })
}
