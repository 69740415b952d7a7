//! Database query functions for the `workflow_state` table: per-parent-task
//! progress through a declarative workflow (current step, current
//! iteration, convergence, accumulated output).

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::WorkflowState;

/// Insert the initial workflow state row for a newly-claimed workflow Task.
pub async fn insert_workflow_state<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
    workflow_name: &str,
    max_iterations: i32,
) -> Result<WorkflowState> {
    let state = sqlx::query_as::<_, WorkflowState>(
        "INSERT INTO workflow_state (parent_task_id, workflow_name, max_iterations) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(parent_task_id)
    .bind(workflow_name)
    .bind(max_iterations)
    .fetch_one(executor)
    .await
    .context("failed to insert workflow state")?;

    Ok(state)
}

/// Fetch the workflow state for a parent task, if one exists.
pub async fn get_by_parent<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
) -> Result<Option<WorkflowState>> {
    let state = sqlx::query_as::<_, WorkflowState>(
        "SELECT * FROM workflow_state WHERE parent_task_id = $1",
    )
    .bind(parent_task_id)
    .fetch_optional(executor)
    .await
    .context("failed to fetch workflow state")?;

    Ok(state)
}

/// Advance the current step and iteration counters.
pub async fn update_step_iteration<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
    current_step: i32,
    current_iteration: i32,
) -> Result<WorkflowState> {
    let state = sqlx::query_as::<_, WorkflowState>(
        "UPDATE workflow_state \
         SET current_step = $1, current_iteration = $2 \
         WHERE parent_task_id = $3 \
         RETURNING *",
    )
    .bind(current_step)
    .bind(current_iteration)
    .bind(parent_task_id)
    .fetch_one(executor)
    .await
    .context("failed to update workflow step/iteration")?;

    Ok(state)
}

/// Mark a workflow as converged (its assessment step approved the result).
pub async fn mark_converged<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
) -> Result<WorkflowState> {
    let state = sqlx::query_as::<_, WorkflowState>(
        "UPDATE workflow_state SET converged = true WHERE parent_task_id = $1 RETURNING *",
    )
    .bind(parent_task_id)
    .fetch_one(executor)
    .await
    .context("failed to mark workflow converged")?;

    Ok(state)
}

/// Overwrite the accumulated output carried between iterations.
pub async fn update_accumulated_output<'e>(
    executor: impl PgExecutor<'e>,
    parent_task_id: Uuid,
    accumulated_output: &serde_json::Value,
) -> Result<WorkflowState> {
    let state = sqlx::query_as::<_, WorkflowState>(
        "UPDATE workflow_state SET accumulated_output = $1 WHERE parent_task_id = $2 RETURNING *",
    )
    .bind(accumulated_output)
    .bind(parent_task_id)
    .fetch_one(executor)
    .await
    .context("failed to update workflow accumulated output")?;

    Ok(state)
}
