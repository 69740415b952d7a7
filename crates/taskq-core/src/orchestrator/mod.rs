//! Workflow Orchestrator (C5): executes a declarative multi-step workflow
//! for a parent Task, persisting Subtasks and WorkflowState as it goes.
//!
//! Steps and iterations of a single workflow run strictly sequentially
//! under the single worker that holds the parent Task's lease (a workflow
//! task is never split across workers), so the loop below is a plain
//! `for`, not a scheduler fanning work out across a pool of concurrent
//! tasks.

use sqlx::PgPool;
use tracing::{info, instrument};
use uuid::Uuid;

use taskq_db::models::{AuditEventType, Task};
use taskq_db::queries::{subtasks, workflow_state};

use crate::audit;
use crate::error::TaskqError;
use crate::registry::{CoordinationType, Registries, Usage, WorkflowDefinition, WorkflowStep};

/// Run the workflow named by `workflow_name` for `parent_task` to
/// completion (or until it raises, in which case the caller -- the worker
/// -- fails the parent Task).
#[instrument(skip(registries, pool), fields(task_id = %parent_task.id, workflow = workflow_name))]
pub async fn run(
    parent_task: &Task,
    workflow_name: &str,
    registries: &Registries,
    pool: &PgPool,
) -> Result<serde_json::Value, TaskqError> {
    let definition = registries.workflows.get(workflow_name).await?;

    let mut tx = pool.begin().await?;
    workflow_state::insert_workflow_state(
        &mut *tx,
        parent_task.id,
        &definition.name,
        definition.max_iterations,
    )
    .await?;
    audit::insert_audit_entry(
        &mut *tx,
        AuditEventType::WorkflowInitialized,
        parent_task.id,
        parent_task.user_id_hash.clone(),
        parent_task.tenant_id.clone(),
        &serde_json::json!({"workflow": definition.name}),
    )
    .await?;
    tx.commit().await?;

    info!(coordination_type = ?definition.coordination_type, "workflow initialized");

    match definition.coordination_type {
        CoordinationType::IterativeRefinement => {
            run_iterative_refinement(parent_task, &definition, registries, pool).await
        }
        CoordinationType::Sequential => run_sequential(parent_task, &definition, registries, pool).await,
        CoordinationType::ParallelFanout => {
            run_parallel_fanout(parent_task, &definition, registries, pool).await
        }
    }
}

/// Shallow-merge `overlay` onto `base`: keys in `overlay` win. Matches
/// `merge(parent_input, output_of_previous_step)` from the orchestrator
/// pseudocode.
fn merge_json(base: &serde_json::Value, overlay: &serde_json::Value) -> serde_json::Value {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in overlay_map {
                merged.insert(key.clone(), value.clone());
            }
            serde_json::Value::Object(merged)
        }
        _ => overlay.clone(),
    }
}

fn usage_fields(usage: &Option<Usage>) -> (Option<&str>, Option<i64>, Option<i64>, Option<f64>) {
    match usage {
        Some(u) => (Some(u.model.as_str()), Some(u.input_tokens), Some(u.output_tokens), Some(u.cost)),
        None => (None, None, None, None),
    }
}

fn aggregate(step_outputs: &[(String, serde_json::Value)], iterations: i32, approved: bool) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (name, output) in step_outputs {
        map.insert(name.clone(), output.clone());
    }
    map.insert("iterations".to_owned(), serde_json::json!(iterations));
    map.insert("approved".to_owned(), serde_json::json!(approved));
    serde_json::Value::Object(map)
}

/// Run a single step: insert its Subtask, execute the Agent, and record
/// completion/failure atomically with a `subtask_completed` audit entry.
/// On Agent failure the Subtask is marked failed and the error propagates
/// to the caller, which fails the parent Task (subtask failures are not
/// retried within the same orchestrator run).
async fn run_step(
    pool: &PgPool,
    registries: &Registries,
    parent_id: Uuid,
    step: &WorkflowStep,
    iteration: i32,
    input: &serde_json::Value,
    user_id_hash: Option<&str>,
) -> Result<serde_json::Value, TaskqError> {
    let subtask = subtasks::insert_subtask(pool, parent_id, &step.agent_type, &step.name, iteration, input).await?;

    let agent = registries.agents.get(&step.agent_type, &registries.tools).await?;
    match agent.execute(input, user_id_hash).await {
        Ok(result) => {
            let (model, input_tokens, output_tokens, cost) = usage_fields(&result.usage);
            let mut tx = pool.begin().await?;
            subtasks::complete_subtask(&mut *tx, subtask.id, &result.output, model, input_tokens, output_tokens, cost)
                .await?;
            audit::insert_audit_entry(
                &mut *tx,
                AuditEventType::SubtaskCompleted,
                subtask.id,
                None,
                None,
                &serde_json::json!({"step": step.name}),
            )
            .await?;
            tx.commit().await?;
            Ok(result.output)
        }
        Err(e) => {
            subtasks::fail_subtask(pool, subtask.id, &e.to_string()).await?;
            Err(e)
        }
    }
}

async fn run_iterative_refinement(
    parent: &Task,
    definition: &WorkflowDefinition,
    registries: &Registries,
    pool: &PgPool,
) -> Result<serde_json::Value, TaskqError> {
    let mut step_outputs: Vec<(String, serde_json::Value)> = Vec::new();

    for iteration in 1..=definition.max_iterations {
        let mut output_of_previous_step = parent.input.clone();
        step_outputs.clear();

        for step in &definition.steps {
            let merged = merge_json(&parent.input, &output_of_previous_step);
            let output = run_step(
                pool,
                registries,
                parent.id,
                step,
                iteration,
                &merged,
                parent.user_id_hash.as_deref(),
            )
            .await?;

            output_of_previous_step = output.clone();
            step_outputs.push((step.name.clone(), output.clone()));

            if step.is_assessment && output.get("approved").and_then(|v| v.as_bool()).unwrap_or(false) {
                let last_step_index = (definition.steps.len() as i32 - 1).max(0);
                workflow_state::update_step_iteration(pool, parent.id, last_step_index, iteration).await?;
                workflow_state::mark_converged(pool, parent.id).await?;
                let aggregated = aggregate(&step_outputs, iteration, true);
                workflow_state::update_accumulated_output(pool, parent.id, &aggregated).await?;
                return Ok(aggregated);
            }
        }

        workflow_state::update_step_iteration(pool, parent.id, 0, iteration + 1).await?;
    }

    let aggregated = aggregate(&step_outputs, definition.max_iterations, false);
    workflow_state::update_accumulated_output(pool, parent.id, &aggregated).await?;
    Ok(aggregated)
}

/// `sequential`: run every step exactly once, no convergence test,
/// aggregate to the last step's output.
async fn run_sequential(
    parent: &Task,
    definition: &WorkflowDefinition,
    registries: &Registries,
    pool: &PgPool,
) -> Result<serde_json::Value, TaskqError> {
    let mut output_of_previous_step = parent.input.clone();

    for step in &definition.steps {
        let merged = merge_json(&parent.input, &output_of_previous_step);
        output_of_previous_step = run_step(
            pool,
            registries,
            parent.id,
            step,
            1,
            &merged,
            parent.user_id_hash.as_deref(),
        )
        .await?;
    }

    let last_step_index = (definition.steps.len() as i32 - 1).max(0);
    workflow_state::update_step_iteration(pool, parent.id, last_step_index, 1).await?;
    workflow_state::update_accumulated_output(pool, parent.id, &output_of_previous_step).await?;
    Ok(output_of_previous_step)
}

/// `parallel_fanout`: runs every step of the single iteration concurrently
/// via `futures::future::join_all`, still inside this worker's task
/// execution (no cross-worker fan-out). Convergence is "all steps
/// succeeded" -- reaching the aggregation step below means every step's
/// future resolved `Ok`, so marking converged is unconditional there.
async fn run_parallel_fanout(
    parent: &Task,
    definition: &WorkflowDefinition,
    registries: &Registries,
    pool: &PgPool,
) -> Result<serde_json::Value, TaskqError> {
    let input = parent.input.clone();
    let user_id_hash = parent.user_id_hash.clone();

    let step_futures = definition.steps.iter().map(|step| {
        let input = input.clone();
        let user_id_hash = user_id_hash.clone();
        async move {
            run_step(pool, registries, parent.id, step, 1, &input, user_id_hash.as_deref()).await
        }
    });

    let results = futures::future::join_all(step_futures).await;

    let mut step_outputs = Vec::with_capacity(results.len());
    for (step, result) in definition.steps.iter().zip(results) {
        step_outputs.push((step.name.clone(), result?));
    }

    let last_step_index = (definition.steps.len() as i32 - 1).max(0);
    workflow_state::update_step_iteration(pool, parent.id, last_step_index, 1).await?;
    workflow_state::mark_converged(pool, parent.id).await?;
    let aggregated = aggregate(&step_outputs, 1, true);
    workflow_state::update_accumulated_output(pool, parent.id, &aggregated).await?;
    Ok(aggregated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overlays_wins_on_key_conflict() {
        let base = serde_json::json!({"topic": "solar", "depth": 1});
        let overlay = serde_json::json!({"depth": 2});
        let merged = merge_json(&base, &overlay);
        assert_eq!(merged["topic"], serde_json::json!("solar"));
        assert_eq!(merged["depth"], serde_json::json!(2));
    }

    #[test]
    fn aggregate_includes_iterations_and_approved() {
        let outputs = vec![("research".to_owned(), serde_json::json!({"findings": ["a"]}))];
        let aggregated = aggregate(&outputs, 2, true);
        assert_eq!(aggregated["iterations"], serde_json::json!(2));
        assert_eq!(aggregated["approved"], serde_json::json!(true));
        assert_eq!(aggregated["research"], serde_json::json!({"findings": ["a"]}));
    }
}
