//! `taskq status` command: show task status and its audit trail.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use taskq_core::audit;
use taskq_db::models::TaskStatus;
use taskq_db::queries::{subtasks, tasks};

/// Run the status command.
///
/// When `task_id_str` is `Some`, shows detailed status for that task (and,
/// for a workflow task, its subtasks). When `None`, lists recent tasks with
/// a fleet-wide status summary.
pub async fn run_status(pool: &PgPool, task_id_str: Option<&str>) -> Result<()> {
    match task_id_str {
        Some(id_str) => run_task_status(pool, id_str).await,
        None => run_fleet_status(pool).await,
    }
}

async fn run_task_status(pool: &PgPool, task_id_str: &str) -> Result<()> {
    let task_id = Uuid::parse_str(task_id_str).with_context(|| format!("invalid task ID: {task_id_str}"))?;

    let task = tasks::get_task(pool, task_id)
        .await?
        .with_context(|| format!("task {task_id} not found"))?;

    println!("Task: {} ({})", task.r#type, task.id);
    println!("Status: {}", task.status);
    println!("Tries: {}/{}", task.try_count, task.max_tries);
    if let Some(owner) = &task.lease_owner {
        println!("Lease owner: {owner}");
    }
    if let Some(model) = &task.model_used {
        println!("Model: {model}");
    }
    if let Some(cost) = task.total_cost {
        println!(
            "Usage: {} input / {} output tokens, ${:.4}",
            task.input_tokens.unwrap_or(0),
            task.output_tokens.unwrap_or(0),
            cost
        );
    }
    if let Some(error) = &task.error {
        println!("Error: {error}");
    }
    println!();

    if task.r#type.starts_with("workflow:") {
        let subtasks = subtasks::list_for_parent(pool, task_id).await?;
        println!("Subtasks:");
        for subtask in &subtasks {
            println!(
                "  [{}] {} (iteration {}, {})",
                status_icon(subtask.status.to_string().as_str()),
                subtask.step_name,
                subtask.iteration,
                subtask.status
            );
        }
        println!();
    }

    let entries = audit::list_for_resource(pool, task_id).await?;
    println!("Audit trail:");
    for entry in &entries {
        println!(
            "  {} {} {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            entry.event_type,
            entry.metadata
        );
    }

    Ok(())
}

async fn run_fleet_status(pool: &PgPool) -> Result<()> {
    let counts = tasks::count_by_status(pool).await?;
    println!("Queue summary:");
    for status in [TaskStatus::Pending, TaskStatus::Running, TaskStatus::Done, TaskStatus::Error] {
        let count = counts.iter().find(|(s, _)| *s == status).map(|(_, n)| *n).unwrap_or(0);
        println!("  {status}: {count}");
    }
    println!();

    let recent = tasks::list_recent(pool, 20).await?;
    if recent.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!("{:<38} {:<30} {:<10} {:>8}", "ID", "TYPE", "STATUS", "TRIES");
    println!("{}", "-".repeat(90));
    for task in &recent {
        println!(
            "{:<38} {:<30} {:<10} {:>5}/{}",
            task.id, task.r#type, task.status, task.try_count, task.max_tries
        );
    }

    Ok(())
}

fn status_icon(status: &str) -> &'static str {
    match status {
        "running" => "*",
        "done" => "+",
        "error" => "!",
        _ => " ",
    }
}
