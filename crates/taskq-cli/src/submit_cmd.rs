//! `taskq submit` command: insert a new Task, standing in for the external
//! gateway's write path (which lives outside this repo).

use anyhow::{Context, Result};
use sqlx::PgPool;

use taskq_core::audit;

/// Run the submit command. `input` is a JSON object literal; `user_email`,
/// if given, is hashed before storage (never persisted in plaintext).
pub async fn run_submit(
    pool: &PgPool,
    task_type: &str,
    input: &serde_json::Value,
    user_email: Option<&str>,
    tenant_id: Option<&str>,
    max_tries: i32,
) -> Result<()> {
    let user_id_hash = user_email.map(audit::hash_user_email);
    let trace_id = audit::extract_trace_id(input);

    let task = audit::submit_task(
        pool,
        task_type,
        input,
        user_id_hash.as_deref(),
        tenant_id,
        trace_id.as_deref(),
        max_tries,
    )
    .await
    .context("failed to submit task")?;

    println!("Task submitted: {}", task.id);
    println!("  type: {}", task.r#type);
    println!("  status: {}", task.status);
    if let Some(tenant) = &task.tenant_id {
        println!("  tenant: {tenant}");
    }

    Ok(())
}
