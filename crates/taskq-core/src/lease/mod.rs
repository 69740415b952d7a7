//! Lease Manager (C2): the concurrency protocol over the Task Store.
//!
//! Every write here that moves a Task into `running`, `done`, or `error`
//! also appends the matching AuditEntry in the same transaction --
//! `claim_one` -> `task_claimed`, `complete`/`fail` -> `task_completed`/
//! `task_failed`, `reclaim_expired`'s two branches -> `lease_recovered` /
//! `task_failed`. This is the one place outside the orchestrator that
//! needs the `pool.begin()` + `&mut *tx` idiom, since the lease protocol's
//! own writes are the other half of the audit coverage a Task's lifecycle
//! requires (the orchestrator only covers workflow-internal transitions).

use chrono::Duration;
use sqlx::PgPool;
use uuid::Uuid;

use taskq_db::models::AuditEventType;
use taskq_db::models::Task;
use taskq_db::queries::{audit, tasks};

use crate::error::TaskqError;

/// Atomically claim the oldest `pending` task, transitioning it to
/// `running` under `worker_id`. Returns `None` when no task is claimable.
pub async fn claim_one(
    pool: &PgPool,
    worker_id: &str,
    lease_duration: Duration,
) -> Result<Option<Task>, TaskqError> {
    let mut tx = pool.begin().await?;
    let claimed = tasks::claim_one_ready(&mut *tx, worker_id, lease_duration).await?;

    if let Some(task) = &claimed {
        audit::insert_audit_entry(
            &mut *tx,
            AuditEventType::TaskClaimed,
            task.id,
            task.user_id_hash.as_deref(),
            task.tenant_id.as_deref(),
            &serde_json::json!({"worker_id": worker_id, "try_count": task.try_count}),
        )
        .await?;
    }

    tx.commit().await?;
    Ok(claimed)
}

/// Extend the lease on a task this worker still owns.
///
/// Returns `Err(TaskqError::LeaseNotOwned)` if the row was not updated,
/// meaning either the task no longer exists or another worker now owns it --
/// in the latter case the caller MUST abandon the task rather than write a
/// terminal result. Renewal is not itself a tracked state transition, so it
/// is not audited.
pub async fn renew(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    lease_duration: Duration,
) -> Result<(), TaskqError> {
    let affected = tasks::renew_lease(pool, task_id, worker_id, lease_duration).await?;
    if affected == 0 {
        return Err(TaskqError::LeaseNotOwned {
            task_id,
            worker_id: worker_id.to_owned(),
        });
    }
    Ok(())
}

/// Complete a task this worker still owns. A no-op (not an error) when the
/// lease has already moved to another worker -- the idempotent-terminal-
/// write requirement means a stale completion is silently dropped, not
/// surfaced as a failure to the caller's caller.
#[allow(clippy::too_many_arguments)]
pub async fn complete(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    output: &serde_json::Value,
    model_used: Option<&str>,
    input_tokens: Option<i64>,
    output_tokens: Option<i64>,
    total_cost: Option<f64>,
) -> Result<bool, TaskqError> {
    let mut tx = pool.begin().await?;
    let affected = tasks::complete_task(
        &mut *tx,
        task_id,
        worker_id,
        output,
        model_used,
        input_tokens,
        output_tokens,
        total_cost,
    )
    .await?;

    if affected > 0 {
        let task = tasks::get_task(&mut *tx, task_id)
            .await?
            .ok_or(TaskqError::TaskNotFound(task_id))?;
        audit::insert_audit_entry(
            &mut *tx,
            AuditEventType::TaskCompleted,
            task_id,
            task.user_id_hash.as_deref(),
            task.tenant_id.as_deref(),
            &serde_json::json!({"worker_id": worker_id}),
        )
        .await?;
    }

    tx.commit().await?;
    Ok(affected > 0)
}

/// Fail a task this worker still owns. Same idempotency contract as
/// [`complete`].
pub async fn fail(
    pool: &PgPool,
    task_id: Uuid,
    worker_id: &str,
    error: &str,
) -> Result<bool, TaskqError> {
    let mut tx = pool.begin().await?;
    let affected = tasks::fail_task(&mut *tx, task_id, worker_id, error).await?;

    if affected > 0 {
        let task = tasks::get_task(&mut *tx, task_id)
            .await?
            .ok_or(TaskqError::TaskNotFound(task_id))?;
        audit::insert_audit_entry(
            &mut *tx,
            AuditEventType::TaskFailed,
            task_id,
            task.user_id_hash.as_deref(),
            task.tenant_id.as_deref(),
            &serde_json::json!({"worker_id": worker_id, "error": error}),
        )
        .await?;
    }

    tx.commit().await?;
    Ok(affected > 0)
}

/// Run one recovery pass: reclaim leases that expired with retries
/// remaining, and terminally fail leases that expired with none left.
/// Returns `(reclaimed_count, exhausted_count)`.
pub async fn reclaim_expired(pool: &PgPool) -> Result<(usize, usize), TaskqError> {
    let mut tx = pool.begin().await?;

    let reclaimed = tasks::reclaim_expired_to_pending(&mut *tx).await?;
    for task in &reclaimed {
        audit::insert_audit_entry(
            &mut *tx,
            AuditEventType::LeaseRecovered,
            task.id,
            task.user_id_hash.as_deref(),
            task.tenant_id.as_deref(),
            &serde_json::json!({"try_count": task.try_count}),
        )
        .await?;
    }

    let exhausted = tasks::fail_expired_exhausted(&mut *tx).await?;
    for task in &exhausted {
        audit::insert_audit_entry(
            &mut *tx,
            AuditEventType::TaskFailed,
            task.id,
            task.user_id_hash.as_deref(),
            task.tenant_id.as_deref(),
            &serde_json::json!({"error": "lease expired after max_tries"}),
        )
        .await?;
    }

    let counts = (reclaimed.len(), exhausted.len());
    tx.commit().await?;
    Ok(counts)
}
