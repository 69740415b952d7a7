//! Database query functions for the `audit_log` table: an append-only
//! record of task/subtask/workflow state transitions.
//!
//! Every insert here accepts a generic [`PgExecutor`], not a concrete
//! `&PgPool`, so callers can pass a `&mut Transaction` and have the audit
//! row commit or roll back atomically with the state change it describes.

use anyhow::{Context, Result};
use sqlx::PgExecutor;
use uuid::Uuid;

use crate::models::{AuditEntry, AuditEventType};

/// Append one audit entry.
///
/// Callers performing a state transition should insert the corresponding
/// audit entry through the same `&mut Transaction` used for that
/// transition, never through the pool directly, so the two writes commit
/// or roll back together.
pub async fn insert_audit_entry<'e>(
    executor: impl PgExecutor<'e>,
    event_type: AuditEventType,
    resource_id: Uuid,
    user_id_hash: Option<&str>,
    tenant_id: Option<&str>,
    metadata: &serde_json::Value,
) -> Result<AuditEntry> {
    let entry = sqlx::query_as::<_, AuditEntry>(
        "INSERT INTO audit_log (event_type, resource_id, user_id_hash, tenant_id, metadata) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING *",
    )
    .bind(event_type)
    .bind(resource_id)
    .bind(user_id_hash)
    .bind(tenant_id)
    .bind(metadata)
    .fetch_one(executor)
    .await
    .context("failed to insert audit entry")?;

    Ok(entry)
}

/// List every audit entry for a resource, oldest first.
pub async fn list_for_resource<'e>(
    executor: impl PgExecutor<'e>,
    resource_id: Uuid,
) -> Result<Vec<AuditEntry>> {
    let entries = sqlx::query_as::<_, AuditEntry>(
        "SELECT * FROM audit_log WHERE resource_id = $1 ORDER BY timestamp ASC",
    )
    .bind(resource_id)
    .fetch_all(executor)
    .await
    .context("failed to list audit entries for resource")?;

    Ok(entries)
}
