//! Integration tests for the workflow behind `taskq submit`/`taskq status`.
//!
//! These exercise the same library calls the commands wrap, against a real
//! PostgreSQL instance. Each test creates an isolated temporary database and
//! drops it on completion.

use taskq_core::audit;
use taskq_db::models::TaskStatus;
use taskq_db::queries::tasks;
use taskq_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn submit_inserts_a_pending_task() {
    let (pool, db_name) = create_test_db().await;

    let input = serde_json::json!({"topic": "solar power"});
    let task = audit::submit_task(&pool, "agent:research", &input, None, None, None, 3)
        .await
        .expect("submit should succeed");

    assert_eq!(task.r#type, "agent:research");
    assert_eq!(task.status, TaskStatus::Pending);

    let recent = tasks::list_recent(&pool, 10).await.expect("list recent");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, task.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn submit_hashes_the_user_email_before_storage() {
    let (pool, db_name) = create_test_db().await;

    let hash = audit::hash_user_email("person@example.com");
    assert_ne!(hash, "person@example.com");
    assert_eq!(hash.len(), 64, "sha256 hex digest is 64 chars");

    let input = serde_json::json!({});
    let task = audit::submit_task(&pool, "agent:research", &input, Some(&hash), None, None, 3)
        .await
        .expect("submit should succeed");

    assert_eq!(task.user_id_hash.as_deref(), Some(hash.as_str()));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn submit_carries_a_tenant_id_through() {
    let (pool, db_name) = create_test_db().await;

    let input = serde_json::json!({});
    let task = audit::submit_task(&pool, "tool:web_search", &input, None, Some("tenant-a"), None, 3)
        .await
        .expect("submit should succeed");

    assert_eq!(task.tenant_id.as_deref(), Some("tenant-a"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fleet_status_counts_reflect_the_queue() {
    let (pool, db_name) = create_test_db().await;

    let input = serde_json::json!({});
    audit::submit_task(&pool, "agent:a", &input, None, None, None, 3)
        .await
        .expect("insert task 1");
    audit::submit_task(&pool, "agent:b", &input, None, None, None, 3)
        .await
        .expect("insert task 2");

    let counts = tasks::count_by_status(&pool).await.expect("count by status");
    let pending = counts
        .iter()
        .find(|(status, _)| *status == TaskStatus::Pending)
        .map(|(_, n)| *n);
    assert_eq!(pending, Some(2));

    let recent = tasks::list_recent(&pool, 1).await.expect("list recent");
    assert_eq!(recent.len(), 1, "limit should be respected");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn task_status_lookup_includes_its_audit_trail() {
    let (pool, db_name) = create_test_db().await;

    let input = serde_json::json!({});
    let task = audit::submit_task(&pool, "agent:research", &input, None, None, None, 3)
        .await
        .expect("submit should succeed");

    let entries = audit::list_for_resource(&pool, task.id)
        .await
        .expect("list audit entries");
    assert!(!entries.is_empty(), "submitting a task should append an audit entry");
    assert!(entries.iter().all(|e| e.resource_id == task.id));

    pool.close().await;
    drop_test_db(&db_name).await;
}
