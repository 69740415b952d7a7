//! Tests for the `tasks` query module: the durable work queue.

use chrono::Duration;

use taskq_db::models::TaskStatus;
use taskq_db::queries::tasks;

use taskq_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn insert_returns_pending_with_defaults() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(
        &pool,
        "agent:research",
        &serde_json::json!({"topic": "solar"}),
        None,
        None,
        None,
        3,
    )
    .await
    .expect("insert should succeed");

    assert_eq!(task.status, TaskStatus::Pending);
    assert_eq!(task.try_count, 0);
    assert_eq!(task.max_tries, 3);
    assert!(task.lease_owner.is_none());
    assert!(task.lease_expires_at.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_one_ready_picks_oldest_pending() {
    let (pool, db_name) = create_test_db().await;

    let first = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert first");
    let _second =
        tasks::insert_task(&pool, "agent:b", &serde_json::json!({}), None, None, None, 3)
            .await
            .expect("insert second");

    let claimed = tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim should succeed")
        .expect("a task should be claimable");

    assert_eq!(claimed.id, first.id);
    assert_eq!(claimed.status, TaskStatus::Running);
    assert_eq!(claimed.lease_owner.as_deref(), Some("worker-1"));
    assert_eq!(claimed.try_count, 1);
    assert!(claimed.lease_expires_at.is_some());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn claim_one_ready_returns_none_when_empty() {
    let (pool, db_name) = create_test_db().await;

    let claimed = tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim should succeed");

    assert!(claimed.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn complete_task_requires_lease_ownership() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert");
    tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim")
        .expect("claimable");

    // Wrong owner: no-op.
    let affected = tasks::complete_task(
        &pool,
        task.id,
        "worker-2",
        &serde_json::json!({"result": "x"}),
        None,
        None,
        None,
        None,
    )
    .await
    .expect("complete should not error");
    assert_eq!(affected, 0);

    // Correct owner: succeeds.
    let affected = tasks::complete_task(
        &pool,
        task.id,
        "worker-1",
        &serde_json::json!({"result": "x"}),
        Some("gpt-test"),
        Some(100),
        Some(50),
        Some(0.02),
    )
    .await
    .expect("complete should succeed");
    assert_eq!(affected, 1);

    let refreshed = tasks::get_task(&pool, task.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(refreshed.status, TaskStatus::Done);
    assert_eq!(refreshed.output, Some(serde_json::json!({"result": "x"})));
    assert!(refreshed.lease_owner.is_none());
    assert!(refreshed.lease_expires_at.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_task_sets_error_status() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert");
    tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim")
        .expect("claimable");

    let affected = tasks::fail_task(&pool, task.id, "worker-1", "boom")
        .await
        .expect("fail should succeed");
    assert_eq!(affected, 1);

    let refreshed = tasks::get_task(&pool, task.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(refreshed.status, TaskStatus::Error);
    assert_eq!(refreshed.error.as_deref(), Some("boom"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn reclaim_expired_to_pending_resets_retryable_tasks() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert");
    // Claim with a lease already in the past.
    tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(-10))
        .await
        .expect("claim")
        .expect("claimable");

    let reclaimed = tasks::reclaim_expired_to_pending(&pool)
        .await
        .expect("reclaim should succeed");

    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].id, task.id);

    let refreshed = tasks::get_task(&pool, task.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(refreshed.status, TaskStatus::Pending);
    assert!(refreshed.lease_owner.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fail_expired_exhausted_terminally_fails_tasks_out_of_tries() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 1)
        .await
        .expect("insert");
    tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(-10))
        .await
        .expect("claim")
        .expect("claimable");

    let failed = tasks::fail_expired_exhausted(&pool)
        .await
        .expect("fail sweep should succeed");

    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].id, task.id);

    let refreshed = tasks::get_task(&pool, task.id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(refreshed.status, TaskStatus::Error);
    assert_eq!(refreshed.error.as_deref(), Some("lease expired after max_tries"));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn renew_lease_extends_expiry_for_owner_only() {
    let (pool, db_name) = create_test_db().await;

    let task = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert");
    let claimed = tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim")
        .expect("claimable");

    let affected = tasks::renew_lease(&pool, task.id, "worker-2", Duration::seconds(60))
        .await
        .expect("renew should not error");
    assert_eq!(affected, 0);

    let affected = tasks::renew_lease(&pool, task.id, "worker-1", Duration::seconds(60))
        .await
        .expect("renew should succeed");
    assert_eq!(affected, 1);

    let refreshed = tasks::get_task(&pool, task.id)
        .await
        .expect("get")
        .expect("exists");
    assert!(refreshed.lease_expires_at.unwrap() > claimed.lease_expires_at.unwrap());

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_by_status_filters_correctly() {
    let (pool, db_name) = create_test_db().await;

    tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert");
    tasks::insert_task(&pool, "agent:b", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert");
    tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim")
        .expect("claimable");

    let pending = tasks::list_by_status(&pool, TaskStatus::Pending)
        .await
        .expect("list pending");
    let running = tasks::list_by_status(&pool, TaskStatus::Running)
        .await
        .expect("list running");

    assert_eq!(pending.len(), 1);
    assert_eq!(running.len(), 1);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn count_by_status_reflects_a_mixed_queue() {
    let (pool, db_name) = create_test_db().await;

    tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert pending");
    tasks::insert_task(&pool, "agent:b", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert running");
    tasks::claim_one_ready(&pool, "worker-1", Duration::seconds(30))
        .await
        .expect("claim")
        .expect("claimable");

    let counts = tasks::count_by_status(&pool).await.expect("count");
    let pending_count = counts
        .iter()
        .find(|(status, _)| *status == TaskStatus::Pending)
        .map(|(_, n)| *n);
    let running_count = counts
        .iter()
        .find(|(status, _)| *status == TaskStatus::Running)
        .map(|(_, n)| *n);

    assert_eq!(pending_count, Some(1));
    assert_eq!(running_count, Some(1));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn list_recent_orders_newest_first_and_respects_limit() {
    let (pool, db_name) = create_test_db().await;

    let first = tasks::insert_task(&pool, "agent:a", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert first");
    let second = tasks::insert_task(&pool, "agent:b", &serde_json::json!({}), None, None, None, 3)
        .await
        .expect("insert second");

    let recent = tasks::list_recent(&pool, 1).await.expect("list recent");
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, second.id);

    let both = tasks::list_recent(&pool, 10).await.expect("list recent");
    assert_eq!(both.len(), 2);
    assert_eq!(both[0].id, second.id);
    assert_eq!(both[1].id, first.id);

    pool.close().await;
    drop_test_db(&db_name).await;
}
