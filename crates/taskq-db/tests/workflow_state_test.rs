//! Tests for the `workflow_state` query module.

use taskq_db::queries::{tasks, workflow_state};

use taskq_test_utils::{create_test_db, drop_test_db};

async fn insert_parent(pool: &sqlx::PgPool) -> uuid::Uuid {
    tasks::insert_task(
        pool,
        "workflow:research_assessment",
        &serde_json::json!({}),
        None,
        None,
        None,
        3,
    )
    .await
    .expect("insert parent")
    .id
}

#[tokio::test]
async fn insert_workflow_state_starts_unconverged() {
    let (pool, db_name) = create_test_db().await;
    let parent_id = insert_parent(&pool).await;

    let state = workflow_state::insert_workflow_state(&pool, parent_id, "research_assessment", 3)
        .await
        .expect("insert workflow state");

    assert_eq!(state.current_step, 0);
    assert_eq!(state.current_iteration, 1);
    assert_eq!(state.max_iterations, 3);
    assert!(!state.converged);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_step_iteration_and_mark_converged() {
    let (pool, db_name) = create_test_db().await;
    let parent_id = insert_parent(&pool).await;

    workflow_state::insert_workflow_state(&pool, parent_id, "research_assessment", 3)
        .await
        .expect("insert");

    let advanced = workflow_state::update_step_iteration(&pool, parent_id, 1, 2)
        .await
        .expect("advance");
    assert_eq!(advanced.current_step, 1);
    assert_eq!(advanced.current_iteration, 2);

    let converged = workflow_state::mark_converged(&pool, parent_id)
        .await
        .expect("mark converged");
    assert!(converged.converged);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn update_accumulated_output_overwrites_value() {
    let (pool, db_name) = create_test_db().await;
    let parent_id = insert_parent(&pool).await;

    workflow_state::insert_workflow_state(&pool, parent_id, "research_assessment", 3)
        .await
        .expect("insert");

    let updated = workflow_state::update_accumulated_output(
        &pool,
        parent_id,
        &serde_json::json!({"draft": "v1"}),
    )
    .await
    .expect("update");
    assert_eq!(updated.accumulated_output, serde_json::json!({"draft": "v1"}));

    let fetched = workflow_state::get_by_parent(&pool, parent_id)
        .await
        .expect("get")
        .expect("exists");
    assert_eq!(fetched.accumulated_output, serde_json::json!({"draft": "v1"}));

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn get_by_parent_is_none_without_workflow() {
    let (pool, db_name) = create_test_db().await;
    let parent_id = insert_parent(&pool).await;

    let state = workflow_state::get_by_parent(&pool, parent_id)
        .await
        .expect("get should not error");
    assert!(state.is_none());

    pool.close().await;
    drop_test_db(&db_name).await;
}
