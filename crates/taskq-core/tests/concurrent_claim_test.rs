//! S6 — concurrent claim safety: seed a batch of pending tasks, claim them
//! with many concurrent "workers" hammering the same pool, and verify every
//! task was claimed by exactly one of them.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::Duration;
use serde_json::json;

use taskq_db::queries::tasks;
use taskq_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn hundred_tasks_ten_workers_each_claimed_exactly_once() {
    let (pool, db_name) = create_test_db().await;

    const TASK_COUNT: usize = 100;
    const WORKER_COUNT: usize = 10;

    for i in 0..TASK_COUNT {
        tasks::insert_task(&pool, "agent:noop", &json!({"i": i}), None, None, None, 3)
            .await
            .expect("seed task");
    }

    let claimed_ids: Arc<Mutex<HashSet<uuid::Uuid>>> = Arc::new(Mutex::new(HashSet::new()));
    let mut handles = Vec::with_capacity(WORKER_COUNT);

    for worker_index in 0..WORKER_COUNT {
        let pool = pool.clone();
        let claimed_ids = Arc::clone(&claimed_ids);
        let worker_id = format!("worker-{worker_index}");

        handles.push(tokio::spawn(async move {
            loop {
                match tasks::claim_one_ready(&pool, &worker_id, Duration::seconds(300))
                    .await
                    .expect("claim should not error")
                {
                    Some(task) => {
                        let mut seen = claimed_ids.lock().expect("lock");
                        let first_time_seen = seen.insert(task.id);
                        assert!(first_time_seen, "task {} claimed more than once", task.id);
                    }
                    None => break,
                }
            }
        }));
    }

    for handle in handles {
        handle.await.expect("worker task panicked");
    }

    let total_claimed = claimed_ids.lock().expect("lock").len();
    assert_eq!(total_claimed, TASK_COUNT);

    let still_pending = tasks::list_by_status(&pool, taskq_db::models::TaskStatus::Pending)
        .await
        .expect("list pending");
    assert!(still_pending.is_empty());

    let running = tasks::list_by_status(&pool, taskq_db::models::TaskStatus::Running)
        .await
        .expect("list running");
    assert_eq!(running.len(), TASK_COUNT);

    pool.close().await;
    drop_test_db(&db_name).await;
}
