//! `taskq worker` command: run the Worker State Machine (C6) to completion
//! or until shutdown.
//!
//! Two-stage Ctrl+C handling: the first signal asks the loop to stop at
//! its next clean boundary, the second forces an immediate exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::Result;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use taskq_core::registry::{FactoryTable, Registries};
use taskq_core::worker::{self, WorkerConfig};

/// Run the worker command: bootstrap registries, then drive the state
/// machine loop until Ctrl+C. `PgPool` is a cheap `Arc`-backed handle, so
/// the loop gets its own clone and the caller keeps ownership to close it.
pub async fn run_worker(pool: &PgPool, worker_id: Option<String>, registry_config_path: Option<String>) -> Result<()> {
    let config_path = registry_config_path
        .map(std::path::PathBuf::from)
        .or_else(|| std::env::var("TASKQ_REGISTRY_CONFIG_PATH").ok().map(std::path::PathBuf::from));
    let discovery_dir = std::env::var("TASKQ_REGISTRY_DISCOVERY_DIR")
        .ok()
        .map(std::path::PathBuf::from);

    let registries = Registries::bootstrap(
        config_path.as_deref(),
        discovery_dir.as_deref(),
        &FactoryTable::new(),
    )
    .await?;

    let worker_id = worker_id.unwrap_or_else(worker::default_worker_id);
    let worker_config = WorkerConfig::from_env();

    println!("Starting worker {worker_id}");
    println!("  lease_duration = {}s", worker_config.lease_duration.num_seconds());
    println!("  poll interval  = {:?} .. {:?}", worker_config.poll_min, worker_config.poll_max);

    let shutdown = CancellationToken::new();
    let shutdown_for_signal = shutdown.clone();
    let got_first_signal = Arc::new(AtomicBool::new(false));
    let got_first_signal_for_handler = Arc::clone(&got_first_signal);

    tokio::spawn(async move {
        loop {
            tokio::signal::ctrl_c().await.ok();
            if got_first_signal_for_handler.swap(true, Ordering::SeqCst) {
                eprintln!("\nForce exit.");
                std::process::exit(130);
            }
            eprintln!("\nShutting down at the next clean boundary (Ctrl+C again to force)...");
            shutdown_for_signal.cancel();
        }
    });

    worker::run(pool.clone(), registries, worker_id, worker_config, shutdown).await?;

    println!("Worker stopped.");
    Ok(())
}
