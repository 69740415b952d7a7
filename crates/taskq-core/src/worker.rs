//! Worker State Machine (C6): the long-running loop each worker process
//! runs -- connect, recover expired leases, poll with adaptive backoff,
//! claim, execute, report -- expressed as a pure `match` dispatch over the
//! current [`State`] to one handler function per state. No handler
//! branches on another state's name; the only control flow a handler
//! performs is deciding which [`State`] comes next.
//!
//! Shutdown cooperates via `tokio_util::sync::CancellationToken` rather
//! than an abrupt kill: a worker processes one Task at a time (a Task is
//! never split across workers), so there is no in-flight fan-out to drain.
//! Shutdown instead defers until the loop next reaches a boundary where no
//! task is in flight (`Idle`/`ErrorWait`'s sleep, or the instant before
//! `Connecting`) -- finish the task you're on, then stop.

use std::time::Duration as StdDuration;

use chrono::Duration;
use sqlx::PgPool;
use taskq_db::models::Task;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::audit;
use crate::error::TaskqError;
use crate::executor::{self, ExecutionResult};
use crate::lease;
use crate::registry::Registries;

/// Worker-tunable parameters, read from `TASKQ_WORKER_*` env vars.
///
/// `TASKQ_WORKER_MAX_RETRIES` is not among these: per spec.md §6 it governs
/// the *default `max_tries` for new tasks*, a `taskq submit`-time concern
/// resolved by `taskq-cli::config::TaskqConfig`, not a property of the
/// worker loop itself.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub lease_duration: Duration,
    pub recovery_interval: StdDuration,
    pub poll_min: StdDuration,
    pub poll_max: StdDuration,
}

impl WorkerConfig {
    pub fn from_env() -> Self {
        Self {
            lease_duration: Duration::seconds(env_var("TASKQ_WORKER_LEASE_DURATION_SECONDS", 300.0) as i64),
            recovery_interval: StdDuration::from_secs_f64(env_var("TASKQ_WORKER_RECOVERY_INTERVAL_SECONDS", 30.0)),
            poll_min: StdDuration::from_secs_f64(env_var("TASKQ_WORKER_POLL_MIN_INTERVAL_SECONDS", 0.2)),
            poll_max: StdDuration::from_secs_f64(env_var("TASKQ_WORKER_POLL_MAX_INTERVAL_SECONDS", 10.0)),
        }
    }
}

fn env_var(name: &str, default: f64) -> f64 {
    std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

/// A worker's identity for lease ownership and audit metadata,
/// `hostname:pid` unless overridden.
pub fn default_worker_id() -> String {
    format!("{}:{}", hostname_or_unknown(), std::process::id())
}

fn hostname_or_unknown() -> String {
    #[cfg(unix)]
    {
        let mut buf = vec![0u8; 256];
        let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
        if rc == 0 {
            if let Some(nul) = buf.iter().position(|&b| b == 0) {
                buf.truncate(nul);
            }
            if let Ok(name) = String::from_utf8(buf) {
                if !name.is_empty() {
                    return name;
                }
            }
        }
    }
    "unknown-host".to_owned()
}

/// The worker loop's states.
///
/// `Claiming` carries the just-claimed task through from `Polling` rather
/// than re-querying it: the claim's `SELECT ... FOR UPDATE SKIP LOCKED` +
/// `UPDATE` already happened atomically in [`lease::claim_one`], so
/// `Claiming` is a log-and-pass-through boundary rather than a second
/// round trip. This folds what the transition table calls
/// "`Claiming` -> `Processing` on successful lease acquisition" into the
/// handler that already holds the acquired lease.
enum State {
    Startup,
    Connecting,
    Recovery,
    Polling,
    Claiming(Box<Task>),
    Processing(Box<Task>),
    ReportingSuccess(Box<Task>, Box<ExecutionResult>),
    ReportingFailure(Box<Task>, String),
    Backoff,
    Idle,
    ErrorWait,
}

/// Mutable state threaded through the dispatch loop: the adaptive poll
/// interval, the last recovery timestamp, and the shutdown signal.
struct WorkerContext {
    pool: PgPool,
    registries: Registries,
    worker_id: String,
    config: WorkerConfig,
    shutdown: CancellationToken,
    /// The interval `Idle` will sleep for next; doubles on every empty
    /// poll up to `config.poll_max`, resets to `config.poll_min` on claim.
    next_poll_delay: StdDuration,
    /// The interval `Idle` sleeps on *this* pass, captured by `Backoff`
    /// before it advances `next_poll_delay`.
    pending_sleep: StdDuration,
    last_recovery: Option<std::time::Instant>,
}

/// Run the worker loop until `shutdown` is cancelled. Shutdown is observed
/// only at the boundary right before `Connecting` -- i.e. after `Startup`,
/// after `Idle`'s sleep, or after `ErrorWait`'s sleep -- never in the
/// middle of `Processing` a claimed task.
pub async fn run(
    pool: PgPool,
    registries: Registries,
    worker_id: String,
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> Result<(), TaskqError> {
    let mut ctx = WorkerContext {
        pool,
        registries,
        worker_id,
        next_poll_delay: config.poll_min,
        pending_sleep: config.poll_min,
        config,
        shutdown,
        last_recovery: None,
    };

    let mut state = State::Startup;
    loop {
        state = dispatch(state, &mut ctx).await;

        if ctx.shutdown.is_cancelled() && matches!(state, State::Connecting) {
            info!(worker_id = %ctx.worker_id, "shutdown observed at a clean boundary, stopping");
            return Ok(());
        }
    }
}

/// The pure dispatch: match the current state, call its handler, return
/// what it decides comes next. No handler below this point matches on
/// `state` again.
async fn dispatch(state: State, ctx: &mut WorkerContext) -> State {
    match state {
        State::Startup => handle_startup(ctx).await,
        State::Connecting => handle_connecting(ctx).await,
        State::Recovery => handle_recovery(ctx).await,
        State::Polling => handle_polling(ctx).await,
        State::Claiming(task) => handle_claiming(ctx, *task).await,
        State::Processing(task) => handle_processing(ctx, *task).await,
        State::ReportingSuccess(task, result) => handle_reporting_success(ctx, *task, *result).await,
        State::ReportingFailure(task, error) => handle_reporting_failure(ctx, *task, error).await,
        State::Backoff => handle_backoff(ctx).await,
        State::Idle => handle_idle(ctx).await,
        State::ErrorWait => handle_error_wait(ctx).await,
    }
}

async fn handle_startup(ctx: &mut WorkerContext) -> State {
    info!(worker_id = %ctx.worker_id, "worker starting");
    State::Connecting
}

/// A lightweight liveness check against the pool. A healthy connection
/// then asks "has a recovery interval elapsed?" -- if so, detour through
/// `Recovery` before polling; otherwise go straight to `Polling`.
async fn handle_connecting(ctx: &mut WorkerContext) -> State {
    if let Err(e) = sqlx::query("SELECT 1").execute(&ctx.pool).await {
        error!(worker_id = %ctx.worker_id, error = %e, "database connectivity check failed");
        return State::ErrorWait;
    }

    let due = ctx
        .last_recovery
        .map(|t| t.elapsed() >= ctx.config.recovery_interval)
        .unwrap_or(true);

    if due {
        State::Recovery
    } else {
        State::Polling
    }
}

async fn handle_recovery(ctx: &mut WorkerContext) -> State {
    match lease::reclaim_expired(&ctx.pool).await {
        Ok((reclaimed, exhausted)) => {
            if reclaimed > 0 || exhausted > 0 {
                info!(worker_id = %ctx.worker_id, reclaimed, exhausted, "lease recovery pass complete");
            }
            ctx.last_recovery = Some(std::time::Instant::now());
            State::Polling
        }
        Err(e) => {
            error!(worker_id = %ctx.worker_id, error = %e, "lease recovery failed");
            State::ErrorWait
        }
    }
}

async fn handle_polling(ctx: &mut WorkerContext) -> State {
    match lease::claim_one(&ctx.pool, &ctx.worker_id, ctx.config.lease_duration).await {
        Ok(Some(task)) => {
            ctx.next_poll_delay = ctx.config.poll_min;
            State::Claiming(Box::new(task))
        }
        Ok(None) => State::Backoff,
        Err(e) => {
            error!(worker_id = %ctx.worker_id, error = %e, "poll/claim failed");
            State::ErrorWait
        }
    }
}

async fn handle_claiming(ctx: &mut WorkerContext, task: Task) -> State {
    info!(worker_id = %ctx.worker_id, task_id = %task.id, task_type = %task.r#type, try_count = task.try_count, "task claimed");
    State::Processing(Box::new(task))
}

async fn handle_processing(ctx: &mut WorkerContext, task: Task) -> State {
    match executor::execute(&task, &ctx.registries, &ctx.pool).await {
        Ok(result) => State::ReportingSuccess(Box::new(task), Box::new(result)),
        Err(e) => {
            let message = e.terminal_message();
            State::ReportingFailure(Box::new(task), message)
        }
    }
}

/// Write the terminal `done` row and its audit entry. Workflow-type tasks
/// carry no usage of their own (the orchestrator attributes usage to
/// Subtasks); their total is rolled up here via
/// [`audit::aggregate_workflow_usage`] before the completion write.
async fn handle_reporting_success(ctx: &mut WorkerContext, task: Task, result: ExecutionResult) -> State {
    let (model_used, input_tokens, output_tokens, total_cost) = if task.r#type.starts_with("workflow:") {
        match audit::aggregate_workflow_usage(&ctx.pool, task.id).await {
            Ok(totals) => (None, Some(totals.input_tokens), Some(totals.output_tokens), Some(totals.total_cost)),
            Err(e) => {
                warn!(worker_id = %ctx.worker_id, task_id = %task.id, error = %e, "failed to aggregate workflow usage, completing without it");
                (None, None, None, None)
            }
        }
    } else {
        match &result.usage {
            Some(u) => (Some(u.model.clone()), Some(u.input_tokens), Some(u.output_tokens), Some(u.cost)),
            None => (None, None, None, None),
        }
    };

    match lease::complete(
        &ctx.pool,
        task.id,
        &ctx.worker_id,
        &result.output,
        model_used.as_deref(),
        input_tokens,
        output_tokens,
        total_cost,
    )
    .await
    {
        Ok(true) => info!(worker_id = %ctx.worker_id, task_id = %task.id, "task completed"),
        Ok(false) => warn!(worker_id = %ctx.worker_id, task_id = %task.id, "lease lost before completion could be written, abandoning"),
        Err(e) => error!(worker_id = %ctx.worker_id, task_id = %task.id, error = %e, "failed to write task completion"),
    }

    State::Polling
}

async fn handle_reporting_failure(ctx: &mut WorkerContext, task: Task, error_message: String) -> State {
    match lease::fail(&ctx.pool, task.id, &ctx.worker_id, &error_message).await {
        Ok(true) => warn!(worker_id = %ctx.worker_id, task_id = %task.id, error = %error_message, "task failed"),
        Ok(false) => warn!(worker_id = %ctx.worker_id, task_id = %task.id, "lease lost before failure could be written, abandoning"),
        Err(e) => error!(worker_id = %ctx.worker_id, task_id = %task.id, error = %e, "failed to write task failure"),
    }

    State::Polling
}

/// Compute this pass's sleep from the current `next_poll_delay`, then
/// double it (capped at `poll_max`) for whichever future pass needs it
/// next. `Idle` performs the actual sleep.
async fn handle_backoff(ctx: &mut WorkerContext) -> State {
    ctx.pending_sleep = ctx.next_poll_delay;
    ctx.next_poll_delay = (ctx.next_poll_delay * 2).min(ctx.config.poll_max);
    State::Idle
}

async fn handle_idle(ctx: &mut WorkerContext) -> State {
    tokio::select! {
        _ = tokio::time::sleep(ctx.pending_sleep) => {}
        _ = ctx.shutdown.cancelled() => {}
    }
    State::Connecting
}

/// A fixed delay after an infrastructure failure, independent of the poll
/// backoff clock -- an error talking to the database says nothing about
/// how likely a task is to be waiting, so it doesn't touch
/// `next_poll_delay`.
async fn handle_error_wait(ctx: &mut WorkerContext) -> State {
    tokio::select! {
        _ = tokio::time::sleep(StdDuration::from_secs(5)) => {}
        _ = ctx.shutdown.cancelled() => {}
    }
    State::Connecting
}
