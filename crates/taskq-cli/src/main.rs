mod config;
mod status_cmd;
mod submit_cmd;
mod worker_cmd;

#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use taskq_db::pool;

use config::TaskqConfig;

#[derive(Parser)]
#[command(name = "taskq", about = "Distributed, database-backed task queue")]
struct Cli {
    /// Database URL (overrides TASKQ_DATABASE_URL env var)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a taskq config file (no database required)
    Init {
        /// PostgreSQL connection URL
        #[arg(long, default_value = "postgresql://localhost:5432/taskq")]
        db_url: String,
        /// Overwrite existing config file
        #[arg(long)]
        force: bool,
    },
    /// Initialize the taskq database (requires config file or env vars)
    DbInit,
    /// Submit a new task
    Submit {
        /// Task type, e.g. "agent:research", "tool:web_search", "workflow:research_assessment"
        task_type: String,
        /// JSON object literal for the task input (defaults to `{}`)
        #[arg(long)]
        input: Option<String>,
        /// Path to a file containing the JSON input, instead of --input
        #[arg(long, conflicts_with = "input")]
        input_file: Option<PathBuf>,
        /// End-user email; hashed before storage, never persisted in plaintext
        #[arg(long)]
        user_email: Option<String>,
        /// Tenant identifier for multi-tenant usage attribution
        #[arg(long)]
        tenant_id: Option<String>,
        /// Maximum claim attempts before the task is terminally failed
        /// (defaults to the resolved TASKQ_WORKER_MAX_RETRIES, or 3)
        #[arg(long)]
        max_tries: Option<i32>,
    },
    /// Run the worker state machine: poll, claim, execute, report
    Worker {
        /// Worker identity (defaults to hostname:pid)
        #[arg(long)]
        worker_id: Option<String>,
        /// Path to a registry TOML config (overrides TASKQ_REGISTRY_CONFIG_PATH)
        #[arg(long)]
        registry_config: Option<String>,
    },
    /// Show task status (omit task_id for a fleet-wide summary)
    Status {
        /// Task ID to show status for (omit to list recent tasks)
        task_id: Option<String>,
    },
}

/// Execute the `taskq init` command: write config file.
fn cmd_init(db_url: &str, force: bool) -> anyhow::Result<()> {
    let path = config::config_path();

    if path.exists() && !force {
        anyhow::bail!(
            "config file already exists at {}\nUse --force to overwrite.",
            path.display()
        );
    }

    let cfg = config::ConfigFile {
        database: config::DatabaseSection {
            url: db_url.to_owned(),
        },
    };

    config::save_config(&cfg)?;

    println!("Config written to {}", path.display());
    println!("  database.url = {db_url}");
    println!();
    println!("Next: run `taskq db-init` to create and migrate the database.");

    Ok(())
}

/// Execute the `taskq db-init` command: create database and run migrations.
async fn cmd_db_init(cli_db_url: Option<&str>) -> anyhow::Result<()> {
    let resolved = TaskqConfig::resolve(cli_db_url);

    println!("Initializing taskq database...");

    pool::ensure_database_exists(&resolved.db_config).await?;
    let db_pool = pool::create_pool(&resolved.db_config).await?;

    let migrations_path = pool::default_migrations_path();
    pool::run_migrations(&db_pool, migrations_path).await?;

    let counts = pool::table_counts(&db_pool).await?;
    println!("Database ready. Tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;

    println!("taskq db-init complete.");
    Ok(())
}

fn parse_input(input: Option<&str>, input_file: Option<&PathBuf>) -> anyhow::Result<serde_json::Value> {
    let raw = match (input, input_file) {
        (Some(literal), None) => literal.to_owned(),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read input file {}", path.display()))?,
        (None, None) => return Ok(serde_json::json!({})),
        (Some(_), Some(_)) => unreachable!("clap enforces --input and --input-file are mutually exclusive"),
    };
    serde_json::from_str(&raw).context("input is not valid JSON")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Init { db_url, force } => {
            cmd_init(&db_url, force)?;
        }
        Commands::DbInit => {
            cmd_db_init(cli.database_url.as_deref()).await?;
        }
        Commands::Submit {
            task_type,
            input,
            input_file,
            user_email,
            tenant_id,
            max_tries,
        } => {
            let resolved = TaskqConfig::resolve(cli.database_url.as_deref());
            let max_tries = max_tries.unwrap_or(resolved.default_max_tries);
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let input_value = parse_input(input.as_deref(), input_file.as_ref())?;
            let result = submit_cmd::run_submit(
                &db_pool,
                &task_type,
                &input_value,
                user_email.as_deref(),
                tenant_id.as_deref(),
                max_tries,
            )
            .await;
            db_pool.close().await;
            result?;
        }
        Commands::Worker { worker_id, registry_config } => {
            let resolved = TaskqConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = worker_cmd::run_worker(&db_pool, worker_id, registry_config).await;
            db_pool.close().await;
            result?;
        }
        Commands::Status { task_id } => {
            let resolved = TaskqConfig::resolve(cli.database_url.as_deref());
            let db_pool = pool::create_pool(&resolved.db_config).await?;
            let result = status_cmd::run_status(&db_pool, task_id.as_deref()).await;
            db_pool.close().await;
            result?;
        }
    }

    Ok(())
}
