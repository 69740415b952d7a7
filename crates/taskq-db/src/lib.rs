//! Database access layer for the task queue: connection pooling, migrations,
//! and typed query functions over `tasks`, `subtasks`, `workflow_state`, and
//! `audit_log`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
