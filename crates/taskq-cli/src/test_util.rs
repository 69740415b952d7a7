//! Test-only helpers shared across this crate's `#[cfg(test)]` modules.

#[cfg(test)]
use std::sync::{Mutex, OnceLock};

/// Serialize tests that mutate process-wide environment variables
/// (`TASKQ_DATABASE_URL`, `HOME`, `XDG_CONFIG_HOME`) so they don't race
/// each other under the default parallel test runner.
#[cfg(test)]
pub fn lock_env() -> std::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
