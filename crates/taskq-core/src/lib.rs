//! Execution substrate for the task queue: lease protocol, agent/tool/
//! workflow registry, task dispatch, the declarative workflow orchestrator,
//! and the worker state machine that drives all of it.

pub mod audit;
pub mod error;
pub mod executor;
pub mod lease;
pub mod orchestrator;
pub mod registry;
pub mod worker;

pub use error::TaskqError;
