//! Task Executor (C4): dispatches a claimed Task by its `type` prefix and
//! captures the resulting output/usage -- take a claimed unit of work,
//! dispatch to a capability, capture results, propagate usage -- as a
//! three-way dispatch on `tool:`/`agent:`/`workflow:`.

use sqlx::PgPool;
use tracing::info_span;

use taskq_db::models::Task;

use crate::error::TaskqError;
use crate::orchestrator;
use crate::registry::{Registries, Usage};

/// The result of dispatching and running a Task to completion.
pub struct ExecutionResult {
    pub output: serde_json::Value,
    pub usage: Option<Usage>,
}

enum Dispatch<'a> {
    Tool(&'a str),
    Agent(&'a str),
    Workflow(&'a str),
}

fn classify(task_type: &str) -> Result<Dispatch<'_>, TaskqError> {
    if let Some(name) = task_type.strip_prefix("tool:") {
        Ok(Dispatch::Tool(name))
    } else if let Some(name) = task_type.strip_prefix("agent:") {
        Ok(Dispatch::Agent(name))
    } else if let Some(name) = task_type.strip_prefix("workflow:") {
        Ok(Dispatch::Workflow(name))
    } else {
        Err(TaskqError::MalformedTaskType(task_type.to_owned()))
    }
}

/// The span boundary for a task's execution, seeded from
/// `input._trace_context.trace_id` when present, otherwise a fresh root
/// span.
fn task_span(task: &Task) -> tracing::Span {
    let trace_id = task
        .input
        .get("_trace_context")
        .and_then(|ctx| ctx.get("trace_id"))
        .and_then(|v| v.as_str());

    match trace_id {
        Some(trace_id) => info_span!("task_execution", task_id = %task.id, task_type = %task.r#type, trace_id),
        None => info_span!("task_execution", task_id = %task.id, task_type = %task.r#type),
    }
}

/// Dispatch a claimed Task to its handler. Workflow tasks hand off to the
/// orchestrator, which owns Subtask/WorkflowState persistence itself; their
/// usage is aggregated separately (see [`crate::audit::aggregate_workflow_usage`])
/// rather than returned here.
pub async fn execute(
    task: &Task,
    registries: &Registries,
    pool: &PgPool,
) -> Result<ExecutionResult, TaskqError> {
    let span = task_span(task);
    let _enter = span.enter();

    match classify(&task.r#type)? {
        Dispatch::Tool(name) => {
            let tool = registries.tools.get(name).await?;
            let result = tool.execute(&task.input).await;
            if !result.success {
                return Err(TaskqError::ToolExecutionFailed {
                    tool: name.to_owned(),
                    message: result.error.unwrap_or_else(|| "tool reported failure".to_owned()),
                });
            }
            Ok(ExecutionResult {
                output: result.result.unwrap_or(serde_json::Value::Null),
                usage: None,
            })
        }
        Dispatch::Agent(name) => {
            let agent = registries.agents.get(name, &registries.tools).await?;
            let user_id_hash = task.user_id_hash.as_deref();
            let result = agent.execute(&task.input, user_id_hash).await.map_err(|e| {
                TaskqError::AgentExecutionFailed {
                    agent: name.to_owned(),
                    message: e.to_string(),
                }
            })?;
            Ok(ExecutionResult {
                output: result.output,
                usage: result.usage,
            })
        }
        Dispatch::Workflow(name) => {
            let output = orchestrator::run(task, name, registries, pool).await?;
            Ok(ExecutionResult { output, usage: None })
        }
    }
}
