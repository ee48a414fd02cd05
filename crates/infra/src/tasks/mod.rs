//! Task handlers and the isolated execution step.

mod registry;

pub use registry::{HandlerRegistry, RegisteredHandler, RegistryError, TaskHandler};

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use switchyard_core::Task;

use crate::runtime::Runtime;

/// How a single task execution ended.
#[derive(Debug)]
pub enum TaskOutcome {
    Succeeded,
    /// The handler returned an error.
    Failed(anyhow::Error),
    /// The handler panicked; carries the panic message when it was a string.
    Panicked(String),
    /// The handler outlived its registered timeout and was aborted.
    TimedOut(Duration),
    /// No handler is registered for the task's type.
    Unhandled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Succeeded)
    }
}

/// Run `task` through its registered handler.
///
/// The handler runs on its own tokio task so that a panic or a blown
/// deadline is contained here and reported as an outcome. This function
/// itself never panics and never returns early without an outcome.
pub async fn execute(registry: &HandlerRegistry, rt: &Arc<Runtime>, task: Task) -> TaskOutcome {
    let Some(registered) = registry.get(&task.task_type) else {
        return TaskOutcome::Unhandled;
    };

    let handler = registered.handler();
    let timeout = registered.timeout();
    let rt = Arc::clone(rt);
    let mut join = tokio::spawn(async move { handler.handle(rt, task).await });

    match tokio::time::timeout(timeout, &mut join).await {
        Ok(Ok(Ok(()))) => TaskOutcome::Succeeded,
        Ok(Ok(Err(err))) => TaskOutcome::Failed(err),
        Ok(Err(err)) if err.is_panic() => TaskOutcome::Panicked(panic_message(err.into_panic())),
        Ok(Err(err)) => TaskOutcome::Failed(anyhow::anyhow!("handler task cancelled: {err}")),
        Err(_) => {
            join.abort();
            TaskOutcome::TimedOut(timeout)
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
