//! Task-type → handler table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use switchyard_core::Task;

use crate::runtime::Runtime;

/// Something that can process one task.
///
/// An `Err` is logged by the worker and the task is dropped; there is no
/// automatic retry.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    async fn handle(&self, rt: Arc<Runtime>, task: Task) -> anyhow::Result<()>;
}

/// Adapter so plain async closures can be registered.
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Arc<Runtime>, Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, rt: Arc<Runtime>, task: Task) -> anyhow::Result<()> {
        (self.0)(rt, task).await
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("handler already registered for task type {0:?}")]
    Duplicate(String),

    #[error("handler for task type {0:?} needs a non-zero timeout")]
    ZeroTimeout(String),
}

/// A registered handler and its per-type deadline.
#[derive(Clone)]
pub struct RegisteredHandler {
    handler: Arc<dyn TaskHandler>,
    timeout: Duration,
}

impl RegisteredHandler {
    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        Arc::clone(&self.handler)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Maps task type names to handlers.
///
/// Populated once at startup, then shared read-only by every worker.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, RegisteredHandler>,
}

impl core::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `task_type`, bounded by `timeout` per task.
    pub fn register<H>(
        &mut self,
        task_type: impl Into<String>,
        timeout: Duration,
        handler: H,
    ) -> Result<(), RegistryError>
    where
        H: TaskHandler,
    {
        let task_type = task_type.into();
        if timeout.is_zero() {
            return Err(RegistryError::ZeroTimeout(task_type));
        }
        if self.handlers.contains_key(&task_type) {
            return Err(RegistryError::Duplicate(task_type));
        }

        self.handlers.insert(
            task_type,
            RegisteredHandler {
                handler: Arc::new(handler),
                timeout,
            },
        );
        Ok(())
    }

    /// Register an async closure for `task_type`.
    pub fn register_fn<F, Fut>(
        &mut self,
        task_type: impl Into<String>,
        timeout: Duration,
        handler: F,
    ) -> Result<(), RegistryError>
    where
        F: Fn(Arc<Runtime>, Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(task_type, timeout, FnHandler(handler))
    }

    pub fn get(&self, task_type: &str) -> Option<&RegisteredHandler> {
        self.handlers.get(task_type)
    }

    /// Registered task types, sorted.
    pub fn task_types(&self) -> Vec<&str> {
        let mut types: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(60);

    struct Noop;

    #[async_trait]
    impl TaskHandler for Noop {
        async fn handle(&self, _rt: Arc<Runtime>, _task: Task) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry.register("send_msg", TIMEOUT, Noop).unwrap();

        let err = registry.register("send_msg", TIMEOUT, Noop).unwrap_err();
        assert_eq!(err, RegistryError::Duplicate("send_msg".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut registry = HandlerRegistry::new();
        let err = registry
            .register_fn("send_msg", Duration::ZERO, |_rt, _task| async { Ok(()) })
            .unwrap_err();
        assert_eq!(err, RegistryError::ZeroTimeout("send_msg".to_string()));
        assert!(registry.is_empty());
    }

    #[test]
    fn lookup_returns_the_registered_timeout() {
        let mut registry = HandlerRegistry::new();
        registry.register("a", Duration::from_secs(5), Noop).unwrap();
        registry
            .register_fn("b", TIMEOUT, |_rt, _task| async { Ok(()) })
            .unwrap();

        assert_eq!(registry.get("a").map(|h| h.timeout()), Some(Duration::from_secs(5)));
        assert!(registry.get("c").is_none());
        assert_eq!(registry.task_types(), vec!["a", "b"]);
    }
}
