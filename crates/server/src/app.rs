//! Process wiring and lifecycle.

use std::sync::Arc;

use tracing::info;

use switchyard_infra::workers::{Foreman, ForemanConfig, ForemanHandle, PoolStats};
use switchyard_infra::{Config, CronScheduler, HandlerRegistry, RegistryError, Runtime};

use crate::features;
use crate::features::session_timeouts::SessionStore;

/// Bulk, multi-tenant work.
pub const BATCH_QUEUE: &str = "batch";
/// Latency-sensitive single-event work.
pub const HANDLER_QUEUE: &str = "handler";

/// External systems the feature modules talk to.
#[derive(Clone)]
pub struct Collaborators {
    pub sessions: Arc<dyn SessionStore>,
}

/// Build the shared runtime: Redis when `REDIS_URL` is set (and the `redis`
/// feature is compiled in), in-memory stores otherwise.
pub async fn build_runtime(config: Config) -> anyhow::Result<Arc<Runtime>> {
    if config.redis_url.is_none() {
        info!("REDIS_URL not set; using in-memory stores (single process only)");
        return Ok(Arc::new(Runtime::in_memory(config)));
    }

    #[cfg(feature = "redis")]
    {
        use anyhow::Context;

        let rt = Runtime::connect_redis(config)
            .await
            .context("failed to connect to redis")?;
        Ok(Arc::new(rt))
    }

    #[cfg(not(feature = "redis"))]
    {
        tracing::warn!("REDIS_URL is set but this build lacks the redis feature; using in-memory stores");
        Ok(Arc::new(Runtime::in_memory(config)))
    }
}

/// Every task handler the process serves.
pub fn build_registry(collaborators: &Collaborators) -> Result<HandlerRegistry, RegistryError> {
    let mut registry = HandlerRegistry::new();
    features::register(&mut registry, collaborators)?;
    Ok(registry)
}

/// A running process: one worker pool per named queue plus the cron jobs.
#[derive(Debug)]
pub struct App {
    rt: Arc<Runtime>,
    foremen: Vec<ForemanHandle>,
    cron: CronScheduler,
}

impl App {
    /// Register handlers, then start pools and crons on the current runtime.
    pub fn start(rt: Arc<Runtime>, collaborators: Collaborators) -> anyhow::Result<Self> {
        let registry = Arc::new(build_registry(&collaborators)?);
        info!(task_types = ?registry.task_types(), "task handlers registered");

        let config = &rt.config;
        let foremen = vec![
            Foreman::start(
                Arc::clone(&rt),
                Arc::clone(&registry),
                ForemanConfig::new(BATCH_QUEUE)
                    .with_pool_size(config.batch_workers)
                    .with_idle_backoff(config.idle_backoff),
            ),
            Foreman::start(
                Arc::clone(&rt),
                Arc::clone(&registry),
                ForemanConfig::new(HANDLER_QUEUE)
                    .with_pool_size(config.handler_workers)
                    .with_idle_backoff(config.idle_backoff),
            ),
        ];

        let cron = CronScheduler::new(Arc::clone(&rt));
        features::start_crons(&cron, &collaborators);

        Ok(Self { rt, foremen, cron })
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.rt
    }

    /// Pool statistics per named queue.
    pub fn pool_stats(&self) -> Vec<(String, PoolStats)> {
        self.foremen
            .iter()
            .map(|f| (f.queue().to_string(), f.stats()))
            .collect()
    }

    /// Stop crons first (they produce work), then drain every pool.
    pub async fn shutdown(self) {
        self.cron.stop().await;
        for foreman in self.foremen {
            foreman.stop().await;
        }
        info!("switchyard stopped");
    }
}
