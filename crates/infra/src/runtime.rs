//! Shared dependency bundle handed to every task handler and cron job.

use std::sync::Arc;

use serde::Serialize;

use switchyard_core::{Priority, Task, TenantId};
use switchyard_store::{
    FairQueue, InMemoryFairQueue, InMemoryLocker, InMemoryMarker, Locker, Marker, StoreError,
};

use crate::config::Config;

/// Process-wide services: configuration plus the three coordination stores.
///
/// Built once at startup and shared behind an `Arc`.
#[derive(Clone)]
pub struct Runtime {
    pub config: Config,
    pub queue: Arc<dyn FairQueue>,
    pub locker: Arc<dyn Locker>,
    pub marker: Arc<dyn Marker>,
}

impl core::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Runtime {
    pub fn new(
        config: Config,
        queue: Arc<dyn FairQueue>,
        locker: Arc<dyn Locker>,
        marker: Arc<dyn Marker>,
    ) -> Self {
        Self {
            config,
            queue,
            locker,
            marker,
        }
    }

    /// Single-process runtime backed by the in-memory stores.
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(InMemoryFairQueue::new()),
            Arc::new(InMemoryLocker::new()),
            Arc::new(InMemoryMarker::new()),
        )
    }

    /// Runtime backed by Redis at `config.redis_url`.
    #[cfg(feature = "redis")]
    pub async fn connect_redis(config: Config) -> Result<Self, StoreError> {
        use crate::redis::{RedisConnection, RedisFairQueue, RedisLocker, RedisMarker};

        let url = config
            .redis_url
            .clone()
            .ok_or_else(|| StoreError::Connection("REDIS_URL is not set".to_string()))?;
        let conn = RedisConnection::connect(&url, &config.key_prefix, config.io_timeout).await?;

        Ok(Self::new(
            config,
            Arc::new(RedisFairQueue::new(conn.clone())),
            Arc::new(RedisLocker::new(conn.clone())),
            Arc::new(RedisMarker::new(conn)),
        ))
    }

    /// Enqueue a task of `task_type` for `tenant_id` onto `queue_name`.
    pub async fn enqueue<P>(
        &self,
        queue_name: &str,
        task_type: &str,
        tenant_id: TenantId,
        payload: &P,
        priority: Priority,
    ) -> Result<Task, StoreError>
    where
        P: Serialize + Sync + ?Sized,
    {
        switchyard_store::enqueue(
            self.queue.as_ref(),
            queue_name,
            task_type,
            tenant_id,
            payload,
            priority,
        )
        .await
    }
}
