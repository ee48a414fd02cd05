//! Redis-backed coordination stores.
//!
//! Every multi-step operation is a server-side Lua script, so it is atomic
//! with respect to every other client of the same Redis.
//!
//! ## Key layout
//!
//! - `{prefix}:queue:{name}:active`: zset, tenant → in-flight count
//! - `{prefix}:queue:{name}:turn`: hash, tenant → rotation position
//! - `{prefix}:queue:{name}:seq`: rotation position counter
//! - `{prefix}:queue:{name}:tenant:{id}`: zset, task JSON by score
//! - `{prefix}:lock:{key}`: lock token with PX expiry
//! - `{prefix}:marker:{group}:{YYYY-MM-DD}`: set of marked ids

mod lock;
mod marker;
mod queue;

pub use lock::RedisLocker;
pub use marker::RedisMarker;
pub use queue::RedisFairQueue;

use std::future::Future;
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{RedisError, RedisResult};
use tracing::info;

use switchyard_store::StoreError;

/// Shared, auto-reconnecting connection plus key namespace.
#[derive(Clone)]
pub struct RedisConnection {
    manager: ConnectionManager,
    prefix: String,
    io_timeout: Duration,
}

impl core::fmt::Debug for RedisConnection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisConnection")
            .field("prefix", &self.prefix)
            .field("io_timeout", &self.io_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisConnection {
    /// Connect to `url`. Every later round trip is bounded by `io_timeout`.
    pub async fn connect(
        url: &str,
        prefix: impl Into<String>,
        io_timeout: Duration,
    ) -> Result<Self, StoreError> {
        let client =
            redis::Client::open(url).map_err(|e| StoreError::Connection(e.to_string()))?;
        let manager = tokio::time::timeout(io_timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| StoreError::Timeout(io_timeout))?
            .map_err(map_redis_error)?;

        let prefix = prefix.into();
        info!(prefix = %prefix, "connected to redis");

        Ok(Self {
            manager,
            prefix,
            io_timeout,
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub(crate) fn key(&self, suffix: &str) -> String {
        format!("{}:{suffix}", self.prefix)
    }

    pub(crate) fn manager(&self) -> ConnectionManager {
        self.manager.clone()
    }

    /// Await `fut`, bounded by the I/O timeout.
    pub(crate) async fn timed<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = RedisResult<T>>,
    {
        match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result.map_err(map_redis_error),
            Err(_) => Err(StoreError::Timeout(self.io_timeout)),
        }
    }
}

pub(crate) fn map_redis_error(err: RedisError) -> StoreError {
    if err.is_timeout() {
        StoreError::Command(format!("redis timeout: {err}"))
    } else if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        StoreError::Connection(err.to_string())
    } else {
        StoreError::Command(err.to_string())
    }
}

/// Helpers for the `#[ignore]`d tests that need a live Redis at `REDIS_URL`.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) async fn connect() -> RedisConnection {
        let url = std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());
        let prefix = format!("switchyard-test-{}", uuid::Uuid::new_v4().simple());
        RedisConnection::connect(&url, prefix, Duration::from_secs(2))
            .await
            .expect("redis reachable at REDIS_URL")
    }
}
