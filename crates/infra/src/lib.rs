//! Dispatch core: config, runtime, handler registry, worker pools, cron and
//! the Redis-backed coordination stores.

pub mod config;
pub mod cron;
pub mod runtime;
pub mod tasks;
pub mod workers;

/// Redis adapters for the fair queue, locker and marker.
#[cfg(feature = "redis")]
pub mod redis;


pub use config::{Config, ConfigError};
pub use cron::{CronScheduler, CronScope};
pub use runtime::Runtime;
pub use tasks::{HandlerRegistry, RegistryError, TaskHandler, TaskOutcome};
pub use workers::{Foreman, ForemanConfig, ForemanHandle, PoolStats, WorkerState};
