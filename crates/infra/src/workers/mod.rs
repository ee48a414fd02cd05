//! Foreman/worker pools draining a fair queue.
//!
//! - One foreman per named queue pops tasks only when a worker is free
//! - A pool of N workers bounds concurrency at N
//! - A worker survives any handler failure (error, panic, timeout)
//! - Every popped task is completed exactly once

mod foreman;
mod stats;
mod worker;

pub use foreman::{Foreman, ForemanConfig, ForemanHandle};
pub use stats::{PoolStats, WorkerState};
