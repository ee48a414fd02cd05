//! `switchyard-core`: task model shared by producers, stores and workers.
//!
//! This crate contains **pure** primitives (no IO, no async).

pub mod clock;
pub mod error;
pub mod id;
pub mod task;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{TaskError, TaskResult};
pub use id::{TaskId, TenantId};
pub use task::{Priority, Task};
