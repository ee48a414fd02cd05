//! In-memory stores for tests/dev and single-process deployments.
//!
//! - No IO
//! - Each operation runs inside one mutex critical section, which gives the
//!   same indivisibility a shared store gets from server-side scripts
//! - Coordination only spans the current process

mod lock;
mod marker;
mod queue;

pub use lock::InMemoryLocker;
pub use marker::InMemoryMarker;
pub use queue::InMemoryFairQueue;
