//! Shared-store coordination primitives (mechanics only).
//!
//! Every cross-process guarantee in the dispatch core is expressed as one of
//! three traits:
//!
//! - [`FairQueue`]: per-tenant sub-queues plus an active-tenant rotation
//! - [`Locker`]: TTL'd, owner-checked mutual exclusion
//! - [`Marker`]: day-bucketed "already scheduled?" hints
//!
//! Each operation on these traits must be indivisible with respect to other
//! callers, including callers in other processes. The in-memory
//! implementations here get that from a single mutex; shared-store
//! implementations (Redis) live in `switchyard-infra`.

pub mod error;
pub mod in_memory;
pub mod lock;
pub mod marker;
pub mod queue;

pub use error::StoreError;
pub use in_memory::{InMemoryFairQueue, InMemoryLocker, InMemoryMarker};
pub use lock::{LockToken, Locker};
pub use marker::{MARKER_TTL, Marker};
pub use queue::{FairQueue, enqueue};
