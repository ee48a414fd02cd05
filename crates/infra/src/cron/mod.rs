//! Lock-guarded periodic jobs.

mod schedule;
mod scheduler;

pub use schedule::next_fire;
pub use scheduler::{CronScheduler, CronScope, LOCK_GRACE, default_timeout, lock_key};
