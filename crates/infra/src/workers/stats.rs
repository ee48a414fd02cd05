use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;

use crate::tasks::TaskOutcome;

/// Lifecycle of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Waiting for the foreman to hand over a task.
    Idle,
    /// Picked by the foreman; task in transit.
    Assigned,
    Running,
    Stopped,
}

/// Point-in-time counters for one worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub panicked: u64,
    pub timed_out: u64,
    pub unhandled: u64,
    pub running: usize,
}

#[derive(Debug, Default)]
pub(crate) struct PoolCounters {
    processed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    timed_out: AtomicU64,
    unhandled: AtomicU64,
    running: AtomicUsize,
}

impl PoolCounters {
    pub(crate) fn started(&self) {
        self.running.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn finished(&self, outcome: &TaskOutcome) {
        let counter = match outcome {
            TaskOutcome::Succeeded => &self.succeeded,
            TaskOutcome::Failed(_) => &self.failed,
            TaskOutcome::Panicked(_) => &self.panicked,
            TaskOutcome::TimedOut(_) => &self.timed_out,
            TaskOutcome::Unhandled => &self.unhandled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.running.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStats {
        PoolStats {
            processed: self.processed.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            unhandled: self.unhandled.load(Ordering::Relaxed),
            running: self.running.load(Ordering::Relaxed),
        }
    }
}

/// Current state of every worker in a pool, indexed by worker id.
#[derive(Debug)]
pub(crate) struct WorkerBoard {
    states: Mutex<Vec<WorkerState>>,
}

impl WorkerBoard {
    pub(crate) fn new(workers: usize) -> Self {
        Self {
            states: Mutex::new(vec![WorkerState::Idle; workers]),
        }
    }

    pub(crate) fn set(&self, worker: usize, state: WorkerState) {
        let mut states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = states.get_mut(worker) {
            *slot = state;
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<WorkerState> {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
