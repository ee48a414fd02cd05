use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use switchyard_core::Task;

use crate::runtime::Runtime;
use crate::tasks::{self, HandlerRegistry, TaskOutcome};

use super::stats::{PoolCounters, WorkerBoard, WorkerState};

/// One execution slot of a pool. Runs at most one task at a time.
pub(crate) struct Worker {
    pub(crate) id: usize,
    pub(crate) queue: String,
    pub(crate) rt: Arc<Runtime>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) board: Arc<WorkerBoard>,
    pub(crate) counters: Arc<PoolCounters>,
}

impl Worker {
    /// Announce availability, wait for an assignment, process it, repeat.
    pub(crate) async fn run(
        self,
        mut assignments: mpsc::Receiver<Task>,
        available: mpsc::Sender<usize>,
        stop: CancellationToken,
    ) {
        debug!(queue = %self.queue, worker = self.id, "worker started");

        loop {
            self.board.set(self.id, WorkerState::Idle);

            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                sent = available.send(self.id) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }

            let task = tokio::select! {
                biased;
                task = assignments.recv() => match task {
                    Some(task) => task,
                    None => break,
                },
                _ = stop.cancelled() => break,
            };

            self.process(task).await;
        }

        // A task handed over right before the stop signal still gets run
        // and completed.
        assignments.close();
        while let Ok(task) = assignments.try_recv() {
            self.process(task).await;
        }

        self.board.set(self.id, WorkerState::Stopped);
        debug!(queue = %self.queue, worker = self.id, "worker stopped");
    }

    async fn process(&self, task: Task) {
        self.board.set(self.id, WorkerState::Running);
        self.counters.started();
        let started = Instant::now();

        let outcome = tasks::execute(&self.registry, &self.rt, task.clone()).await;
        self.log_outcome(&task, &outcome, started);

        // Exactly one complete per popped task, whatever the outcome.
        if let Err(err) = self.rt.queue.complete(&self.queue, task.tenant_id).await {
            error!(
                queue = %self.queue,
                tenant_id = %task.tenant_id,
                task_id = %task.id,
                error = %err,
                "error marking task complete"
            );
        }

        self.counters.finished(&outcome);
    }

    fn log_outcome(&self, task: &Task, outcome: &TaskOutcome, started: Instant) {
        let elapsed_ms = tasks::millis(started.elapsed());
        match outcome {
            TaskOutcome::Succeeded => debug!(
                queue = %self.queue,
                worker = self.id,
                task_type = %task.task_type,
                tenant_id = %task.tenant_id,
                task_id = %task.id,
                elapsed_ms,
                "task complete"
            ),
            TaskOutcome::Failed(err) => error!(
                queue = %self.queue,
                task_type = %task.task_type,
                tenant_id = %task.tenant_id,
                task_id = %task.id,
                payload = %task.payload,
                elapsed_ms,
                error = ?err,
                "task handler failed"
            ),
            TaskOutcome::Panicked(msg) => error!(
                queue = %self.queue,
                task_type = %task.task_type,
                tenant_id = %task.tenant_id,
                task_id = %task.id,
                payload = %task.payload,
                panic = %msg,
                "task handler panicked"
            ),
            TaskOutcome::TimedOut(timeout) => error!(
                queue = %self.queue,
                task_type = %task.task_type,
                tenant_id = %task.tenant_id,
                task_id = %task.id,
                timeout_ms = tasks::millis(*timeout),
                "task handler exceeded its timeout"
            ),
            TaskOutcome::Unhandled => error!(
                queue = %self.queue,
                task_type = %task.task_type,
                tenant_id = %task.tenant_id,
                task_id = %task.id,
                "no handler registered for task type"
            ),
        }
    }
}
