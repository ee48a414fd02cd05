use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use switchyard_core::Task;

use crate::config::DEFAULT_IDLE_BACKOFF;
use crate::runtime::Runtime;
use crate::tasks::HandlerRegistry;

use super::stats::{PoolCounters, PoolStats, WorkerBoard, WorkerState};
use super::worker::Worker;

/// Foreman configuration.
#[derive(Debug, Clone)]
pub struct ForemanConfig {
    /// Named queue this pool drains
    pub queue: String,
    /// Number of workers (hard concurrency bound)
    pub pool_size: usize,
    /// Sleep after an empty or failed pop
    pub idle_backoff: Duration,
}

impl ForemanConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            pool_size: 4,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
        }
    }

    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }
}

/// Dispatcher for one named queue.
///
/// The foreman only pops a task once some worker has said it is free, so a
/// task never waits in process memory for a busy pool. It holds on to the
/// free worker across empty polls instead of asking again.
#[derive(Debug)]
pub struct Foreman;

impl Foreman {
    /// Spawn the worker pool and its dispatch loop on the current tokio
    /// runtime.
    pub fn start(
        rt: Arc<Runtime>,
        registry: Arc<HandlerRegistry>,
        config: ForemanConfig,
    ) -> ForemanHandle {
        let pool_size = config.pool_size.max(1);
        let dispatch_stop = CancellationToken::new();
        let worker_stop = CancellationToken::new();
        let workers = TaskTracker::new();
        let board = Arc::new(WorkerBoard::new(pool_size));
        let counters = Arc::new(PoolCounters::default());

        let (available_tx, available_rx) = mpsc::channel::<usize>(pool_size);
        let mut assignments = Vec::with_capacity(pool_size);

        for id in 0..pool_size {
            let (tx, rx) = mpsc::channel::<Task>(1);
            assignments.push(tx);

            let worker = Worker {
                id,
                queue: config.queue.clone(),
                rt: Arc::clone(&rt),
                registry: Arc::clone(&registry),
                board: Arc::clone(&board),
                counters: Arc::clone(&counters),
            };
            workers.spawn(worker.run(rx, available_tx.clone(), worker_stop.clone()));
        }
        drop(available_tx);
        workers.close();

        let assignments: Arc<[mpsc::Sender<Task>]> = assignments.into();
        let dispatcher = tokio::spawn(dispatch_loop(
            rt,
            config.queue.clone(),
            config.idle_backoff,
            available_rx,
            Arc::clone(&assignments),
            Arc::clone(&board),
            dispatch_stop.clone(),
        ));

        info!(queue = %config.queue, workers = pool_size, "foreman started");

        ForemanHandle {
            queue: config.queue,
            dispatch_stop,
            worker_stop,
            dispatcher: Some(dispatcher),
            workers,
            board,
            counters,
            _assignments: assignments,
        }
    }
}

/// Handle to control a running foreman and its workers.
///
/// Dropping the handle without calling [`ForemanHandle::stop`] leaves the
/// pool running detached.
#[derive(Debug)]
pub struct ForemanHandle {
    queue: String,
    dispatch_stop: CancellationToken,
    worker_stop: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
    workers: TaskTracker,
    board: Arc<WorkerBoard>,
    counters: Arc<PoolCounters>,
    // Keeps worker inboxes open after the dispatch loop exits, so workers
    // only stop on their own signal.
    _assignments: Arc<[mpsc::Sender<Task>]>,
}

impl ForemanHandle {
    pub fn queue(&self) -> &str {
        &self.queue
    }

    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot()
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        self.board.snapshot()
    }

    /// Stop popping new tasks. Running tasks are unaffected.
    pub async fn stop_dispatch(&mut self) {
        self.dispatch_stop.cancel();
        if let Some(dispatcher) = self.dispatcher.take() {
            if let Err(err) = dispatcher.await {
                error!(queue = %self.queue, error = %err, "foreman dispatch loop crashed");
            }
        }
    }

    /// Graceful shutdown: stop dispatch first, then let every worker finish
    /// its current task and wait for all of them.
    pub async fn stop(mut self) {
        self.stop_dispatch().await;
        self.worker_stop.cancel();
        self.workers.wait().await;
        info!(queue = %self.queue, "foreman stopped");
    }
}

async fn dispatch_loop(
    rt: Arc<Runtime>,
    queue: String,
    idle_backoff: Duration,
    mut available: mpsc::Receiver<usize>,
    assignments: Arc<[mpsc::Sender<Task>]>,
    board: Arc<WorkerBoard>,
    stop: CancellationToken,
) {
    let mut idle: Option<usize> = None;

    loop {
        let worker = match idle.take() {
            Some(worker) => worker,
            None => tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                next = available.recv() => match next {
                    Some(worker) => worker,
                    None => break,
                },
            },
        };
        if stop.is_cancelled() {
            break;
        }

        match rt.queue.pop(&queue).await {
            Ok(Some(task)) => {
                debug!(
                    queue = %queue,
                    worker,
                    task_type = %task.task_type,
                    tenant_id = %task.tenant_id,
                    task_id = %task.id,
                    "dispatching task"
                );
                board.set(worker, WorkerState::Assigned);
                hand_over(&rt, &queue, &assignments, worker, task).await;
            }
            Ok(None) => {
                idle = Some(worker);
                if backoff(&stop, idle_backoff).await {
                    break;
                }
            }
            Err(err) => {
                error!(queue = %queue, error = %err, "error popping task");
                idle = Some(worker);
                if backoff(&stop, idle_backoff).await {
                    break;
                }
            }
        }
    }

    debug!(queue = %queue, "foreman dispatch loop exited");
}

/// Give `task` to `worker`. The worker announced itself free, so its inbox
/// has room; if it is gone anyway the task is still completed so the
/// tenant's in-flight counter does not leak.
async fn hand_over(
    rt: &Runtime,
    queue: &str,
    assignments: &[mpsc::Sender<Task>],
    worker: usize,
    task: Task,
) {
    let Some(inbox) = assignments.get(worker) else {
        error!(queue, worker, "unknown worker id");
        complete_dropped(rt, queue, &task).await;
        return;
    };

    if let Err(err) = inbox.try_send(task) {
        let task = err.into_inner();
        error!(
            queue,
            worker,
            task_type = %task.task_type,
            tenant_id = %task.tenant_id,
            task_id = %task.id,
            "worker refused assignment, dropping task"
        );
        complete_dropped(rt, queue, &task).await;
    }
}

async fn complete_dropped(rt: &Runtime, queue: &str, task: &Task) {
    if let Err(err) = rt.queue.complete(queue, task.tenant_id).await {
        error!(queue, tenant_id = %task.tenant_id, error = %err, "error marking task complete");
    }
}

/// Sleep for `delay` unless stopped first. Returns true when stopped.
async fn backoff(stop: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = stop.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_sets_fields() {
        let config = ForemanConfig::new("handler")
            .with_pool_size(32)
            .with_idle_backoff(Duration::from_millis(10));
        assert_eq!(config.queue, "handler");
        assert_eq!(config.pool_size, 32);
        assert_eq!(config.idle_backoff, Duration::from_millis(10));
    }
}
