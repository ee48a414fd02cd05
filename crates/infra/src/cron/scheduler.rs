use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::runtime::Runtime;
use crate::tasks::{millis, panic_message};

use super::schedule::next_fire;

/// Extra lock lifetime beyond a job's timeout.
pub const LOCK_GRACE: Duration = Duration::from_secs(30);

/// Floor for the default job timeout.
const MIN_DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Whether a cron job runs once across the fleet or once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CronScope {
    /// At most one process runs the job per slot.
    FleetWide,
    /// Every process runs the job each slot.
    PerInstance,
}

/// Lock key guarding a cron job.
pub fn lock_key(name: &str, scope: CronScope, instance_id: &str) -> String {
    match scope {
        CronScope::FleetWide => format!("cron:{name}"),
        CronScope::PerInstance => format!("cron:{name}:{instance_id}"),
    }
}

/// Default per-fire timeout: the interval, but never under a minute.
pub fn default_timeout(interval: Duration) -> Duration {
    interval.max(MIN_DEFAULT_TIMEOUT)
}

type BoxJob = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type CronFn = dyn Fn(Arc<Runtime>) -> BoxJob + Send + Sync;

struct CronJob {
    name: String,
    interval: Duration,
    timeout: Duration,
    lock_key: String,
    func: Arc<CronFn>,
}

/// Runs named periodic jobs, each guarded by a distributed lock.
///
/// A job never overlaps itself: the next fire is only scheduled after the
/// previous one returned. A fire that overruns its slot is followed by at
/// most one immediate catch-up fire; the remaining missed slots are skipped.
#[derive(Debug)]
pub struct CronScheduler {
    rt: Arc<Runtime>,
    stop: CancellationToken,
    tracker: TaskTracker,
}

impl CronScheduler {
    pub fn new(rt: Arc<Runtime>) -> Self {
        Self {
            rt,
            stop: CancellationToken::new(),
            tracker: TaskTracker::new(),
        }
    }

    /// Start `job` every `interval` with the default timeout.
    pub fn start_cron<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        scope: CronScope,
        job: F,
    ) where
        F: Fn(Arc<Runtime>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_cron_with_timeout(name, interval, scope, default_timeout(interval), job);
    }

    /// Start `job` every `interval`; each fire is aborted after `timeout`.
    pub fn start_cron_with_timeout<F, Fut>(
        &self,
        name: impl Into<String>,
        interval: Duration,
        scope: CronScope,
        timeout: Duration,
        job: F,
    ) where
        F: Fn(Arc<Runtime>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = name.into();
        let job = CronJob {
            lock_key: lock_key(&name, scope, &self.rt.config.instance_id),
            name,
            interval,
            timeout,
            func: Arc::new(move |rt: Arc<Runtime>| -> BoxJob { Box::pin(job(rt)) }),
        };

        info!(
            cron = %job.name,
            interval_ms = millis(interval),
            ?scope,
            "cron started"
        );
        self.tracker
            .spawn(cron_loop(Arc::clone(&self.rt), job, self.stop.clone()));
    }

    /// Stop every loop and wait for in-progress fires to finish.
    pub async fn stop(&self) {
        self.stop.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        info!("cron scheduler stopped");
    }
}

async fn cron_loop(rt: Arc<Runtime>, job: CronJob, stop: CancellationToken) {
    let mut wait = Duration::ZERO;

    loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        let started_at = Utc::now();
        fire(&rt, &job).await;

        // Slots missed while the fire ran are dropped, not replayed.
        let next = next_fire(started_at, job.interval);
        wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    }

    debug!(cron = %job.name, "cron loop exited");
}

/// One attempt: take the lock, run the job, always release.
async fn fire(rt: &Arc<Runtime>, job: &CronJob) {
    let lock_ttl = job.timeout + LOCK_GRACE;
    let token = match rt.locker.acquire(&job.lock_key, lock_ttl).await {
        Ok(Some(token)) => token,
        Ok(None) => {
            debug!(cron = %job.name, "cron lock held elsewhere, skipping");
            return;
        }
        Err(err) => {
            error!(cron = %job.name, error = %err, "error acquiring cron lock");
            return;
        }
    };

    let started = Instant::now();
    let mut run = tokio::spawn((job.func)(Arc::clone(rt)));

    match tokio::time::timeout(job.timeout, &mut run).await {
        Ok(Ok(Ok(()))) => debug!(
            cron = %job.name,
            elapsed_ms = millis(started.elapsed()),
            "cron job complete"
        ),
        Ok(Ok(Err(err))) => error!(cron = %job.name, error = ?err, "cron job failed"),
        Ok(Err(err)) if err.is_panic() => error!(
            cron = %job.name,
            panic = %panic_message(err.into_panic()),
            "cron job panicked"
        ),
        Ok(Err(err)) => error!(cron = %job.name, error = %err, "cron job cancelled"),
        Err(_) => {
            run.abort();
            error!(
                cron = %job.name,
                timeout_ms = millis(job.timeout),
                "cron job exceeded its timeout"
            );
        }
    }

    match rt.locker.release(&job.lock_key, &token).await {
        Ok(true) => {}
        Ok(false) => warn!(cron = %job.name, "cron lock expired before release"),
        Err(err) => error!(cron = %job.name, error = %err, "error releasing cron lock"),
    }
}
