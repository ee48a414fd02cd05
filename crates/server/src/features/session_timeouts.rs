//! Resume flow sessions whose wait timed out.
//!
//! A fleet-wide cron scans for timed-out sessions and queues one
//! `timed_out_session` task per session on the handler queue. The dedup
//! marker keeps overlapping or repeated scans from queueing the same
//! timeout twice; the handler hands the session back to the flow engine.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use switchyard_core::{Priority, Task, TenantId};
use switchyard_infra::{CronScheduler, CronScope, HandlerRegistry, RegistryError, Runtime, TaskHandler};

use crate::app::HANDLER_QUEUE;

pub const TASK_TYPE: &str = "timed_out_session";
pub const CRON_NAME: &str = "session_timeouts";
pub const MARKER_GROUP: &str = "session_timeouts";

const SCAN_INTERVAL: Duration = Duration::from_secs(60);
const SCAN_LIMIT: usize = 1_000;
const HANDLER_TIMEOUT: Duration = Duration::from_secs(60);

/// Task payload: one session whose wait expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedOutSession {
    pub session_id: i64,
    pub timeout_on: DateTime<Utc>,
}

impl TimedOutSession {
    /// Marker id: a session can time out more than once, each wait is its
    /// own event.
    pub fn marker_id(&self) -> String {
        format!("{}:{}", self.session_id, self.timeout_on.timestamp())
    }
}

/// The flow engine's view of waiting sessions.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    /// Sessions whose timeout is at or before `now`, at most `limit`.
    async fn timed_out(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<(TenantId, TimedOutSession)>>;

    /// Continue `session` past its timeout.
    async fn resume(&self, tenant_id: TenantId, session: &TimedOutSession) -> anyhow::Result<()>;
}

/// Scan for timed-out sessions and queue the ones not already queued.
///
/// Returns how many tasks were queued.
pub async fn queue_timed_out(rt: &Runtime, sessions: &dyn SessionStore) -> anyhow::Result<usize> {
    let due = sessions
        .timed_out(Utc::now(), SCAN_LIMIT)
        .await
        .context("error selecting timed out sessions")?;

    let mut queued = 0;
    for (tenant_id, session) in due {
        let marker_id = session.marker_id();
        if rt.marker.has(MARKER_GROUP, &marker_id).await? {
            debug!(session_id = session.session_id, "session timeout already queued");
            continue;
        }

        rt.enqueue(HANDLER_QUEUE, TASK_TYPE, tenant_id, &session, Priority::Default)
            .await
            .context("error queueing timed out session")?;
        rt.marker.add(MARKER_GROUP, &marker_id).await?;
        queued += 1;
    }

    if queued > 0 {
        info!(queued, "queued timed out sessions");
    }
    Ok(queued)
}

struct ResumeSession {
    sessions: Arc<dyn SessionStore>,
}

#[async_trait]
impl TaskHandler for ResumeSession {
    async fn handle(&self, rt: Arc<Runtime>, task: Task) -> anyhow::Result<()> {
        let session: TimedOutSession = task
            .decode_payload()
            .context("error decoding timed out session")?;

        if let Err(err) = self.sessions.resume(task.tenant_id, &session).await {
            // Let the next scan queue it again.
            rt.marker.remove(MARKER_GROUP, &session.marker_id()).await?;
            return Err(err.context(format!("error resuming session {}", session.session_id)));
        }
        Ok(())
    }
}

pub fn register(
    registry: &mut HandlerRegistry,
    sessions: Arc<dyn SessionStore>,
) -> Result<(), RegistryError> {
    registry.register(TASK_TYPE, HANDLER_TIMEOUT, ResumeSession { sessions })
}

pub fn start(cron: &CronScheduler, sessions: Arc<dyn SessionStore>) {
    cron.start_cron(CRON_NAME, SCAN_INTERVAL, CronScope::FleetWide, move |rt| {
        let sessions = Arc::clone(&sessions);
        async move { queue_timed_out(&rt, sessions.as_ref()).await.map(|_| ()) }
    });
}

#[derive(Debug, Default)]
struct Sessions {
    waiting: Vec<(TenantId, TimedOutSession)>,
    resumed: Vec<(TenantId, i64)>,
}

/// In-memory session store for standalone runs and tests.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    inner: Mutex<Sessions>,
}

impl InMemorySessionStore {
    /// Park `session_id` for `tenant_id` until `timeout_on`.
    pub fn wait(&self, tenant_id: TenantId, session_id: i64, timeout_on: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.waiting.push((
            tenant_id,
            TimedOutSession {
                session_id,
                timeout_on,
            },
        ));
    }

    /// Sessions resumed so far, in order.
    pub fn resumed(&self) -> Vec<(TenantId, i64)> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .resumed
            .clone()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn timed_out(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<(TenantId, TimedOutSession)>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(inner
            .waiting
            .iter()
            .filter(|(_, s)| s.timeout_on <= now)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn resume(&self, tenant_id: TenantId, session: &TimedOutSession) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = inner.waiting.len();
        inner
            .waiting
            .retain(|(t, s)| !(*t == tenant_id && s == session));
        if inner.waiting.len() == before {
            anyhow::bail!("session {} is not waiting", session.session_id);
        }
        inner.resumed.push((tenant_id, session.session_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchyard_infra::Config;
    use switchyard_infra::tasks::{TaskOutcome, execute};

    fn runtime() -> Arc<Runtime> {
        Arc::new(Runtime::in_memory(Config::default()))
    }

    fn registry(sessions: Arc<dyn SessionStore>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::new();
        register(&mut registry, sessions).unwrap();
        registry
    }

    #[test]
    fn marker_id_distinguishes_repeated_waits() {
        let first = TimedOutSession {
            session_id: 42,
            timeout_on: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };
        let second = TimedOutSession {
            timeout_on: DateTime::from_timestamp(1_700_000_600, 0).unwrap(),
            ..first.clone()
        };
        assert_eq!(first.marker_id(), "42:1700000000");
        assert_ne!(first.marker_id(), second.marker_id());
    }

    #[tokio::test]
    async fn repeated_scans_queue_each_timeout_once() {
        let rt = runtime();
        let sessions = InMemorySessionStore::default();
        sessions.wait(TenantId::new(7), 1, Utc::now() - chrono::Duration::minutes(1));
        sessions.wait(TenantId::new(7), 2, Utc::now() + chrono::Duration::hours(1));

        assert_eq!(queue_timed_out(&rt, &sessions).await.unwrap(), 1);
        assert_eq!(queue_timed_out(&rt, &sessions).await.unwrap(), 0);
        assert_eq!(rt.queue.size(HANDLER_QUEUE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn handler_resumes_the_session() {
        let rt = runtime();
        let sessions = Arc::new(InMemorySessionStore::default());
        sessions.wait(TenantId::new(3), 9, Utc::now() - chrono::Duration::seconds(5));
        queue_timed_out(&rt, sessions.as_ref()).await.unwrap();

        let task = rt.queue.pop(HANDLER_QUEUE).await.unwrap().unwrap();
        assert_eq!(task.task_type, TASK_TYPE);

        let outcome = execute(&registry(sessions.clone()), &rt, task).await;
        assert!(outcome.is_success(), "{outcome:?}");
        assert_eq!(sessions.resumed(), vec![(TenantId::new(3), 9)]);
    }

    #[tokio::test]
    async fn failed_resume_makes_the_timeout_queueable_again() {
        let rt = runtime();
        let sessions = Arc::new(InMemorySessionStore::default());
        let timeout_on = Utc::now() - chrono::Duration::seconds(5);
        sessions.wait(TenantId::new(3), 9, timeout_on);
        queue_timed_out(&rt, sessions.as_ref()).await.unwrap();
        let task = rt.queue.pop(HANDLER_QUEUE).await.unwrap().unwrap();

        // Engine lost the session between scan and resume.
        sessions
            .resume(
                TenantId::new(3),
                &TimedOutSession {
                    session_id: 9,
                    timeout_on,
                },
            )
            .await
            .unwrap();

        let outcome = execute(&registry(sessions.clone()), &rt, task).await;
        assert!(matches!(outcome, TaskOutcome::Failed(_)));

        let marker_id = TimedOutSession {
            session_id: 9,
            timeout_on,
        }
        .marker_id();
        assert!(!rt.marker.has(MARKER_GROUP, &marker_id).await.unwrap());
    }
}
