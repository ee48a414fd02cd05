//! Multi-tenant fair queue abstraction.
//!
//! ## Model
//!
//! Each named queue holds one sorted sub-queue per tenant (score = enqueue
//! time in microseconds plus a priority offset) and an **active rotation**
//! of tenants that currently have pending work. Every tenant in the rotation
//! carries an in-flight counter (tasks popped but not yet completed).
//!
//! `pop` serves the rotation head, ordered by:
//!
//! 1. lowest in-flight counter first
//! 2. longest since last served (a newly active tenant joins at the back)
//!
//! Popping bumps the tenant's counter and moves it to the back of the
//! rotation, so a single consumer serves tenants round robin even when it
//! completes every task before the next pop; under many consumers a tenant
//! with many running tasks yields to tenants with fewer. Queue depth never
//! buys a tenant extra turns.
//!
//! ## Atomicity
//!
//! "Pick head tenant, pop its lowest-score task, update rotation" is one
//! indivisible operation. Implementations must never split it into separate
//! client-side reads and writes.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use switchyard_core::{Priority, Task, TenantId};

use crate::error::StoreError;

/// A multi-tenant queue with round-robin-by-active-tenant fairness.
#[async_trait]
pub trait FairQueue: Send + Sync {
    /// Append `task` to its tenant's sub-queue and mark the tenant active.
    async fn push(&self, queue: &str, task: &Task, priority: Priority) -> Result<(), StoreError>;

    /// Pop the next fair task, or `None` when no active tenant has work.
    ///
    /// Tenants whose sub-queue turns out to be empty are dropped from the
    /// rotation inside the same operation; an empty result never hides work
    /// held by another tenant.
    async fn pop(&self, queue: &str) -> Result<Option<Task>, StoreError>;

    /// Signal that a popped task for `tenant_id` has finished.
    ///
    /// The in-flight counter is clamped at zero, so over-completing is
    /// harmless.
    async fn complete(&self, queue: &str, tenant_id: TenantId) -> Result<(), StoreError>;

    /// Total number of pending tasks across active tenants (metrics only).
    async fn size(&self, queue: &str) -> Result<usize, StoreError>;
}

/// Producer entry point: build a task from `payload` and push it.
///
/// Returns the task as queued so callers can log or correlate its id.
pub async fn enqueue<Q, P>(
    queue: &Q,
    queue_name: &str,
    task_type: &str,
    tenant_id: TenantId,
    payload: &P,
    priority: Priority,
) -> Result<Task, StoreError>
where
    Q: FairQueue + ?Sized,
    P: Serialize + Sync + ?Sized,
{
    let task = Task::with_payload(task_type, tenant_id, payload)?;
    queue.push(queue_name, &task, priority).await?;

    debug!(
        queue = queue_name,
        task_type,
        tenant_id = %tenant_id,
        task_id = %task.id,
        ?priority,
        "task enqueued"
    );

    Ok(task)
}
