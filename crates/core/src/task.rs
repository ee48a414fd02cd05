//! Task and priority types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{TaskError, TaskResult};
use crate::id::{TaskId, TenantId};

/// Ten million seconds, expressed in microseconds.
const PRIORITY_OFFSET_MICROS: i64 = 10_000_000 * 1_000_000;

/// Priority of a task within its tenant's sub-queue.
///
/// Priority only reorders work *inside* one tenant. It never lets a tenant
/// jump ahead of other tenants in the rotation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    #[default]
    Default,
    Low,
}

impl Priority {
    /// Offset added to the enqueue time when scoring a task.
    pub const fn offset_micros(self) -> i64 {
        match self {
            Priority::High => -PRIORITY_OFFSET_MICROS,
            Priority::Default => 0,
            Priority::Low => PRIORITY_OFFSET_MICROS,
        }
    }
}

/// One unit of asynchronous work.
///
/// The payload is JSON owned by whichever handler is registered for
/// `task_type`; queues never look inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    #[serde(rename = "type")]
    pub task_type: String,
    pub tenant_id: TenantId,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub error_count: u32,
}

impl Task {
    /// Create a task stamped with the current time.
    pub fn new(
        task_type: impl Into<String>,
        tenant_id: TenantId,
        payload: serde_json::Value,
    ) -> Self {
        Self::new_at(task_type, tenant_id, payload, Utc::now())
    }

    pub fn new_at(
        task_type: impl Into<String>,
        tenant_id: TenantId,
        payload: serde_json::Value,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            task_type: task_type.into(),
            tenant_id,
            payload,
            enqueued_at,
            error_count: 0,
        }
    }

    /// Build a task from any serializable payload.
    pub fn with_payload<P: Serialize + ?Sized>(
        task_type: impl Into<String>,
        tenant_id: TenantId,
        payload: &P,
    ) -> TaskResult<Self> {
        let payload = serde_json::to_value(payload)?;
        Ok(Self::new(task_type, tenant_id, payload))
    }

    /// Decode the payload into the handler's own type.
    pub fn decode_payload<P: DeserializeOwned>(&self) -> TaskResult<P> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            TaskError::payload(format!("{} payload for task {}: {e}", self.task_type, self.id))
        })
    }

    /// Sort score within the tenant sub-queue: lower pops first.
    pub fn score(&self, priority: Priority) -> i64 {
        self.enqueued_at.timestamp_micros() + priority.offset_micros()
    }

    /// Serialize for storage in a shared backing store.
    pub fn encode(&self) -> TaskResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> TaskResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}
