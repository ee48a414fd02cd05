use async_trait::async_trait;
use redis::Script;
use tracing::instrument;

use switchyard_core::{Priority, Task, TenantId};
use switchyard_store::{FairQueue, StoreError};

use super::RedisConnection;

/// KEYS: tenant zset, active, turn, seq. ARGV: score, task json, tenant.
const PUSH: &str = r#"
redis.call("ZADD", KEYS[1], ARGV[1], ARGV[2])
if redis.call("ZADD", KEYS[2], "NX", 0, ARGV[3]) == 1 then
  redis.call("HSET", KEYS[3], ARGV[3], redis.call("INCR", KEYS[4]))
end
return 1
"#;

/// KEYS: active, turn, seq. ARGV: tenant key prefix.
///
/// Head = lowest in-flight score; ties go to the lowest turn. A served
/// tenant takes a fresh turn. Tenants found empty are dropped and the search
/// continues.
const POP: &str = r#"
while true do
  local head = redis.call("ZRANGE", KEYS[1], 0, 0, "WITHSCORES")
  if #head == 0 then
    return false
  end
  local tied = redis.call("ZRANGEBYSCORE", KEYS[1], head[2], head[2])
  local tenant = tied[1]
  local best = tonumber(redis.call("HGET", KEYS[2], tenant) or "0")
  for i = 2, #tied do
    local turn = tonumber(redis.call("HGET", KEYS[2], tied[i]) or "0")
    if turn < best then
      tenant = tied[i]
      best = turn
    end
  end
  local popped = redis.call("ZPOPMIN", ARGV[1] .. tenant)
  if #popped > 0 then
    redis.call("ZINCRBY", KEYS[1], 1, tenant)
    redis.call("HSET", KEYS[2], tenant, redis.call("INCR", KEYS[3]))
    return popped[1]
  end
  redis.call("ZREM", KEYS[1], tenant)
  redis.call("HDEL", KEYS[2], tenant)
end
"#;

/// KEYS: active. ARGV: tenant.
const COMPLETE: &str = r#"
local score = redis.call("ZSCORE", KEYS[1], ARGV[1])
if not score then
  return 0
end
if tonumber(score) >= 1 then
  redis.call("ZINCRBY", KEYS[1], -1, ARGV[1])
else
  redis.call("ZADD", KEYS[1], "XX", 0, ARGV[1])
end
return 1
"#;

/// KEYS: active. ARGV: tenant key prefix.
const SIZE: &str = r#"
local total = 0
for _, tenant in ipairs(redis.call("ZRANGE", KEYS[1], 0, -1)) do
  total = total + redis.call("ZCARD", ARGV[1] .. tenant)
end
return total
"#;

/// Fair queue on Redis sorted sets.
#[derive(Debug)]
pub struct RedisFairQueue {
    conn: RedisConnection,
    push: Script,
    pop: Script,
    complete: Script,
    size: Script,
}

struct QueueKeys {
    active: String,
    turn: String,
    seq: String,
    tenant_prefix: String,
}

impl QueueKeys {
    fn tenant(&self, tenant_id: TenantId) -> String {
        format!("{}{tenant_id}", self.tenant_prefix)
    }
}

impl RedisFairQueue {
    pub fn new(conn: RedisConnection) -> Self {
        Self {
            conn,
            push: Script::new(PUSH),
            pop: Script::new(POP),
            complete: Script::new(COMPLETE),
            size: Script::new(SIZE),
        }
    }

    fn keys(&self, queue: &str) -> QueueKeys {
        let base = self.conn.key(&format!("queue:{queue}"));
        QueueKeys {
            active: format!("{base}:active"),
            turn: format!("{base}:turn"),
            seq: format!("{base}:seq"),
            tenant_prefix: format!("{base}:tenant:"),
        }
    }
}

#[async_trait]
impl FairQueue for RedisFairQueue {
    #[instrument(skip(self, task), fields(task_id = %task.id, tenant_id = %task.tenant_id), err)]
    async fn push(&self, queue: &str, task: &Task, priority: Priority) -> Result<(), StoreError> {
        let keys = self.keys(queue);
        let member = task.encode()?;

        let mut invocation = self.push.prepare_invoke();
        invocation
            .key(keys.tenant(task.tenant_id))
            .key(&keys.active)
            .key(&keys.turn)
            .key(&keys.seq)
            .arg(task.score(priority))
            .arg(member)
            .arg(task.tenant_id.get());

        let mut conn = self.conn.manager();
        let _: i64 = self.conn.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn pop(&self, queue: &str) -> Result<Option<Task>, StoreError> {
        let keys = self.keys(queue);

        let mut invocation = self.pop.prepare_invoke();
        invocation
            .key(&keys.active)
            .key(&keys.turn)
            .key(&keys.seq)
            .arg(&keys.tenant_prefix);

        let mut conn = self.conn.manager();
        let member: Option<String> = self.conn.timed(invocation.invoke_async(&mut conn)).await?;

        member
            .map(|json| Task::decode(&json).map_err(|e| StoreError::Corrupt(e.to_string())))
            .transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id), err)]
    async fn complete(&self, queue: &str, tenant_id: TenantId) -> Result<(), StoreError> {
        let keys = self.keys(queue);

        let mut invocation = self.complete.prepare_invoke();
        invocation.key(&keys.active).arg(tenant_id.get());

        let mut conn = self.conn.manager();
        let _: i64 = self.conn.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(())
    }

    async fn size(&self, queue: &str) -> Result<usize, StoreError> {
        let keys = self.keys(queue);

        let mut invocation = self.size.prepare_invoke();
        invocation.key(&keys.active).arg(&keys.tenant_prefix);

        let mut conn = self.conn.manager();
        let total: i64 = self.conn.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(usize::try_from(total).unwrap_or(0))
    }
}
