use async_trait::async_trait;
use chrono::Utc;
use redis::Script;

use switchyard_store::marker::bucket_keys;
use switchyard_store::{MARKER_TTL, Marker, StoreError};

use super::RedisConnection;

/// KEYS: today, yesterday. ARGV: id.
const HAS: &str = r#"
for _, key in ipairs(KEYS) do
  if redis.call("SISMEMBER", key, ARGV[1]) == 1 then
    return 1
  end
end
return 0
"#;

/// Day-bucketed marker on Redis sets.
#[derive(Debug)]
pub struct RedisMarker {
    conn: RedisConnection,
    has: Script,
}

impl RedisMarker {
    pub fn new(conn: RedisConnection) -> Self {
        Self {
            conn,
            has: Script::new(HAS),
        }
    }

    fn keys(&self, group: &str) -> [String; 2] {
        bucket_keys(group, Utc::now()).map(|bucket| self.conn.key(&format!("marker:{bucket}")))
    }
}

#[async_trait]
impl Marker for RedisMarker {
    async fn has(&self, group: &str, id: &str) -> Result<bool, StoreError> {
        let [today, yesterday] = self.keys(group);
        let mut invocation = self.has.prepare_invoke();
        invocation.key(today).key(yesterday).arg(id);

        let mut conn = self.conn.manager();
        let found: i64 = self.conn.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(found == 1)
    }

    async fn add(&self, group: &str, id: &str) -> Result<(), StoreError> {
        let [today, _] = self.keys(group);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SADD")
            .arg(&today)
            .arg(id)
            .ignore()
            .cmd("EXPIRE")
            .arg(&today)
            .arg(MARKER_TTL.as_secs())
            .ignore();

        let mut conn = self.conn.manager();
        let () = self.conn.timed(pipe.query_async(&mut conn)).await?;
        Ok(())
    }

    async fn remove(&self, group: &str, id: &str) -> Result<(), StoreError> {
        let [today, yesterday] = self.keys(group);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("SREM")
            .arg(&today)
            .arg(id)
            .ignore()
            .cmd("SREM")
            .arg(&yesterday)
            .arg(id)
            .ignore();

        let mut conn = self.conn.manager();
        let () = self.conn.timed(pipe.query_async(&mut conn)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::test_support;

    #[tokio::test]
    #[ignore = "needs a live Redis at REDIS_URL"]
    async fn add_has_remove() {
        let marker = RedisMarker::new(test_support::connect().await);

        assert!(!marker.has("session_timeouts", "42:1700000000").await.unwrap());
        marker.add("session_timeouts", "42:1700000000").await.unwrap();
        assert!(marker.has("session_timeouts", "42:1700000000").await.unwrap());
        assert!(!marker.has("other_group", "42:1700000000").await.unwrap());

        marker.remove("session_timeouts", "42:1700000000").await.unwrap();
        assert!(!marker.has("session_timeouts", "42:1700000000").await.unwrap());
    }
}
