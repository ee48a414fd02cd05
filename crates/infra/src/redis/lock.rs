use std::time::Duration;

use async_trait::async_trait;
use redis::Script;

use switchyard_store::{LockToken, Locker, StoreError};

use super::RedisConnection;

/// KEYS: lock. ARGV: token.
const RELEASE: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("DEL", KEYS[1])
end
return 0
"#;

/// KEYS: lock. ARGV: token, ttl ms.
const EXTEND: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
  return redis.call("PEXPIRE", KEYS[1], ARGV[2])
end
return 0
"#;

/// `SET NX PX` locker with owner-checked release and extend.
#[derive(Debug)]
pub struct RedisLocker {
    conn: RedisConnection,
    release: Script,
    extend: Script,
}

impl RedisLocker {
    pub fn new(conn: RedisConnection) -> Self {
        Self {
            conn,
            release: Script::new(RELEASE),
            extend: Script::new(EXTEND),
        }
    }

    fn key(&self, key: &str) -> String {
        self.conn.key(&format!("lock:{key}"))
    }
}

/// Redis rejects a zero PX.
fn ttl_millis(ttl: Duration) -> u64 {
    crate::tasks::millis(ttl).max(1)
}

#[async_trait]
impl Locker for RedisLocker {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let token = LockToken::generate();
        let mut cmd = redis::cmd("SET");
        cmd.arg(self.key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl));

        let mut conn = self.conn.manager();
        let reply: Option<String> = self.conn.timed(cmd.query_async(&mut conn)).await?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, StoreError> {
        let mut invocation = self.release.prepare_invoke();
        invocation.key(self.key(key)).arg(token.as_str());

        let mut conn = self.conn.manager();
        let deleted: i64 = self.conn.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(deleted == 1)
    }

    async fn extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool, StoreError> {
        let mut invocation = self.extend.prepare_invoke();
        invocation
            .key(self.key(key))
            .arg(token.as_str())
            .arg(ttl_millis(ttl));

        let mut conn = self.conn.manager();
        let extended: i64 = self.conn.timed(invocation.invoke_async(&mut conn)).await?;
        Ok(extended == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::redis::test_support;

    #[test]
    fn ttl_never_rounds_to_zero() {
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::from_secs(90)), 90_000);
    }

    #[tokio::test]
    #[ignore = "needs a live Redis at REDIS_URL"]
    async fn lock_is_exclusive_and_owner_checked() {
        let locker = RedisLocker::new(test_support::connect().await);
        let ttl = Duration::from_secs(30);

        let token = locker.acquire("cron:expire", ttl).await.unwrap().unwrap();
        assert!(locker.acquire("cron:expire", ttl).await.unwrap().is_none());

        assert!(!locker.release("cron:expire", &LockToken::generate()).await.unwrap());
        assert!(locker.extend("cron:expire", &token, ttl).await.unwrap());
        assert!(locker.release("cron:expire", &token).await.unwrap());
        assert!(locker.acquire("cron:expire", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore = "needs a live Redis at REDIS_URL"]
    async fn lock_expires_on_its_own() {
        let locker = RedisLocker::new(test_support::connect().await);
        let stale = locker
            .acquire("k", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();

        tokio::time::sleep(Duration::from_millis(120)).await;
        let fresh = locker.acquire("k", Duration::from_secs(5)).await.unwrap();
        assert!(fresh.is_some());
        assert!(!locker.release("k", &stale).await.unwrap());
    }
}
