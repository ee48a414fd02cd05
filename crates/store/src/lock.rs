//! Distributed lock abstraction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::StoreError;

/// Proof of ownership handed out by [`Locker::acquire`].
///
/// Release and extend compare this token against the stored value, so a
/// holder whose lock already expired (and was re-acquired by someone else)
/// cannot touch the new holder's lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(String);

impl LockToken {
    /// A fresh random token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for LockToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// TTL'd, ownership-checked mutual exclusion.
///
/// Acquisition is always a single attempt. There is deliberately no
/// "block until free" operation.
#[async_trait]
pub trait Locker: Send + Sync {
    /// Take `key` for `ttl` if nobody holds it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError>;

    /// Delete `key` if it is still held with `token`.
    ///
    /// Returns `false` (and does nothing) when the lock is gone or owned by
    /// someone else.
    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, StoreError>;

    /// Push the expiry of `key` to `ttl` from now if it is still held with
    /// `token`.
    async fn extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool, StoreError>;
}
