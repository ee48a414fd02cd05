use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use switchyard_core::{Clock, SystemClock};

use crate::error::StoreError;
use crate::lock::{LockToken, Locker};

#[derive(Debug, Clone)]
struct Held {
    token: LockToken,
    expires_at: DateTime<Utc>,
}

/// In-memory locker. Expiry is evaluated lazily against the injected clock.
#[derive(Debug)]
pub struct InMemoryLocker {
    clock: Arc<dyn Clock>,
    held: Mutex<HashMap<String, Held>>,
}

impl InMemoryLocker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            held: Mutex::new(HashMap::new()),
        }
    }

    fn expiry(&self, ttl: Duration) -> DateTime<Utc> {
        let now = self.clock.now();
        chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl Default for InMemoryLocker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Locker for InMemoryLocker {
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockToken>, StoreError> {
        let now = self.clock.now();
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;

        if held.get(key).is_some_and(|h| h.expires_at > now) {
            return Ok(None);
        }

        let token = LockToken::generate();
        held.insert(
            key.to_string(),
            Held {
                token: token.clone(),
                expires_at: self.expiry(ttl),
            },
        );
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;

        match held.get(key) {
            Some(h) if h.expires_at <= now => {
                held.remove(key);
                Ok(false)
            }
            Some(h) if &h.token == token => {
                held.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(&self, key: &str, token: &LockToken, ttl: Duration) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let expires_at = self.expiry(ttl);
        let mut held = self.held.lock().map_err(|_| StoreError::Poisoned)?;

        match held.get_mut(key) {
            Some(h) if h.expires_at > now && &h.token == token => {
                h.expires_at = expires_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
