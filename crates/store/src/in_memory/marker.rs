use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use switchyard_core::{Clock, SystemClock};

use crate::error::StoreError;
use crate::marker::{MARKER_TTL, Marker, bucket_keys};

#[derive(Debug, Default)]
struct Bucket {
    ids: HashSet<String>,
    expires_at: Option<DateTime<Utc>>,
}

impl Bucket {
    fn live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at > now)
    }
}

/// In-memory marker keyed by day bucket.
#[derive(Debug)]
pub struct InMemoryMarker {
    clock: Arc<dyn Clock>,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl InMemoryMarker {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMarker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Marker for InMemoryMarker {
    async fn has(&self, group: &str, id: &str) -> Result<bool, StoreError> {
        let now = self.clock.now();
        let buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;

        Ok(bucket_keys(group, now).iter().any(|key| {
            buckets
                .get(key)
                .is_some_and(|b| b.live(now) && b.ids.contains(id))
        }))
    }

    async fn add(&self, group: &str, id: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let [today, _] = bucket_keys(group, now);
        let mut buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;

        // Purge expired buckets so a long-lived process does not accumulate
        // one set per day forever.
        buckets.retain(|_, b| b.live(now));

        let bucket = buckets.entry(today).or_default();
        bucket.ids.insert(id.to_string());
        bucket.expires_at = chrono::Duration::from_std(MARKER_TTL)
            .ok()
            .map(|ttl| now + ttl);
        Ok(())
    }

    async fn remove(&self, group: &str, id: &str) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock().map_err(|_| StoreError::Poisoned)?;

        for key in bucket_keys(group, now) {
            if let Some(bucket) = buckets.get_mut(&key) {
                bucket.ids.remove(id);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use switchyard_core::ManualClock;

    fn marker_at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> (Arc<ManualClock>, InMemoryMarker) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap(),
        ));
        let marker = InMemoryMarker::with_clock(clock.clone());
        (clock, marker)
    }

    #[tokio::test]
    async fn add_then_has_is_scoped_to_the_group() {
        let marker = InMemoryMarker::new();
        marker.add("timeouts", "X").await.unwrap();

        assert!(marker.has("timeouts", "X").await.unwrap());
        assert!(!marker.has("expirations", "X").await.unwrap());
        assert!(!marker.has("timeouts", "Y").await.unwrap());
    }

    #[tokio::test]
    async fn entry_survives_the_day_boundary() {
        let (clock, marker) = marker_at(2026, 5, 10, 23, 59, 50);
        marker.add("timeouts", "X").await.unwrap();

        clock.advance(chrono::Duration::seconds(20));
        assert!(marker.has("timeouts", "X").await.unwrap());
    }

    #[tokio::test]
    async fn entry_is_gone_once_the_bucket_expires() {
        let (clock, marker) = marker_at(2026, 5, 10, 8, 0, 0);
        marker.add("timeouts", "X").await.unwrap();

        clock.advance(chrono::Duration::hours(23));
        assert!(marker.has("timeouts", "X").await.unwrap());

        clock.advance(chrono::Duration::hours(2));
        assert!(!marker.has("timeouts", "X").await.unwrap());
    }

    #[tokio::test]
    async fn remove_forgets_both_buckets() {
        let (clock, marker) = marker_at(2026, 5, 10, 23, 0, 0);
        marker.add("timeouts", "X").await.unwrap();
        clock.advance(chrono::Duration::hours(2));
        marker.add("timeouts", "X").await.unwrap();

        marker.remove("timeouts", "X").await.unwrap();
        assert!(!marker.has("timeouts", "X").await.unwrap());
    }
}
