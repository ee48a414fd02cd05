//! Day-bucketed dedup marker.
//!
//! A marker answers "has this logical event already been scheduled?" for a
//! short window. It absorbs re-runs of a periodic scan (retry, overlap,
//! restart) but is **not** an exactly-once barrier: two concurrent scans can
//! both see `has == false`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::error::StoreError;

/// How long a day bucket lives after its last write.
pub const MARKER_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[async_trait]
pub trait Marker: Send + Sync {
    /// True if `id` is in today's or yesterday's (UTC) bucket for `group`.
    async fn has(&self, group: &str, id: &str) -> Result<bool, StoreError>;

    /// Record `id` in today's bucket and refresh the bucket's expiry.
    async fn add(&self, group: &str, id: &str) -> Result<(), StoreError>;

    /// Forget `id` in both buckets.
    async fn remove(&self, group: &str, id: &str) -> Result<(), StoreError>;
}

/// Storage key of the bucket holding `group` entries for `day`.
pub fn bucket_key(group: &str, day: NaiveDate) -> String {
    format!("{group}:{}", day.format("%Y-%m-%d"))
}

/// Today's and yesterday's bucket keys, in that order.
pub fn bucket_keys(group: &str, now: DateTime<Utc>) -> [String; 2] {
    let today = now.date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);
    [bucket_key(group, today), bucket_key(group, yesterday)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bucket_keys_straddle_midnight() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 5).unwrap();
        let [today, yesterday] = bucket_keys("timeouts", now);
        assert_eq!(today, "timeouts:2026-03-01");
        assert_eq!(yesterday, "timeouts:2026-02-28");
    }
}
