use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

const MINUTE_MICROS: i64 = 60_000_000;

/// When a job that last fired (or was last due) at `last` is next due.
///
/// - under a minute: the next whole multiple of `interval` counted from the
///   top of `last`'s minute, never later than the top of the next minute
/// - exactly a minute: one second past the next minute
/// - longer: `last + interval`
///
/// Sub-minute and one-minute schedules therefore land on the same wall-clock
/// slots in every process.
pub fn next_fire(last: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let interval_micros = i64::try_from(interval.as_micros()).unwrap_or(i64::MAX).max(1);
    let into_minute = last.timestamp_micros().rem_euclid(MINUTE_MICROS);
    let minute_start = last - TimeDelta::microseconds(into_minute);

    if interval_micros < MINUTE_MICROS {
        let step = (into_minute / interval_micros + 1).saturating_mul(interval_micros);
        minute_start + TimeDelta::microseconds(step.min(MINUTE_MICROS))
    } else if interval_micros == MINUTE_MICROS {
        minute_start + TimeDelta::minutes(1) + TimeDelta::seconds(1)
    } else {
        TimeDelta::from_std(interval)
            .ok()
            .and_then(|interval| last.checked_add_signed(interval))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32, ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 2, h, m, s).unwrap() + TimeDelta::milliseconds(ms)
    }

    #[test]
    fn sub_minute_interval_snaps_to_the_next_multiple() {
        assert_eq!(next_fire(at(12, 0, 7, 300), Duration::from_secs(5)), at(12, 0, 10, 0));
        assert_eq!(next_fire(at(12, 0, 10, 0), Duration::from_secs(5)), at(12, 0, 15, 0));
        assert_eq!(
            next_fire(at(12, 0, 0, 100), Duration::from_millis(250)),
            at(12, 0, 0, 250)
        );
    }

    #[test]
    fn sub_minute_interval_is_capped_at_the_next_minute() {
        assert_eq!(next_fire(at(12, 0, 57, 0), Duration::from_secs(7)), at(12, 1, 0, 0));
        assert_eq!(next_fire(at(12, 0, 59, 999), Duration::from_secs(30)), at(12, 1, 0, 0));
    }

    #[test]
    fn one_minute_interval_fires_just_past_the_minute() {
        assert_eq!(next_fire(at(12, 0, 30, 0), Duration::from_secs(60)), at(12, 1, 1, 0));
        assert_eq!(next_fire(at(12, 1, 1, 0), Duration::from_secs(60)), at(12, 2, 1, 0));
    }

    #[test]
    fn longer_interval_adds_to_last() {
        assert_eq!(next_fire(at(12, 3, 17, 0), Duration::from_secs(300)), at(12, 8, 17, 0));
    }

    #[test]
    fn next_fire_is_always_after_last() {
        for ms in [0, 1, 249, 250, 59_999] {
            let last = at(9, 59, 0, ms);
            for interval in [1, 250, 1_000, 60_000, 90_000] {
                assert!(next_fire(last, Duration::from_millis(interval)) > last);
            }
        }
    }
}
