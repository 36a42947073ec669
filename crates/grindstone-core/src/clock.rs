//! Epoch boundary arithmetic.
//!
//! An application's counters are scoped to the interval between two
//! consecutive crossings of its `reset_time` anchor. Nothing here ticks:
//! resets are evaluated lazily at read time, so crossing the boundary any
//! number of times before the next read still produces a single reset.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc, Weekday};

/// Parse a "HH:MM" reset anchor. Returns `None` for anything malformed.
pub fn parse_reset_time(s: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M").ok()
}

/// The most recent boundary at or before `now`.
pub fn last_boundary(now: DateTime<Utc>, reset: NaiveTime) -> DateTime<Utc> {
    let today = now.date_naive().and_time(reset).and_utc();
    if today <= now {
        today
    } else {
        today - Duration::days(1)
    }
}

/// Whether a boundary lies in `(last_reset, now]`. A pair that has never
/// been reset (`last_reset = None`) is always due.
pub fn crossed_since(last_reset: Option<DateTime<Utc>>, now: DateTime<Utc>, reset: NaiveTime) -> bool {
    let boundary = last_boundary(now, reset);
    match last_reset {
        Some(last) => boundary > last,
        None => true,
    }
}

/// Whether a boundary instant opens the weekly epoch. Weekly task
/// completions clear only on these crossings.
pub fn is_week_start(boundary: DateTime<Utc>) -> bool {
    boundary.weekday() == Weekday::Mon
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_reset_time() {
        assert_eq!(parse_reset_time("04:00"), NaiveTime::from_hms_opt(4, 0, 0));
        assert_eq!(parse_reset_time(" 23:59 "), NaiveTime::from_hms_opt(23, 59, 0));
        assert!(parse_reset_time("24:00").is_none());
        assert!(parse_reset_time("4am").is_none());
    }

    #[test]
    fn test_last_boundary_before_and_after_anchor() {
        let reset = parse_reset_time("04:00").unwrap();
        // At 03:00 today's anchor hasn't happened yet, boundary was yesterday.
        assert_eq!(last_boundary(at(2026, 3, 10, 3, 0), reset), at(2026, 3, 9, 4, 0));
        // At 05:00 today's anchor already passed.
        assert_eq!(last_boundary(at(2026, 3, 10, 5, 0), reset), at(2026, 3, 10, 4, 0));
    }

    #[test]
    fn test_crossed_since_is_idempotent() {
        let reset = parse_reset_time("04:00").unwrap();
        let before = at(2026, 3, 10, 3, 0);
        let after = at(2026, 3, 10, 5, 0);

        assert!(crossed_since(Some(before), after, reset));
        // Once the reset is stamped at the boundary, later reads within the
        // same epoch see no further crossing.
        let stamped = last_boundary(after, reset);
        assert!(!crossed_since(Some(stamped), after, reset));
        assert!(!crossed_since(Some(stamped), at(2026, 3, 11, 3, 59), reset));
        // Never reset: always due.
        assert!(crossed_since(None, after, reset));
    }

    #[test]
    fn test_multiple_crossings_single_reset() {
        let reset = parse_reset_time("04:00").unwrap();
        // Three days pass without a read; a single crossing check fires once.
        let last = at(2026, 3, 1, 4, 0);
        let now = at(2026, 3, 4, 12, 0);
        assert!(crossed_since(Some(last), now, reset));
        let stamped = last_boundary(now, reset);
        assert!(!crossed_since(Some(stamped), now, reset));
    }

    #[test]
    fn test_week_start() {
        let reset = parse_reset_time("04:00").unwrap();
        // 2026-03-09 is a Monday.
        assert!(is_week_start(last_boundary(at(2026, 3, 9, 5, 0), reset)));
        assert!(!is_week_start(last_boundary(at(2026, 3, 10, 5, 0), reset)));
    }
}
