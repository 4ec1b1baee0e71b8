//! Next-run computation.

use std::borrow::Cow;
use std::str::FromStr;

use chrono::{Local, TimeZone};
use chrono_tz::Tz;

use crate::types::Schedule;

/// Current wall-clock time in unix millis.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Compute the next fire time strictly after `now_ms`.
///
/// Returns `None` when the schedule will not fire again: a past `at`, a
/// non-positive interval, a missing field, or a cron expression or timezone
/// that does not parse.
pub fn compute_next_run(schedule: &Schedule, now_ms: i64) -> Option<i64> {
    match schedule {
        Schedule::At { at_ms } => at_ms.filter(|at| *at > now_ms),
        Schedule::Every { every_ms } => every_ms
            .filter(|every| *every > 0)
            .and_then(|every| now_ms.checked_add(every)),
        Schedule::Cron { expr, tz } => next_cron_run(expr.as_deref()?, tz.as_deref(), now_ms),
    }
}

/// Whether `expr` (and `tz`, if given) parse.
pub fn validate_cron(expr: &str, tz: Option<&str>) -> Result<(), String> {
    cron::Schedule::from_str(&normalize_cron_expr(expr))
        .map_err(|e| format!("invalid cron expression '{expr}': {e}"))?;
    if let Some(tz) = tz {
        tz.parse::<Tz>()
            .map_err(|e| format!("invalid timezone '{tz}': {e}"))?;
    }
    Ok(())
}

fn next_cron_run(expr: &str, tz: Option<&str>, now_ms: i64) -> Option<i64> {
    let schedule = cron::Schedule::from_str(&normalize_cron_expr(expr)).ok()?;
    match tz {
        Some(tz) => {
            let tz: Tz = tz.parse().ok()?;
            next_after(&schedule, &tz, now_ms)
        }
        None => next_after(&schedule, &Local, now_ms),
    }
}

fn next_after<Z: TimeZone>(schedule: &cron::Schedule, tz: &Z, now_ms: i64) -> Option<i64> {
    let now = tz.timestamp_millis_opt(now_ms).single()?;
    schedule
        .after(&now)
        .next()
        .map(|next| next.timestamp_millis())
        .filter(|next| *next > now_ms)
}

/// Accept classic five-field expressions (`min hour dom mon dow`) by adding
/// the seconds field the `cron` crate expects.
fn normalize_cron_expr(expr: &str) -> Cow<'_, str> {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        Cow::Owned(format!("0 {expr}"))
    } else {
        Cow::Borrowed(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike, Utc};

    #[test]
    fn test_every_adds_interval() {
        let schedule = Schedule::every(5_000);
        for t in [0, 1, 1_700_000_000_000, -42] {
            assert_eq!(compute_next_run(&schedule, t), Some(t + 5_000));
        }
    }

    #[test]
    fn test_every_non_positive_never_fires() {
        assert_eq!(compute_next_run(&Schedule::every(0), 100), None);
        assert_eq!(compute_next_run(&Schedule::every(-1), 100), None);
        assert_eq!(
            compute_next_run(&Schedule::Every { every_ms: None }, 100),
            None
        );
    }

    #[test]
    fn test_at_only_in_future() {
        let schedule = Schedule::at(1_000);
        assert_eq!(compute_next_run(&schedule, 999), Some(1_000));
        assert_eq!(compute_next_run(&schedule, 1_000), None);
        assert_eq!(compute_next_run(&schedule, 5_000), None);
        assert_eq!(compute_next_run(&Schedule::At { at_ms: None }, 0), None);
    }

    #[test]
    fn test_invalid_cron_is_none() {
        for expr in ["not a cron", "", "61 * * * *", "* * *"] {
            let schedule = Schedule::cron(expr, None);
            assert_eq!(compute_next_run(&schedule, now_ms()), None, "{expr}");
        }
        assert_eq!(
            compute_next_run(&Schedule::Cron { expr: None, tz: None }, 0),
            None
        );
    }

    #[test]
    fn test_invalid_timezone_is_none() {
        let schedule = Schedule::cron("0 9 * * *", Some("Mars/Olympus".into()));
        assert_eq!(compute_next_run(&schedule, now_ms()), None);
    }

    #[test]
    fn test_five_field_cron_in_timezone() {
        // 2024-01-15T10:30:00Z
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let schedule = Schedule::cron("0 9 * * *", Some("UTC".into()));
        let next = compute_next_run(&schedule, now.timestamp_millis()).unwrap();
        let next = Utc.timestamp_millis_opt(next).unwrap();
        assert_eq!((next.day(), next.hour(), next.minute()), (16, 9, 0));
    }

    #[test]
    fn test_cron_respects_timezone_offset() {
        // 09:00 in Tokyo (UTC+9, no DST) is 00:00 UTC.
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let schedule = Schedule::cron("0 9 * * *", Some("Asia/Tokyo".into()));
        let next = compute_next_run(&schedule, now.timestamp_millis()).unwrap();
        let next = Utc.timestamp_millis_opt(next).unwrap();
        assert_eq!((next.day(), next.hour()), (2, 0));
    }

    #[test]
    fn test_six_field_cron_passthrough() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let schedule = Schedule::cron("30 * * * * *", Some("UTC".into()));
        let next = compute_next_run(&schedule, now.timestamp_millis()).unwrap();
        assert_eq!(next - now.timestamp_millis(), 30_000);
    }

    #[test]
    fn test_cron_next_is_strictly_after_now() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0).unwrap();
        let schedule = Schedule::cron("0 9 * * *", Some("UTC".into()));
        let next = compute_next_run(&schedule, now.timestamp_millis()).unwrap();
        assert!(next > now.timestamp_millis());
    }

    #[test]
    fn test_validate_cron() {
        assert!(validate_cron("*/5 * * * *", None).is_ok());
        assert!(validate_cron("0 9 * * *", Some("America/New_York")).is_ok());
        assert!(validate_cron("bogus", None).is_err());
        assert!(validate_cron("0 9 * * *", Some("Nowhere/City")).is_err());
    }
}
