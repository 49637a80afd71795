//! Lightweight cron expression parser for the periodic run.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds, UTC)
//! Per field: *, */N, N, A-B, A-B/N and comma lists of those.
//! Example: "0 9 * * *" = every day at 09:00 UTC
//!
//! DOM and DOW follow the usual cron rule: when both are restricted, a day
//! matches if either does.

use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use dripline_core::{DriplineError, Result};

/// Upper bound on the search for the next match.
const MAX_LOOKAHEAD_DAYS: i64 = 366 * 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    expression: String,
    minutes: BTreeSet<u32>,
    hours: BTreeSet<u32>,
    days_of_month: BTreeSet<u32>,
    months: BTreeSet<u32>,
    days_of_week: BTreeSet<u32>,
    dom_any: bool,
    dow_any: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(DriplineError::Configuration(format!(
                "Invalid cron expression: '{expression}' (need 5 fields: MIN HOUR DOM MON DOW)"
            )));
        }
        let field = |i: usize, min: u32, max: u32| {
            parse_field(parts[i], min, max).ok_or_else(|| {
                DriplineError::Configuration(format!(
                    "Invalid cron field '{}' in '{expression}'",
                    parts[i]
                ))
            })
        };

        // Sunday may be written as 0 or 7.
        let days_of_week = field(4, 0, 7)?
            .into_iter()
            .map(|d| if d == 7 { 0 } else { d })
            .collect();

        Ok(Self {
            expression: expression.to_string(),
            minutes: field(0, 0, 59)?,
            hours: field(1, 0, 23)?,
            days_of_month: field(2, 1, 31)?,
            months: field(3, 1, 12)?,
            days_of_week,
            dom_any: parts[2] == "*",
            dow_any: parts[4] == "*",
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    fn day_matches(&self, t: DateTime<Utc>) -> bool {
        if !self.months.contains(&t.month()) {
            return false;
        }
        let dom = self.days_of_month.contains(&t.day());
        let dow = self.days_of_week.contains(&t.weekday().num_days_from_sunday());
        match (self.dom_any, self.dow_any) {
            (true, true) => true,
            (false, true) => dom,
            (true, false) => dow,
            (false, false) => dom || dow,
        }
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let limit = start + Duration::days(MAX_LOOKAHEAD_DAYS);
        let mut candidate = start;

        while candidate < limit {
            if !self.day_matches(candidate) {
                let next_day = candidate.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?;
                candidate = next_day.and_utc();
                continue;
            }
            if !self.hours.contains(&candidate.hour()) {
                candidate = candidate.with_minute(0)? + Duration::hours(1);
                continue;
            }
            if self.minutes.contains(&candidate.minute()) {
                return Some(candidate);
            }
            candidate += Duration::minutes(1);
        }
        None
    }
}

/// Parse a cron field into the set of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<BTreeSet<u32>> {
    let mut values = BTreeSet::new();
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, s.parse::<u32>().ok().filter(|n| *n > 0)?),
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (a.parse().ok()?, b.parse().ok()?)
        } else {
            let n: u32 = range.parse().ok()?;
            // "N/step" runs from N to the field maximum.
            if step > 1 { (n, max) } else { (n, n) }
        };
        if lo < min || hi > max || lo > hi {
            return None;
        }
        values.extend((lo..=hi).step_by(step as usize));
    }
    if values.is_empty() { None } else { Some(values) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_every_hour() {
        let s = CronSchedule::parse("0 * * * *").unwrap();
        assert_eq!(s.next_after(at(2026, 2, 22, 10, 30)), Some(at(2026, 2, 22, 11, 0)));
    }

    #[test]
    fn test_daily_at_nine() {
        let s = CronSchedule::parse("0 9 * * *").unwrap();
        assert_eq!(s.next_after(at(2026, 2, 22, 7, 0)), Some(at(2026, 2, 22, 9, 0)));
        assert_eq!(s.next_after(at(2026, 2, 22, 9, 0)), Some(at(2026, 2, 23, 9, 0)));
    }

    #[test]
    fn test_every_15_minutes() {
        let s = CronSchedule::parse("*/15 * * * *").unwrap();
        assert_eq!(s.next_after(at(2026, 2, 22, 10, 2)), Some(at(2026, 2, 22, 10, 15)));
    }

    #[test]
    fn test_weekdays_only() {
        // 2026-02-21 is a Saturday.
        let s = CronSchedule::parse("30 8 * * 1-5").unwrap();
        assert_eq!(s.next_after(at(2026, 2, 21, 12, 0)), Some(at(2026, 2, 23, 8, 30)));
    }

    #[test]
    fn test_month_and_day() {
        let s = CronSchedule::parse("0 0 1 6 *").unwrap();
        assert_eq!(s.next_after(at(2026, 2, 22, 0, 0)), Some(at(2026, 6, 1, 0, 0)));
    }

    #[test]
    fn test_sunday_as_seven() {
        let s = CronSchedule::parse("0 12 * * 7").unwrap();
        assert_eq!(s.next_after(at(2026, 2, 21, 0, 0)), Some(at(2026, 2, 22, 12, 0)));
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronSchedule::parse("bad").is_err());
        assert!(CronSchedule::parse("61 * * * *").is_err());
        assert!(CronSchedule::parse("*/0 * * * *").is_err());
        assert!(CronSchedule::parse("0 5-2 * * *").is_err());
        assert!(CronSchedule::parse("0 9 * * 1,3,5").is_ok());
    }
}
