//! Five-field cron expressions, evaluated in UTC
//!
//! `minute hour day-of-month month day-of-week`. Each field accepts `*`,
//! numbers, ranges `a-b`, steps `*/n` or `a-b/n`, and comma lists. When both
//! day fields are restricted a time matches if either one does.
//!
//! A minute step of 60 or more (`*/360 * * * *`) counts minutes from
//! midnight, so `*/360` fires at 00:00, 06:00, 12:00 and 18:00.

use super::{JobError, JobResult};
use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    source: String,
    minutes: u64,
    minute_of_day_step: Option<u32>,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

fn invalid(expr: &str, why: impl fmt::Display) -> JobError {
    JobError::InvalidCron(format!("{expr:?}: {why}"))
}

fn parse_num(expr: &str, s: &str, min: u32, max: u32) -> JobResult<u32> {
    let n: u32 = s.parse().map_err(|_| invalid(expr, format!("bad number {s:?}")))?;
    if n < min || n > max {
        return Err(invalid(expr, format!("{n} outside {min}-{max}")));
    }
    Ok(n)
}

/// Bitmask of the values selected by one field
fn parse_field(expr: &str, field: &str, min: u32, max: u32) -> JobResult<u64> {
    let mut mask = 0u64;
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((r, s)) => (r, parse_num(expr, s, 1, max.max(1))?),
            None => (part, 1),
        };
        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let (a, b) = (parse_num(expr, a, min, max)?, parse_num(expr, b, min, max)?);
            if a > b {
                return Err(invalid(expr, format!("empty range {range}")));
            }
            (a, b)
        } else {
            let a = parse_num(expr, range, min, max)?;
            // `a/n` runs from a to the end of the field
            if part.contains('/') { (a, max) } else { (a, a) }
        };
        let mut v = lo;
        while v <= hi {
            mask |= 1 << v;
            v += step;
        }
    }
    Ok(mask)
}

fn bit(mask: u64, v: u32) -> bool {
    mask & (1 << v) != 0
}

impl CronExpr {
    pub fn parse(expr: &str) -> JobResult<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(invalid(expr, "expected 5 fields"));
        };

        let minute_of_day_step = match minute.strip_prefix("*/") {
            Some(step) => {
                let n = parse_num(expr, step, 1, 1440)?;
                (n >= 60).then_some(n)
            }
            None => None,
        };
        let minutes = match minute_of_day_step {
            Some(_) => 0,
            None => parse_field(expr, minute, 0, 59)?,
        };

        let mut days_of_week = parse_field(expr, dow, 0, 7)?;
        if bit(days_of_week, 7) {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: expr.to_string(),
            minutes,
            minute_of_day_step,
            hours: parse_field(expr, hour, 0, 23)?,
            days_of_month: parse_field(expr, dom, 1, 31)?,
            months: parse_field(expr, month, 1, 12)?,
            days_of_week,
            dom_restricted: dom != "*",
            dow_restricted: dow != "*",
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    fn minute_matches(&self, t: &DateTime<Utc>) -> bool {
        match self.minute_of_day_step {
            Some(step) => (t.hour() * 60 + t.minute()) % step == 0,
            None => bit(self.minutes, t.minute()),
        }
    }

    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom = bit(self.days_of_month, t.day());
        let dow = bit(self.days_of_week, t.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Whether the expression fires in the minute containing `t`
    pub fn matches(&self, t: &DateTime<Utc>) -> bool {
        bit(self.months, t.month())
            && self.day_matches(t)
            && bit(self.hours, t.hour())
            && self.minute_matches(t)
    }

    /// First firing minute strictly after `after`
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut t = truncate_to_minute(after)? + Duration::minutes(1);
        let limit = t + Duration::days(366 * 5);

        while t < limit {
            if !bit(self.months, t.month()) {
                let (y, m) = if t.month() == 12 { (t.year() + 1, 1) } else { (t.year(), t.month() + 1) };
                t = Utc.with_ymd_and_hms(y, m, 1, 0, 0, 0).single()?;
                continue;
            }
            if !self.day_matches(&t) {
                t = t.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc();
                continue;
            }
            if !bit(self.hours, t.hour()) {
                t = (t + Duration::hours(1)).with_minute(0)?;
                continue;
            }
            if !self.minute_matches(&t) {
                t += Duration::minutes(1);
                continue;
            }
            return Some(t);
        }
        None
    }
}

pub fn truncate_to_minute(t: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    t.with_second(0)?.with_nanosecond(0)
}

impl fmt::Display for CronExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn daily_at_fixed_time() {
        let c = CronExpr::parse("0 2 * * *").unwrap();
        assert!(c.matches(&at(2026, 1, 15, 2, 0)));
        assert!(!c.matches(&at(2026, 1, 15, 2, 1)));
        assert_eq!(c.next_after(&at(2026, 1, 15, 2, 0)), Some(at(2026, 1, 16, 2, 0)));
        assert_eq!(c.next_after(&at(2026, 1, 15, 1, 59)), Some(at(2026, 1, 15, 2, 0)));
    }

    #[test]
    fn every_three_hours() {
        let c = CronExpr::parse("0 */3 * * *").unwrap();
        assert_eq!(c.next_after(&at(2026, 1, 15, 3, 0)), Some(at(2026, 1, 15, 6, 0)));
        assert_eq!(c.next_after(&at(2026, 1, 15, 22, 30)), Some(at(2026, 1, 16, 0, 0)));
    }

    #[test]
    fn minute_step_beyond_an_hour_counts_from_midnight() {
        let c = CronExpr::parse("*/360 * * * *").unwrap();
        let fires: Vec<_> = std::iter::successors(Some(at(2026, 1, 15, 0, 0)), |t| c.next_after(t))
            .skip(1)
            .take(4)
            .collect();
        assert_eq!(
            fires,
            vec![
                at(2026, 1, 15, 6, 0),
                at(2026, 1, 15, 12, 0),
                at(2026, 1, 15, 18, 0),
                at(2026, 1, 16, 0, 0)
            ]
        );
    }

    #[test]
    fn every_five_minutes() {
        let c = CronExpr::parse("*/5 * * * *").unwrap();
        assert_eq!(c.next_after(&at(2026, 1, 15, 10, 3)), Some(at(2026, 1, 15, 10, 5)));
        assert!(c.matches(&at(2026, 1, 15, 10, 55)));
    }

    #[test]
    fn ranges_lists_and_weekdays() {
        // 09:30 on weekdays, plus Sundays written as 7
        let c = CronExpr::parse("30 9 * * 1-5,7").unwrap();
        // 2026-01-17 is a Saturday
        assert!(!c.matches(&at(2026, 1, 17, 9, 30)));
        assert!(c.matches(&at(2026, 1, 18, 9, 30)));
        assert_eq!(c.next_after(&at(2026, 1, 16, 9, 30)), Some(at(2026, 1, 18, 9, 30)));
    }

    #[test]
    fn restricted_day_fields_are_ored() {
        // the 1st of the month or any Monday
        let c = CronExpr::parse("0 0 1 * 1").unwrap();
        assert!(c.matches(&at(2026, 1, 1, 0, 0))); // Thursday the 1st
        assert!(c.matches(&at(2026, 1, 5, 0, 0))); // Monday
        assert!(!c.matches(&at(2026, 1, 6, 0, 0)));
    }

    #[test]
    fn month_rollover() {
        let c = CronExpr::parse("0 0 1 3 *").unwrap();
        assert_eq!(c.next_after(&at(2026, 12, 31, 23, 59)), Some(at(2027, 3, 1, 0, 0)));
    }

    #[test]
    fn rejects_malformed_expressions() {
        for bad in ["", "* * * *", "60 * * * *", "* 24 * * *", "5-1 * * * *", "x * * * *", "* * 0 * *"] {
            assert!(CronExpr::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }
}
