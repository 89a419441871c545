//! Cron expression parsing and evaluation.
//!
//! Standard five-field format: `minute hour day-of-month month day-of-week`.
//! Every field accepts `*`, single values, ranges (`1-5`), steps (`*/15`,
//! `10-40/10`, `5/20`) and comma lists of those. Months and weekdays also
//! accept three-letter names; weekday `7` is Sunday.
//!
//! When both day-of-month and day-of-week are restricted, a day matches if
//! *either* does, as in Vixie cron.

use std::fmt;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Timelike};

/// How far ahead [`CronExpression::next_after`] searches.
const SEARCH_DAYS: u32 = 366 * 5;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

/// One field, stored as a bit set of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronField {
    allowed: u64,
    min: u32,
    max: u32,
    /// Field started with `*`; relevant for the day-of-month/day-of-week rule.
    wildcard: bool,
    source: String,
}

impl CronField {
    fn contains(&self, value: u32) -> bool {
        value <= 63 && self.allowed & (1_u64 << value) != 0
    }

    fn values(&self) -> impl Iterator<Item = u32> + '_ {
        (self.min..=self.max).filter(|v| self.contains(*v))
    }
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    Minute,
    Hour,
    Day,
    Month,
    Weekday,
}

impl FieldKind {
    fn name(self) -> &'static str {
        match self {
            Self::Minute => "minute",
            Self::Hour => "hour",
            Self::Day => "day",
            Self::Month => "month",
            Self::Weekday => "day_of_week",
        }
    }

    fn bounds(self) -> (u32, u32) {
        match self {
            Self::Minute => (0, 59),
            Self::Hour => (0, 23),
            Self::Day => (1, 31),
            Self::Month => (1, 12),
            // 7 is folded onto 0 after parsing
            Self::Weekday => (0, 7),
        }
    }

    fn names(self) -> Option<(&'static [&'static str], u32)> {
        match self {
            Self::Month => Some((&MONTH_NAMES, 1)),
            Self::Weekday => Some((&WEEKDAY_NAMES, 0)),
            _ => None,
        }
    }
}

/// Cron expression parser.
#[derive(Debug)]
pub struct CronParser;

impl CronParser {
    /// Parse a cron expression string.
    ///
    /// - `0 0 * * *` - daily at midnight
    /// - `*/5 * * * *` - every 5 minutes
    /// - `0 9-17 * * mon-fri` - hourly 9am-5pm, Monday-Friday
    pub fn parse(expr: &str) -> Result<CronExpression> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        if parts.len() != 5 {
            bail!(
                "expected 5 fields (minute hour day month day_of_week), got {}: '{}'",
                parts.len(),
                expr.trim()
            );
        }

        Ok(CronExpression {
            minute: Self::parse_field(parts[0], FieldKind::Minute)?,
            hour: Self::parse_field(parts[1], FieldKind::Hour)?,
            day: Self::parse_field(parts[2], FieldKind::Day)?,
            month: Self::parse_field(parts[3], FieldKind::Month)?,
            weekday: Self::parse_field(parts[4], FieldKind::Weekday)?,
        })
    }

    fn parse_field(field: &str, kind: FieldKind) -> Result<CronField> {
        let (min, max) = kind.bounds();
        let mut allowed = 0_u64;

        for item in field.split(',') {
            Self::parse_item(item, kind, &mut allowed)
                .with_context(|| format!("invalid {} field '{}'", kind.name(), field))?;
        }

        let mut max = max;
        if matches!(kind, FieldKind::Weekday) {
            if allowed & (1_u64 << 7) != 0 {
                allowed = (allowed & !(1_u64 << 7)) | 1;
            }
            max = 6;
        }

        Ok(CronField {
            allowed,
            min,
            max,
            wildcard: field.starts_with('*'),
            source: field.to_string(),
        })
    }

    fn parse_item(item: &str, kind: FieldKind, allowed: &mut u64) -> Result<()> {
        let (min, max) = kind.bounds();

        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .with_context(|| format!("invalid step '{step}'"))?;
                if step == 0 {
                    bail!("step must be at least 1");
                }
                (base, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((a, b)) = base.split_once('-') {
            (Self::parse_value(a, kind)?, Self::parse_value(b, kind)?)
        } else {
            let value = Self::parse_value(base, kind)?;
            // `5/20` means 5 through max in steps of 20
            (value, if step.is_some() { max } else { value })
        };

        if start > end {
            bail!("range start {start} is after end {end}");
        }

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            *allowed |= 1_u64 << value;
            let Some(next) = value.checked_add(step) else {
                break;
            };
            value = next;
        }
        Ok(())
    }

    fn parse_value(raw: &str, kind: FieldKind) -> Result<u32> {
        let (min, max) = kind.bounds();

        if let Some((names, offset)) = kind.names() {
            let lower = raw.to_ascii_lowercase();
            if let Some(index) = names.iter().position(|n| *n == lower) {
                let index = u32::try_from(index).context("name index out of range")?;
                return Ok(index + offset);
            }
        }

        let value: u32 = raw
            .parse()
            .with_context(|| format!("invalid value '{raw}'"))?;
        if value < min || value > max {
            bail!("value {value} out of range {min}-{max}");
        }
        Ok(value)
    }
}

impl CronExpression {
    /// Check if the expression matches the given time (seconds ignored).
    pub fn matches<Tz: TimeZone>(&self, time: &DateTime<Tz>) -> bool {
        let local = time.naive_local();
        self.minute.contains(local.minute())
            && self.hour.contains(local.hour())
            && self.month.contains(local.month())
            && self.day_matches(local.date())
    }

    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = self.day.contains(date.day());
        let dow = self.weekday.contains(date.weekday().num_days_from_sunday());
        if self.day.wildcard || self.weekday.wildcard {
            dom && dow
        } else {
            dom || dow
        }
    }

    /// The first matching minute strictly after `after`, in `after`'s zone.
    ///
    /// Local times skipped by a DST jump never fire; ambiguous ones fire at
    /// their earlier instant. Returns `None` if nothing matches within five
    /// years (e.g. `0 0 31 2 *`).
    pub fn next_after<Tz: TimeZone>(&self, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let tz = after.timezone();
        let mut date = after.naive_local().date();

        for _ in 0..=SEARCH_DAYS {
            if self.month.contains(date.month()) && self.day_matches(date) {
                for hour in self.hour.values() {
                    for minute in self.minute.values() {
                        let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                            continue;
                        };
                        if let Some(candidate) = tz.from_local_datetime(&naive).earliest() {
                            if candidate > *after {
                                return Some(candidate);
                            }
                        }
                    }
                }
            }
            date = date.succ_opt()?;
        }
        None
    }

    /// Trigger description, e.g.
    /// `cron[minute='0', hour='0', day='*', month='*', day_of_week='*']`.
    pub fn describe(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "cron[minute='{}', hour='{}', day='{}', month='{}', day_of_week='{}']",
            self.minute.source,
            self.hour.source,
            self.day.source,
            self.month.source,
            self.weekday.source
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_parse_wildcard() {
        let expr = CronParser::parse("* * * * *").unwrap();
        assert!(expr.matches(&Utc::now()));
    }

    #[test]
    fn test_field_count() {
        assert!(CronParser::parse("0 0 * * *").is_ok());
        assert!(CronParser::parse("* * *").is_err());
        assert!(CronParser::parse("0 0 * * * *").is_err());
        assert!(CronParser::parse("").is_err());
        assert!(CronParser::parse("invalid").is_err());
    }

    #[test]
    fn test_field_values_rejected() {
        assert!(CronParser::parse("60 * * * *").is_err());
        assert!(CronParser::parse("* 24 * * *").is_err());
        assert!(CronParser::parse("* * 0 * *").is_err());
        assert!(CronParser::parse("* * * 13 *").is_err());
        assert!(CronParser::parse("* * * * 8").is_err());
        assert!(CronParser::parse("*/0 * * * *").is_err());
        assert!(CronParser::parse("30-10 * * * *").is_err());
        assert!(CronParser::parse("a * * * *").is_err());

        let err = CronParser::parse("0 25 * * *").unwrap_err();
        assert!(format!("{err:#}").contains("hour"));
    }

    #[test]
    fn test_huge_step_keeps_only_start() {
        let expr = CronParser::parse("5/4294967295 * * * *").unwrap();
        assert!(expr.matches(&at(2024, 3, 10, 15, 5)));
        assert!(!expr.matches(&at(2024, 3, 10, 15, 0)));
        assert!(!expr.matches(&at(2024, 3, 10, 15, 6)));

        let expr = CronParser::parse("*/4294967295 * * * *").unwrap();
        assert!(expr.matches(&at(2024, 3, 10, 15, 0)));
        assert!(!expr.matches(&at(2024, 3, 10, 15, 1)));
    }

    #[test]
    fn test_daily_midnight_next() {
        let expr = CronParser::parse("0 0 * * *").unwrap();
        assert_eq!(
            expr.next_after(&at(2024, 3, 10, 15, 30)),
            Some(at(2024, 3, 11, 0, 0))
        );
        // strictly after
        assert_eq!(
            expr.next_after(&at(2024, 3, 11, 0, 0)),
            Some(at(2024, 3, 12, 0, 0))
        );
    }

    #[test]
    fn test_steps_ranges_lists() {
        let expr = CronParser::parse("*/15 9-17 * * *").unwrap();
        assert_eq!(
            expr.next_after(&at(2024, 1, 1, 8, 50)),
            Some(at(2024, 1, 1, 9, 0))
        );
        assert_eq!(
            expr.next_after(&at(2024, 1, 1, 17, 45)),
            Some(at(2024, 1, 2, 9, 0))
        );

        let expr = CronParser::parse("5,35 */6 * * *").unwrap();
        assert_eq!(
            expr.next_after(&at(2024, 1, 1, 6, 10)),
            Some(at(2024, 1, 1, 6, 35))
        );

        let expr = CronParser::parse("10-40/10 0 1 * *").unwrap();
        assert!(expr.matches(&at(2024, 5, 1, 0, 30)));
        assert!(!expr.matches(&at(2024, 5, 1, 0, 35)));

        let expr = CronParser::parse("5/20 * * * *").unwrap();
        assert!(expr.matches(&at(2024, 5, 1, 3, 45)));
        assert!(!expr.matches(&at(2024, 5, 1, 3, 0)));
    }

    #[test]
    fn test_names_and_sunday_seven() {
        // 2024-06-02 is a Sunday
        let sunday = at(2024, 6, 2, 12, 0);
        assert!(CronParser::parse("0 12 * * 7").unwrap().matches(&sunday));
        assert!(CronParser::parse("0 12 * * sun").unwrap().matches(&sunday));
        assert!(CronParser::parse("0 12 * jun SUN").unwrap().matches(&sunday));
        assert!(!CronParser::parse("0 12 * * mon-fri").unwrap().matches(&sunday));
    }

    #[test]
    fn test_day_of_month_or_day_of_week() {
        // the 13th or any Friday
        let expr = CronParser::parse("0 0 13 * 5").unwrap();
        // 2024-09-06 is a Friday, not the 13th
        assert!(expr.matches(&at(2024, 9, 6, 0, 0)));
        // 2024-08-13 is a Tuesday
        assert!(expr.matches(&at(2024, 8, 13, 0, 0)));
        assert!(!expr.matches(&at(2024, 8, 14, 0, 0)));

        // with a wildcard weekday only the day-of-month counts
        let expr = CronParser::parse("0 0 13 * *").unwrap();
        assert!(!expr.matches(&at(2024, 9, 6, 0, 0)));
    }

    #[test]
    fn test_leap_day_and_impossible_dates() {
        let leap = CronParser::parse("0 0 29 2 *").unwrap();
        assert_eq!(
            leap.next_after(&at(2025, 3, 1, 0, 0)),
            Some(at(2028, 2, 29, 0, 0))
        );

        let never = CronParser::parse("0 0 31 2 *").unwrap();
        assert_eq!(never.next_after(&at(2025, 1, 1, 0, 0)), None);
    }

    #[test]
    fn test_next_after_keeps_time_zone() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let after = tz.with_ymd_and_hms(2024, 1, 1, 23, 30, 0).unwrap();
        let expr = CronParser::parse("0 0 * * *").unwrap();
        let next = expr.next_after(&after).unwrap();
        assert_eq!(next, tz.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert_eq!(next.with_timezone(&Utc), at(2024, 1, 1, 16, 0));
    }

    #[test]
    fn test_describe() {
        let expr = CronParser::parse("0 0 * * *").unwrap();
        assert_eq!(
            expr.describe(),
            "cron[minute='0', hour='0', day='*', month='*', day_of_week='*']"
        );
    }
}
