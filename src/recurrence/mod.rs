//! Structured recurrence rules (RRULE).
//!
//! Parsing and serialization live in [`codec`]; this module holds the data
//! model and the conservative occurrence bound used by window filtering.

use chrono::{DateTime, Datelike, Duration, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod codec;

pub use codec::{weekday_code, weekday_from_code};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        }
    }

    /// Longest possible length of one period.
    fn max_period(&self) -> Duration {
        match self {
            Frequency::Daily => Duration::days(1),
            Frequency::Weekly => Duration::days(7),
            Frequency::Monthly => Duration::days(31),
            Frequency::Yearly => Duration::days(366),
        }
    }
}

/// How a rule terminates. COUNT and UNTIL are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecurrenceEnd {
    Never,
    Count(u32),
    Until(DateTime<Utc>),
}

/// One BYDAY entry. `ordinal == 0` means every matching weekday in the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WeekdayRule {
    pub weekday: Weekday,
    pub ordinal: i8,
}

impl WeekdayRule {
    pub fn every(weekday: Weekday) -> Self {
        Self { weekday, ordinal: 0 }
    }

    pub fn nth(weekday: Weekday, ordinal: i8) -> Self {
        Self { weekday, ordinal }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceRule {
    pub frequency: Frequency,
    pub interval: u32,
    pub end: RecurrenceEnd,
    pub by_day: Vec<WeekdayRule>,
    pub by_month_day: Vec<i8>,
    pub by_month: Vec<u8>,
    pub by_set_pos: Vec<i16>,
    pub by_year_day: Vec<i16>,
    pub by_week_no: Vec<i8>,
    pub by_hour: Vec<u8>,
    pub by_minute: Vec<u8>,
    pub by_second: Vec<u8>,
    pub week_start: Option<Weekday>,
    /// Parts the codec does not model (e.g. `X-NAME=...`), kept in order.
    pub extensions: Vec<(String, String)>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecurrenceError {
    #[error("recurrence rule has no FREQ")]
    MissingFrequency,

    #[error("unsupported frequency: {0}")]
    UnsupportedFrequency(String),

    #[error("invalid {key} value: {value}")]
    InvalidPart { key: String, value: String },

    #[error("malformed rule part: {0}")]
    Malformed(String),
}

impl RecurrenceRule {
    pub fn new(frequency: Frequency) -> Self {
        Self {
            frequency,
            interval: 1,
            end: RecurrenceEnd::Never,
            by_day: Vec::new(),
            by_month_day: Vec::new(),
            by_month: Vec::new(),
            by_set_pos: Vec::new(),
            by_year_day: Vec::new(),
            by_week_no: Vec::new(),
            by_hour: Vec::new(),
            by_minute: Vec::new(),
            by_second: Vec::new(),
            week_start: None,
            extensions: Vec::new(),
        }
    }

    pub fn is_unbounded(&self) -> bool {
        matches!(self.end, RecurrenceEnd::Never)
    }

    /// Latest instant an occurrence could fall on, if the rule is bounded.
    ///
    /// For COUNT rules this over-estimates: when every period is sure to hold
    /// an occurrence, the n-th one lies within n * interval periods of the
    /// start. Rules whose periods can come up empty are treated as unbounded.
    pub fn last_possible(&self, start: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self.end {
            RecurrenceEnd::Never => None,
            RecurrenceEnd::Until(until) => Some(until),
            RecurrenceEnd::Count(_) if !self.every_period_occurs(start) => None,
            RecurrenceEnd::Count(count) => {
                let periods = i64::from(count).saturating_mul(i64::from(self.interval.max(1)));
                let days = self.frequency.max_period().num_days().saturating_mul(periods);
                // Anything past chrono's range is effectively unbounded
                Duration::try_days(days).and_then(|span| start.checked_add_signed(span))
            }
        }
    }

    /// True when each period of the rule is guaranteed at least one occurrence.
    ///
    /// Any BY* part can filter a period down to nothing (BYDAY=MO under DAILY,
    /// BYMONTHDAY=31 in a 30-day month), and so can a start on a day some
    /// months or years lack. The day check allows for the start's zone moving
    /// the UTC date by one.
    fn every_period_occurs(&self, start: DateTime<Utc>) -> bool {
        let has_by_parts = !self.by_day.is_empty()
            || !self.by_month_day.is_empty()
            || !self.by_month.is_empty()
            || !self.by_set_pos.is_empty()
            || !self.by_year_day.is_empty()
            || !self.by_week_no.is_empty()
            || !self.by_hour.is_empty()
            || !self.by_minute.is_empty()
            || !self.by_second.is_empty();
        if has_by_parts {
            return false;
        }
        match self.frequency {
            Frequency::Daily | Frequency::Weekly => true,
            Frequency::Monthly => (2..=27).contains(&start.day()),
            Frequency::Yearly => !matches!((start.month(), start.day()), (2, 28) | (2, 29) | (3, 1)),
        }
    }

    /// Conservative check: false only when no occurrence can fall in `[from, to]`.
    pub fn may_occur_between(&self, start: DateTime<Utc>, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        if start > to {
            return false;
        }
        match self.last_possible(start) {
            Some(last) => last >= from,
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_unbounded_rule_reaches_any_later_window() {
        let rule = RecurrenceRule::new(Frequency::Weekly);
        assert!(rule.is_unbounded());
        assert!(rule.may_occur_between(at(2015, 1, 1), at(2030, 1, 1), at(2030, 2, 1)));
    }

    #[test]
    fn test_rule_never_occurs_before_its_start() {
        let rule = RecurrenceRule::new(Frequency::Daily);
        assert!(!rule.may_occur_between(at(2025, 6, 1), at(2025, 1, 1), at(2025, 2, 1)));
    }

    #[test]
    fn test_until_bound() {
        let mut rule = RecurrenceRule::new(Frequency::Daily);
        rule.end = RecurrenceEnd::Until(at(2024, 1, 10));
        assert!(!rule.may_occur_between(at(2024, 1, 1), at(2024, 2, 1), at(2024, 3, 1)));
        assert!(rule.may_occur_between(at(2024, 1, 1), at(2024, 1, 5), at(2024, 3, 1)));
    }

    #[test]
    fn test_count_bound_uses_interval() {
        let mut rule = RecurrenceRule::new(Frequency::Weekly);
        rule.interval = 2;
        rule.end = RecurrenceEnd::Count(3);
        // 3 occurrences every other week end within 6 weeks
        let last = rule.last_possible(at(2024, 1, 1)).unwrap();
        assert_eq!(last, at(2024, 1, 1) + Duration::days(42));
        assert!(!rule.may_occur_between(at(2024, 1, 1), at(2024, 3, 1), at(2024, 4, 1)));
    }

    #[test]
    fn test_count_with_sparse_month_days_is_unbounded() {
        // Jan 31, Mar 31, May 31
        let rule: RecurrenceRule = "FREQ=MONTHLY;BYMONTHDAY=31;COUNT=3".parse().unwrap();
        assert!(rule.last_possible(at(2024, 1, 31)).is_none());
        assert!(rule.may_occur_between(at(2024, 1, 31), at(2024, 5, 20), at(2024, 6, 20)));
    }

    #[test]
    fn test_count_with_limiting_weekday_is_unbounded() {
        // Ten Mondays run into early March
        let rule: RecurrenceRule = "FREQ=DAILY;BYDAY=MO;COUNT=10".parse().unwrap();
        assert!(rule.may_occur_between(at(2024, 1, 1), at(2024, 3, 3), at(2024, 4, 2)));
    }

    #[test]
    fn test_count_from_a_short_month_day_is_unbounded() {
        let monthly: RecurrenceRule = "FREQ=MONTHLY;COUNT=2".parse().unwrap();
        assert!(monthly.last_possible(at(2024, 1, 30)).is_none());
        assert!(monthly.last_possible(at(2024, 1, 15)).is_some());

        let leap_day: RecurrenceRule = "FREQ=YEARLY;COUNT=2".parse().unwrap();
        assert!(leap_day.may_occur_between(at(2024, 2, 29), at(2028, 2, 1), at(2028, 3, 31)));
    }
}
