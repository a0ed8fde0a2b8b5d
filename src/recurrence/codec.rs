use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc, Weekday};
use std::fmt;
use std::str::FromStr;

use super::{Frequency, RecurrenceEnd, RecurrenceError, RecurrenceRule, WeekdayRule};
use crate::models::EventTime;

const RULE_PREFIX: &str = "RRULE:";

impl Frequency {
    pub fn parse(value: &str) -> Result<Self, RecurrenceError> {
        match value.trim().to_ascii_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            other => Err(RecurrenceError::UnsupportedFrequency(other.to_string())),
        }
    }
}

pub fn weekday_code(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

pub fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code.to_ascii_uppercase().as_str() {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

fn invalid(key: &str, value: &str) -> RecurrenceError {
    RecurrenceError::InvalidPart {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl RecurrenceRule {
    /// Parse a rule with or without the `RRULE:` prefix.
    ///
    /// `event_start` resolves floating UNTIL values: they are read in the
    /// start's UTC offset when the start is zoned, otherwise as UTC.
    pub fn parse(text: &str, event_start: Option<&EventTime>) -> Result<Self, RecurrenceError> {
        let trimmed = text.trim();
        let body = match trimmed.get(..RULE_PREFIX.len()) {
            Some(prefix) if prefix.eq_ignore_ascii_case(RULE_PREFIX) => &trimmed[RULE_PREFIX.len()..],
            _ => trimmed,
        };

        let mut frequency = None;
        let mut rule = RecurrenceRule::new(Frequency::Daily);
        let mut count = None;
        let mut until = None;

        for part in body.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| RecurrenceError::Malformed(part.to_string()))?;
            let key = key.trim().to_ascii_uppercase();
            let value = value.trim();

            match key.as_str() {
                "FREQ" => frequency = Some(Frequency::parse(value)?),
                "INTERVAL" => {
                    rule.interval = value
                        .parse::<u32>()
                        .ok()
                        .filter(|n| *n >= 1)
                        .ok_or_else(|| invalid(&key, value))?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse::<u32>()
                            .ok()
                            .filter(|n| *n >= 1)
                            .ok_or_else(|| invalid(&key, value))?,
                    );
                }
                "UNTIL" => until = Some(parse_until(value, event_start).ok_or_else(|| invalid(&key, value))?),
                "BYDAY" => rule.by_day = parse_list(&key, value, parse_weekday_rule)?,
                "BYMONTHDAY" => rule.by_month_day = parse_list(&key, value, |v| signed_in(v, 31))?,
                "BYMONTH" => rule.by_month = parse_list(&key, value, |v| unsigned_in(v, 1, 12))?,
                "BYSETPOS" => rule.by_set_pos = parse_list(&key, value, |v| signed_in(v, 366))?,
                "BYYEARDAY" => rule.by_year_day = parse_list(&key, value, |v| signed_in(v, 366))?,
                "BYWEEKNO" => rule.by_week_no = parse_list(&key, value, |v| signed_in(v, 53))?,
                "BYHOUR" => rule.by_hour = parse_list(&key, value, |v| unsigned_in(v, 0, 23))?,
                "BYMINUTE" => rule.by_minute = parse_list(&key, value, |v| unsigned_in(v, 0, 59))?,
                "BYSECOND" => rule.by_second = parse_list(&key, value, |v| unsigned_in(v, 0, 60))?,
                "WKST" => rule.week_start = Some(weekday_from_code(value).ok_or_else(|| invalid(&key, value))?),
                _ => rule.extensions.push((key, value.to_string())),
            }
        }

        rule.frequency = frequency.ok_or(RecurrenceError::MissingFrequency)?;
        // COUNT and UNTIL together is invalid; UNTIL wins
        rule.end = match (until, count) {
            (Some(until), _) => RecurrenceEnd::Until(until),
            (None, Some(count)) => RecurrenceEnd::Count(count),
            (None, None) => RecurrenceEnd::Never,
        };

        Ok(rule)
    }

    /// Serialize without the `RRULE:` prefix. `FREQ` always comes first and
    /// INTERVAL is omitted at its default of 1.
    pub fn serialize(&self) -> String {
        let mut parts = vec![format!("FREQ={}", self.frequency.as_str())];

        if self.interval != 1 {
            parts.push(format!("INTERVAL={}", self.interval));
        }
        match self.end {
            RecurrenceEnd::Never => {}
            RecurrenceEnd::Count(count) => parts.push(format!("COUNT={}", count)),
            RecurrenceEnd::Until(until) => parts.push(format!("UNTIL={}", until.format("%Y%m%dT%H%M%SZ"))),
        }
        if !self.by_day.is_empty() {
            let days: Vec<String> = self.by_day.iter().map(format_weekday_rule).collect();
            parts.push(format!("BYDAY={}", days.join(",")));
        }
        push_list(&mut parts, "BYMONTHDAY", &self.by_month_day);
        push_list(&mut parts, "BYMONTH", &self.by_month);
        push_list(&mut parts, "BYYEARDAY", &self.by_year_day);
        push_list(&mut parts, "BYWEEKNO", &self.by_week_no);
        push_list(&mut parts, "BYHOUR", &self.by_hour);
        push_list(&mut parts, "BYMINUTE", &self.by_minute);
        push_list(&mut parts, "BYSECOND", &self.by_second);
        push_list(&mut parts, "BYSETPOS", &self.by_set_pos);
        if let Some(week_start) = self.week_start {
            parts.push(format!("WKST={}", weekday_code(week_start)));
        }
        for (key, value) in &self.extensions {
            parts.push(format!("{}={}", key, value));
        }

        parts.join(";")
    }

    /// [`serialize`](Self::serialize) with every list sorted and deduplicated,
    /// so rules with the same value sets give the same text.
    pub fn canonical_form(&self) -> String {
        let mut rule = self.clone();
        rule.by_day
            .sort_by_key(|day| (day.weekday.num_days_from_monday(), day.ordinal));
        rule.by_day.dedup();
        sort_unique(&mut rule.by_month_day);
        sort_unique(&mut rule.by_month);
        sort_unique(&mut rule.by_set_pos);
        sort_unique(&mut rule.by_year_day);
        sort_unique(&mut rule.by_week_no);
        sort_unique(&mut rule.by_hour);
        sort_unique(&mut rule.by_minute);
        sort_unique(&mut rule.by_second);
        rule.extensions.sort();
        rule.serialize()
    }
}

fn sort_unique<T: Ord>(values: &mut Vec<T>) {
    values.sort_unstable();
    values.dedup();
}

impl fmt::Display for RecurrenceRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for RecurrenceRule {
    type Err = RecurrenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RecurrenceRule::parse(s, None)
    }
}

fn parse_until(value: &str, event_start: Option<&EventTime>) -> Option<DateTime<Utc>> {
    if value.len() == 8 {
        // Date-only: the whole day is included
        let date = NaiveDate::parse_from_str(value, "%Y%m%d").ok()?;
        return date.and_hms_opt(23, 59, 59).map(|dt| dt.and_utc());
    }
    if let Some(stripped) = value.strip_suffix('Z').or_else(|| value.strip_suffix('z')) {
        let naive = NaiveDateTime::parse_from_str(stripped, "%Y%m%dT%H%M%S").ok()?;
        return Some(naive.and_utc());
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let offset = event_start.and_then(EventTime::utc_offset_seconds).unwrap_or(0);
    Some((naive - chrono::Duration::seconds(offset)).and_utc())
}

fn parse_list<T, F>(key: &str, value: &str, parse_item: F) -> Result<Vec<T>, RecurrenceError>
where
    F: Fn(&str) -> Option<T>,
{
    value
        .split(',')
        .map(|item| parse_item(item.trim()).ok_or_else(|| invalid(key, value)))
        .collect()
}

fn signed_in<T: TryFrom<i32>>(value: &str, limit: i32) -> Option<T> {
    let n = value.parse::<i32>().ok()?;
    if n == 0 || n.abs() > limit {
        return None;
    }
    T::try_from(n).ok()
}

fn unsigned_in(value: &str, min: u8, max: u8) -> Option<u8> {
    let n = value.parse::<u8>().ok()?;
    (min..=max).contains(&n).then_some(n)
}

fn parse_weekday_rule(value: &str) -> Option<WeekdayRule> {
    if value.len() < 2 || !value.is_char_boundary(value.len() - 2) {
        return None;
    }
    let (prefix, code) = value.split_at(value.len() - 2);
    let weekday = weekday_from_code(code)?;
    let ordinal = if prefix.is_empty() {
        0
    } else {
        let n = prefix.parse::<i8>().ok()?;
        if !(-53..=53).contains(&n) {
            return None;
        }
        n
    };
    Some(WeekdayRule { weekday, ordinal })
}

fn format_weekday_rule(rule: &WeekdayRule) -> String {
    if rule.ordinal == 0 {
        weekday_code(rule.weekday).to_string()
    } else {
        format!("{}{}", rule.ordinal, weekday_code(rule.weekday))
    }
}

fn push_list<T: fmt::Display>(parts: &mut Vec<String>, key: &str, values: &[T]) {
    if values.is_empty() {
        return;
    }
    let joined: Vec<String> = values.iter().map(ToString::to_string).collect();
    parts.push(format!("{}={}", key, joined.join(",")));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(text: &str) -> RecurrenceRule {
        RecurrenceRule::parse(text, None).unwrap()
    }

    #[test]
    fn test_weekly_interval_with_plain_weekdays() {
        let rule = parse("FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR");
        assert_eq!(rule.frequency, Frequency::Weekly);
        assert_eq!(rule.interval, 2);
        assert_eq!(
            rule.by_day,
            vec![
                WeekdayRule::every(Weekday::Mon),
                WeekdayRule::every(Weekday::Wed),
                WeekdayRule::every(Weekday::Fri),
            ]
        );
        assert!(rule.by_day.iter().all(|d| d.ordinal == 0));
    }

    #[test]
    fn test_canonical_form_ignores_list_order() {
        let a = parse("FREQ=WEEKLY;BYDAY=MO,WE;X-B=2;X-A=1");
        let b = parse("FREQ=WEEKLY;BYDAY=WE,MO,WE;X-A=1;X-B=2");
        assert_ne!(a.serialize(), b.serialize());
        assert_eq!(a.canonical_form(), b.canonical_form());
        assert_eq!(a.canonical_form(), "FREQ=WEEKLY;BYDAY=MO,WE;X-A=1;X-B=2");
        assert_ne!(a.canonical_form(), parse("FREQ=WEEKLY;BYDAY=MO,TH").canonical_form());
    }

    #[test]
    fn test_last_friday_of_month() {
        let rule = parse("FREQ=MONTHLY;BYDAY=-1FR");
        assert_eq!(rule.frequency, Frequency::Monthly);
        assert_eq!(rule.by_day, vec![WeekdayRule::nth(Weekday::Fri, -1)]);
        assert_eq!(rule.interval, 1);
        assert!(rule.is_unbounded());
    }

    #[test]
    fn test_prefix_and_case_are_accepted() {
        let with_prefix = parse("RRULE:FREQ=DAILY;COUNT=5");
        let lower = parse("rrule:freq=daily;count=5");
        assert_eq!(with_prefix, lower);
        assert_eq!(with_prefix.end, RecurrenceEnd::Count(5));
    }

    #[test]
    fn test_missing_or_unknown_frequency_fails() {
        assert_eq!(
            RecurrenceRule::parse("INTERVAL=2;BYDAY=MO", None),
            Err(RecurrenceError::MissingFrequency)
        );
        assert_eq!(RecurrenceRule::parse("", None), Err(RecurrenceError::MissingFrequency));
        assert!(matches!(
            RecurrenceRule::parse("FREQ=HOURLY", None),
            Err(RecurrenceError::UnsupportedFrequency(_))
        ));
    }

    #[test]
    fn test_until_takes_precedence_over_count() {
        let rule = parse("FREQ=DAILY;COUNT=10;UNTIL=20240105T120000Z");
        assert_eq!(
            rule.end,
            RecurrenceEnd::Until(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap())
        );
        // Order in the text does not matter
        let reversed = parse("FREQ=DAILY;UNTIL=20240105T120000Z;COUNT=10");
        assert_eq!(rule, reversed);
    }

    #[test]
    fn test_date_only_until_is_end_of_day_utc() {
        let rule = parse("FREQ=WEEKLY;UNTIL=20241231");
        assert_eq!(
            rule.end,
            RecurrenceEnd::Until(Utc.with_ymd_and_hms(2024, 12, 31, 23, 59, 59).unwrap())
        );
    }

    #[test]
    fn test_floating_until_uses_start_offset() {
        let start = EventTime::Zoned {
            local: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 0).unwrap(),
            tzid: "Europe/Berlin".to_string(),
            instant: Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        };
        let rule = RecurrenceRule::parse("FREQ=DAILY;UNTIL=20240110T100000", Some(&start)).unwrap();
        assert_eq!(
            rule.end,
            RecurrenceEnd::Until(Utc.with_ymd_and_hms(2024, 1, 10, 9, 0, 0).unwrap())
        );
    }

    #[test]
    fn test_out_of_range_values_are_rejected() {
        for text in [
            "FREQ=MONTHLY;BYMONTHDAY=32",
            "FREQ=MONTHLY;BYMONTHDAY=0",
            "FREQ=YEARLY;BYMONTH=13",
            "FREQ=MONTHLY;BYDAY=54MO",
            "FREQ=MONTHLY;BYDAY=XX",
            "FREQ=DAILY;INTERVAL=0",
            "FREQ=DAILY;COUNT=abc",
            "FREQ=DAILY;BYSETPOS=",
            "FREQ=DAILY;GARBAGE",
        ] {
            assert!(RecurrenceRule::parse(text, None).is_err(), "should reject {}", text);
        }
    }

    #[test]
    fn test_serialize_emits_freq_first_and_omits_default_interval() {
        let rule = parse("BYDAY=MO;FREQ=WEEKLY;INTERVAL=1");
        assert_eq!(rule.serialize(), "FREQ=WEEKLY;BYDAY=MO");

        let ordinal = parse("FREQ=YEARLY;BYMONTH=11;BYDAY=4TH");
        assert!(ordinal.serialize().starts_with("FREQ=YEARLY"));
        assert!(ordinal.serialize().contains("BYDAY=4TH"));
    }

    #[test]
    fn test_round_trip_is_structurally_stable() {
        let rules = [
            "FREQ=WEEKLY;INTERVAL=2;BYDAY=MO,WE,FR",
            "FREQ=MONTHLY;BYDAY=-1FR",
            "RRULE:FREQ=MONTHLY;BYDAY=MO,TU,WE,TH,FR;BYSETPOS=-1",
            "FREQ=YEARLY;BYMONTH=3;BYDAY=2SU;UNTIL=20300310T070000Z",
            "FREQ=DAILY;COUNT=10;UNTIL=20240101",
            "FREQ=MONTHLY;BYMONTHDAY=1,15,-1;COUNT=12",
            "FREQ=YEARLY;BYYEARDAY=1,100,-1;BYWEEKNO=20;WKST=SU",
            "FREQ=DAILY;BYHOUR=9,17;BYMINUTE=0,30;BYSECOND=0",
            "FREQ=WEEKLY;X-NAME=value;BYDAY=+1MO",
        ];

        for text in rules {
            let first = parse(text);
            let reparsed = parse(&first.serialize());
            assert_eq!(first, reparsed, "round trip changed {}", text);
            assert_eq!(reparsed.serialize(), first.serialize());
        }
    }

    #[test]
    fn test_from_str_and_display() {
        let rule: RecurrenceRule = "FREQ=DAILY;INTERVAL=3".parse().unwrap();
        assert_eq!(rule.to_string(), "FREQ=DAILY;INTERVAL=3");
    }
}
