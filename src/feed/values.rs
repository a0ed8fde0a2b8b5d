//! DATE, DATE-TIME, DURATION and UTC-OFFSET value parsing.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), "%Y%m%d").ok()
}

/// `YYYYMMDDTHHMMSS[Z]`; the flag is true for the UTC form.
pub fn parse_date_time(value: &str) -> Option<(NaiveDateTime, bool)> {
    let value = value.trim();
    let (body, utc) = match value.strip_suffix(['Z', 'z']) {
        Some(body) => (body, true),
        None => (value, false),
    };
    NaiveDateTime::parse_from_str(body, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| (dt, utc))
}

/// A DATE-TIME read as UTC regardless of form (LAST-MODIFIED, DTSTAMP).
pub fn parse_utc_stamp(value: &str) -> Option<DateTime<Utc>> {
    parse_date_time(value).map(|(dt, _)| dt.and_utc())
}

/// `[+|-]P[nW][nD][T[nH][nM][nS]]`.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix(['P', 'p'])?;
    if rest.is_empty() {
        return None;
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    let mut in_time = false;
    let mut saw_unit = false;

    for c in rest.chars() {
        match c.to_ascii_uppercase() {
            '0'..='9' => digits.push(c),
            'T' if digits.is_empty() && !in_time => in_time = true,
            unit => {
                let amount: i64 = digits.parse().ok()?;
                digits.clear();
                let seconds = match (unit, in_time) {
                    ('W', false) => 7 * 86_400,
                    ('D', false) => 86_400,
                    ('H', true) => 3_600,
                    ('M', true) => 60,
                    ('S', true) => 1,
                    _ => return None,
                };
                total = total.checked_add(amount.checked_mul(seconds)?)?;
                saw_unit = true;
            }
        }
    }
    if !digits.is_empty() || !saw_unit {
        return None;
    }

    let total = if negative { -total } else { total };
    Duration::try_seconds(total)
}

/// `+HHMM` / `-HHMM[SS]` as seconds east of UTC.
pub fn parse_utc_offset(value: &str) -> Option<i32> {
    let value = value.trim();
    let sign = match value.as_bytes().first()? {
        b'+' => 1,
        b'-' => -1,
        _ => return None,
    };
    let digits = &value[1..];
    if !(digits.len() == 4 || digits.len() == 6) || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let hours: i32 = digits[0..2].parse().ok()?;
    let minutes: i32 = digits[2..4].parse().ok()?;
    let seconds: i32 = if digits.len() == 6 { digits[4..6].parse().ok()? } else { 0 };
    if minutes > 59 || seconds > 59 {
        return None;
    }
    Some(sign * (hours * 3_600 + minutes * 60 + seconds))
}
