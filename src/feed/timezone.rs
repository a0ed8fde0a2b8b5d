//! TZID resolution against the IANA database and embedded VTIMEZONE blocks.

use std::collections::HashMap;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use log::debug;

use crate::recurrence::RecurrenceRule;

use super::component::Component;
use super::values;

/// Zone names Outlook and Exchange publish instead of IANA identifiers.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("UTC", "UTC"),
    ("GMT Standard Time", "Europe/London"),
    ("W. Europe Standard Time", "Europe/Berlin"),
    ("Romance Standard Time", "Europe/Paris"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Central European Standard Time", "Europe/Warsaw"),
    ("E. Europe Standard Time", "Europe/Chisinau"),
    ("FLE Standard Time", "Europe/Kiev"),
    ("Eastern Standard Time", "America/New_York"),
    ("Central Standard Time", "America/Chicago"),
    ("Mountain Standard Time", "America/Denver"),
    ("Pacific Standard Time", "America/Los_Angeles"),
    ("India Standard Time", "Asia/Kolkata"),
    ("China Standard Time", "Asia/Shanghai"),
    ("Tokyo Standard Time", "Asia/Tokyo"),
    ("AUS Eastern Standard Time", "Australia/Sydney"),
];

#[derive(Debug, Clone)]
struct Observance {
    onset: NaiveDateTime,
    offset_from: i32,
    offset_to: i32,
    rule: Option<RecurrenceRule>,
}

impl Observance {
    /// Latest transition of this observance at or before `local`.
    fn last_onset_before(&self, local: NaiveDateTime) -> Option<NaiveDateTime> {
        if self.onset > local {
            return None;
        }
        let rule = match &self.rule {
            Some(rule) => rule,
            None => return Some(self.onset),
        };

        let until = match rule.end {
            crate::recurrence::RecurrenceEnd::Until(until) => Some(until.naive_utc()),
            _ => None,
        };
        let last_year = until.map_or(local.year(), |u| u.year().min(local.year()));

        (self.onset.year()..=last_year)
            .rev()
            .take(3)
            .filter_map(|year| yearly_onset(rule, self.onset, year))
            .find(|onset| *onset <= local && *onset >= self.onset && until.map_or(true, |u| *onset <= u))
    }
}

/// The transition a yearly STANDARD/DAYLIGHT rule produces in `year`.
fn yearly_onset(rule: &RecurrenceRule, template: NaiveDateTime, year: i32) -> Option<NaiveDateTime> {
    let month = rule
        .by_month
        .first()
        .map(|m| u32::from(*m))
        .unwrap_or_else(|| template.month());

    let date = if let Some(day) = rule.by_day.first() {
        let ordinal = if day.ordinal == 0 {
            match rule.by_set_pos.first() {
                Some(pos) => i8::try_from(*pos).ok().filter(|p| (-5..=5).contains(p))?,
                None => 1,
            }
        } else {
            day.ordinal
        };
        nth_weekday_of_month(year, month, day.weekday, ordinal)?
    } else if let Some(day) = rule.by_month_day.first() {
        if *day < 0 {
            last_day_of_month(year, month)? - Duration::days(i64::from(-*day - 1))
        } else {
            NaiveDate::from_ymd_opt(year, month, u32::try_from(*day).ok()?)?
        }
    } else {
        NaiveDate::from_ymd_opt(year, month, template.day())?
    };

    Some(date.and_time(template.time()))
}

fn last_day_of_month(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// `ordinal` > 0 counts from the start of the month, < 0 from the end.
pub fn nth_weekday_of_month(year: i32, month: u32, weekday: Weekday, ordinal: i8) -> Option<NaiveDate> {
    if !(-5..=5).contains(&ordinal) {
        return None;
    }
    if ordinal > 0 {
        let first = NaiveDate::from_ymd_opt(year, month, 1)?;
        let lead = (7 + weekday.num_days_from_monday() - first.weekday().num_days_from_monday()) % 7;
        let date = first + Duration::days(i64::from(lead) + 7 * i64::from(ordinal - 1));
        (date.month() == month).then_some(date)
    } else if ordinal < 0 {
        let last = last_day_of_month(year, month)?;
        let lag = (7 + last.weekday().num_days_from_monday() - weekday.num_days_from_monday()) % 7;
        let date = last - Duration::days(i64::from(lag) + 7 * i64::from(-ordinal - 1));
        (date.month() == month).then_some(date)
    } else {
        None
    }
}

#[derive(Debug, Clone, Default)]
struct EmbeddedZone {
    location: Option<String>,
    observances: Vec<Observance>,
}

impl EmbeddedZone {
    fn from_component(component: &Component) -> Self {
        let location = component
            .property("X-LIC-LOCATION")
            .map(|p| p.value.trim().to_string());

        let observances = component
            .children
            .iter()
            .filter(|c| c.name == "STANDARD" || c.name == "DAYLIGHT")
            .filter_map(|c| {
                let onset = c
                    .property("DTSTART")
                    .and_then(|p| values::parse_date_time(&p.value))
                    .map(|(dt, _)| dt)?;
                let offset_to = c
                    .property("TZOFFSETTO")
                    .and_then(|p| values::parse_utc_offset(&p.value))?;
                let offset_from = c
                    .property("TZOFFSETFROM")
                    .and_then(|p| values::parse_utc_offset(&p.value))
                    .unwrap_or(offset_to);
                let rule = c
                    .property("RRULE")
                    .and_then(|p| RecurrenceRule::parse(&p.value, None).ok());
                Some(Observance {
                    onset,
                    offset_from,
                    offset_to,
                    rule,
                })
            })
            .collect();

        Self { location, observances }
    }

    fn offset_at(&self, local: NaiveDateTime) -> Option<i32> {
        let current = self
            .observances
            .iter()
            .filter_map(|o| o.last_onset_before(local).map(|onset| (onset, o.offset_to)))
            .max_by_key(|(onset, _)| *onset)
            .map(|(_, offset)| offset);

        current.or_else(|| {
            self.observances
                .iter()
                .min_by_key(|o| o.onset)
                .map(|o| o.offset_from)
        })
    }
}

/// TZIDs declared by the feed plus lookup into chrono-tz.
#[derive(Debug, Clone, Default)]
pub struct TimezoneTable {
    zones: HashMap<String, EmbeddedZone>,
}

impl TimezoneTable {
    pub fn from_calendar(calendar: &Component) -> Self {
        let zones = calendar
            .children_named("VTIMEZONE")
            .filter_map(|c| {
                let tzid = c.property("TZID")?.value.trim().to_string();
                Some((tzid, EmbeddedZone::from_component(c)))
            })
            .collect();
        Self { zones }
    }

    pub fn len(&self) -> usize {
        self.zones.len()
    }

    /// Instant for a wall-clock time in `tzid`, or `None` when the zone is unknown.
    pub fn resolve(&self, tzid: &str, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        let tzid = tzid.trim().trim_matches('"');

        if let Some(instant) = resolve_named(tzid, local) {
            return Some(instant);
        }

        let zone = self.zones.get(tzid)?;
        if let Some(instant) = zone.location.as_deref().and_then(|name| resolve_named(name, local)) {
            return Some(instant);
        }

        let offset = zone.offset_at(local)?;
        debug!("Resolved {} from embedded observances (offset {}s)", tzid, offset);
        Some((local - Duration::seconds(i64::from(offset))).and_utc())
    }
}

fn resolve_named(name: &str, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    let name = name.trim_start_matches('/');
    let zone = Tz::from_str(name).ok().or_else(|| {
        WINDOWS_ZONES
            .iter()
            .find(|(windows, _)| windows.eq_ignore_ascii_case(name))
            .and_then(|(_, iana)| Tz::from_str(iana).ok())
    })?;

    zone.from_local_datetime(&local)
        .earliest()
        // inside a DST gap: the wall clock is read with the pre-transition offset
        .or_else(|| zone.from_local_datetime(&(local + Duration::hours(1))).earliest().map(|dt| dt - Duration::hours(1)))
        .map(|dt| dt.with_timezone(&Utc))
}
