//! VEVENT block to [`Event`].

use chrono::Duration;
use log::{debug, warn};

use crate::error::{SyncError, SyncResult};
use crate::models::{Diagnostic, DiagnosticKind, Event, EventStatus, EventTime, Person, Transparency};
use crate::recurrence::RecurrenceRule;

use super::component::Component;
use super::lexer::{self, ContentLine};
use super::timezone::TimezoneTable;
use super::values;

pub const DEFAULT_TITLE: &str = "Untitled Event";

/// Properties that map onto [`Event`] fields; everything else is kept raw.
const MODELED: &[&str] = &[
    "UID",
    "SUMMARY",
    "DESCRIPTION",
    "LOCATION",
    "URL",
    "DTSTART",
    "DTEND",
    "DURATION",
    "SEQUENCE",
    "LAST-MODIFIED",
    "DTSTAMP",
    "RRULE",
    "RECURRENCE-ID",
    "EXDATE",
    "RDATE",
    "STATUS",
    "TRANSP",
    "ORGANIZER",
    "ATTENDEE",
    "CATEGORIES",
    "PRIORITY",
];

struct TimeReader<'a> {
    zones: &'a TimezoneTable,
    uid: &'a str,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> TimeReader<'a> {
    fn read_value(&mut self, property: &ContentLine, value: &str) -> Option<EventTime> {
        let value = value.trim();
        let date_only = property
            .param("VALUE")
            .map_or(value.len() == 8, |v| v.eq_ignore_ascii_case("DATE"));
        if date_only {
            return values::parse_date(value).map(EventTime::Date);
        }

        let (local, utc) = values::parse_date_time(value)?;
        if utc {
            return Some(EventTime::Utc(local.and_utc()));
        }

        let tzid = match property.param("TZID") {
            Some(tzid) => tzid.trim().to_string(),
            None => return Some(EventTime::Floating(local)),
        };
        let instant = match self.zones.resolve(&tzid, local) {
            Some(instant) => instant,
            None => {
                let already_reported = self
                    .diagnostics
                    .iter()
                    .any(|d| d.kind == DiagnosticKind::UnknownTimeZone && d.message.contains(&tzid));
                if !already_reported {
                    self.diagnostics.push(Diagnostic::new(
                        DiagnosticKind::UnknownTimeZone,
                        Some(self.uid.to_string()),
                        Some(property.line),
                        format!("unknown time zone {:?}; local time read as UTC", tzid),
                    ));
                }
                local.and_utc()
            }
        };
        Some(EventTime::Zoned { local, tzid, instant })
    }

    fn read(&mut self, property: &ContentLine) -> Option<EventTime> {
        self.read_value(property, &property.value)
    }

    /// EXDATE/RDATE: comma lists, PERIOD values reduced to their start.
    fn read_list(&mut self, property: &ContentLine) -> Vec<EventTime> {
        property
            .value
            .split(',')
            .filter(|v| !v.trim().is_empty())
            .filter_map(|v| {
                let start = v.split('/').next().unwrap_or(v);
                let parsed = self.read_value(property, start);
                if parsed.is_none() {
                    debug!("Skipping unreadable {} value {:?} at line {}", property.name, v, property.line);
                }
                parsed
            })
            .collect()
    }
}

fn text(property: &ContentLine) -> String {
    lexer::unescape_text(&property.value)
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn person(property: &ContentLine) -> Person {
    let value = property.value.trim();
    let address = value
        .strip_prefix("mailto:")
        .or_else(|| value.strip_prefix("MAILTO:"))
        .unwrap_or(value)
        .to_string();
    Person {
        address,
        name: property.param("CN").map(str::to_string),
        status: property.param("PARTSTAT").map(|s| s.to_ascii_uppercase()),
    }
}

/// Offset in seconds from the event start at which a VALARM fires.
fn reminder_offset(alarm: &Component, start: &EventTime, end: &EventTime) -> Option<i64> {
    let trigger = alarm.property("TRIGGER")?;
    let absolute = trigger
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"));

    if absolute || values::parse_date_time(&trigger.value).is_some() {
        let at = values::parse_utc_stamp(&trigger.value)?;
        return Some((at - start.instant()).num_seconds());
    }

    let offset = values::parse_duration(&trigger.value)?;
    let related_end = trigger
        .param("RELATED")
        .is_some_and(|v| v.eq_ignore_ascii_case("END"));
    let base = if related_end {
        end.instant() - start.instant()
    } else {
        Duration::zero()
    };
    Some((base + offset).num_seconds())
}

/// Build an event from a VEVENT block.
///
/// Hard problems (no UID, no readable DTSTART, broken content lines) are
/// returned as `InvalidEventBlock`. Soft problems (unreadable RRULE, unknown
/// zone) come back as diagnostics next to the event.
pub fn build_event(block: &Component, zones: &TimezoneTable) -> SyncResult<(Event, Vec<Diagnostic>)> {
    if let Some((line, reason)) = block.errors.first() {
        return Err(SyncError::invalid_block(*line, reason.clone()));
    }

    let uid = block
        .property("UID")
        .map(|p| p.value.trim().to_string())
        .filter(|uid| !uid.is_empty())
        .ok_or_else(|| SyncError::invalid_block(block.line, "missing UID"))?;

    let mut reader = TimeReader {
        zones,
        uid: &uid,
        diagnostics: Vec::new(),
    };

    let start_property = block
        .property("DTSTART")
        .ok_or_else(|| SyncError::invalid_block(block.line, format!("missing DTSTART for {}", uid)))?;
    let start = reader.read(start_property).ok_or_else(|| {
        SyncError::invalid_block(
            start_property.line,
            format!("unreadable DTSTART {:?} for {}", start_property.value, uid),
        )
    })?;

    let end = match block.property("DTEND").and_then(|p| reader.read(p)) {
        Some(end) => end,
        None => match block
            .property("DURATION")
            .and_then(|p| values::parse_duration(&p.value))
        {
            Some(duration) => start.shifted(duration),
            None if start.is_date() => start.shifted(Duration::days(1)),
            None => start.clone(),
        },
    };

    let title = block
        .property("SUMMARY")
        .map(text)
        .and_then(non_empty)
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());

    let mut event = Event::new(uid.clone(), title, start, end);

    event.description = block.property("DESCRIPTION").map(text).and_then(non_empty);
    event.location = block.property("LOCATION").map(text).and_then(non_empty);
    event.url = block.property("URL").map(|p| p.value.trim().to_string()).and_then(non_empty);
    event.sequence = block
        .property("SEQUENCE")
        .and_then(|p| p.value.trim().parse::<i64>().ok())
        .unwrap_or(0);
    event.last_modified = block
        .property("LAST-MODIFIED")
        .and_then(|p| values::parse_utc_stamp(&p.value));
    event.stamp = block.property("DTSTAMP").and_then(|p| values::parse_utc_stamp(&p.value));
    event.recurrence_id = block.property("RECURRENCE-ID").and_then(|p| reader.read(p));
    event.status = block.property("STATUS").and_then(|p| EventStatus::parse(&p.value));
    event.transparency = match block.property("TRANSP") {
        Some(p) if p.value.trim().eq_ignore_ascii_case("TRANSPARENT") => Transparency::Transparent,
        _ => Transparency::Opaque,
    };
    event.organizer = block.property("ORGANIZER").map(person);
    event.attendees = block.properties_named("ATTENDEE").map(person).collect();
    event.categories = block
        .properties_named("CATEGORIES")
        .flat_map(|p| lexer::split_text_list(&p.value))
        .collect();
    event.priority = block
        .property("PRIORITY")
        .and_then(|p| p.value.trim().parse::<u8>().ok())
        .filter(|p| *p <= 9);

    for property in block.properties_named("EXDATE") {
        event.exception_dates.extend(reader.read_list(property));
    }
    for property in block.properties_named("RDATE") {
        event.recurrence_dates.extend(reader.read_list(property));
    }

    let mut rules = block.properties_named("RRULE");
    if let Some(rule) = rules.next() {
        match RecurrenceRule::parse(&rule.value, Some(&event.start)) {
            Ok(parsed) => event.recurrence = Some(parsed),
            Err(err) => {
                warn!("Ignoring recurrence rule of {} at line {}: {}", uid, rule.line, err);
                reader.diagnostics.push(Diagnostic::new(
                    DiagnosticKind::InvalidRecurrenceRule,
                    Some(uid.clone()),
                    Some(rule.line),
                    err.to_string(),
                ));
            }
        }
    }
    // only the first RRULE is modeled; the rest stay raw
    event.extra_properties.extend(rules.map(ContentLine::to_raw_property));

    event.reminders = block
        .children_named("VALARM")
        .filter_map(|alarm| reminder_offset(alarm, &event.start, &event.end))
        .collect();

    event.extra_properties.extend(
        block
            .properties
            .iter()
            .filter(|p| !MODELED.contains(&p.name.as_str()))
            .map(ContentLine::to_raw_property),
    );
    event.raw = block.raw_text();

    Ok((event, reader.diagnostics))
}
