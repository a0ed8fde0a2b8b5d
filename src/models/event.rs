// file: src/models/event.rs
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recurrence::RecurrenceRule;

/// A DTSTART/DTEND/EXDATE style value as it appeared in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    /// All-day value (`VALUE=DATE`).
    Date(NaiveDate),
    /// No zone; interpreted in the destination's local zone when applied.
    Floating(NaiveDateTime),
    Utc(DateTime<Utc>),
    Zoned {
        local: NaiveDateTime,
        tzid: String,
        instant: DateTime<Utc>,
    },
}

impl EventTime {
    /// Instant used for windowing and fuzzy comparison.
    ///
    /// Dates map to midnight UTC and floating times are read as UTC, so the
    /// result is stable regardless of the host zone.
    pub fn instant(&self) -> DateTime<Utc> {
        match self {
            EventTime::Date(date) => date
                .and_hms_opt(0, 0, 0)
                .map(|dt| dt.and_utc())
                .unwrap_or_default(),
            EventTime::Floating(local) => local.and_utc(),
            EventTime::Utc(dt) => *dt,
            EventTime::Zoned { instant, .. } => *instant,
        }
    }

    pub fn is_date(&self) -> bool {
        matches!(self, EventTime::Date(_))
    }

    pub fn tzid(&self) -> Option<&str> {
        match self {
            EventTime::Zoned { tzid, .. } => Some(tzid),
            _ => None,
        }
    }

    /// Offset of the wall-clock value from UTC, when it is known.
    pub fn utc_offset_seconds(&self) -> Option<i64> {
        match self {
            EventTime::Utc(_) => Some(0),
            EventTime::Zoned { local, instant, .. } => {
                Some((*local - instant.naive_utc()).num_seconds())
            }
            _ => None,
        }
    }

    /// Stable textual form including the zone; used for hashing and keys.
    pub fn canonical(&self) -> String {
        match self {
            EventTime::Date(date) => date.format("%Y%m%d").to_string(),
            EventTime::Floating(local) => local.format("%Y%m%dT%H%M%S").to_string(),
            EventTime::Utc(dt) => dt.format("%Y%m%dT%H%M%SZ").to_string(),
            EventTime::Zoned { local, tzid, .. } => {
                format!("TZID={}:{}", tzid, local.format("%Y%m%dT%H%M%S"))
            }
        }
    }

    /// Shift the value by `delta`, keeping its form.
    pub fn shifted(&self, delta: chrono::Duration) -> EventTime {
        match self {
            EventTime::Date(date) => {
                EventTime::Date(*date + chrono::Duration::days(delta.num_days()))
            }
            EventTime::Floating(local) => EventTime::Floating(*local + delta),
            EventTime::Utc(dt) => EventTime::Utc(*dt + delta),
            EventTime::Zoned {
                local,
                tzid,
                instant,
            } => EventTime::Zoned {
                local: *local + delta,
                tzid: tzid.clone(),
                instant: *instant + delta,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Tentative,
    Confirmed,
    Cancelled,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Tentative => "TENTATIVE",
            EventStatus::Confirmed => "CONFIRMED",
            EventStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "TENTATIVE" => Some(EventStatus::Tentative),
            "CONFIRMED" => Some(EventStatus::Confirmed),
            "CANCELLED" => Some(EventStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transparency {
    #[default]
    Opaque,
    Transparent,
}

impl Transparency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transparency::Opaque => "OPAQUE",
            Transparency::Transparent => "TRANSPARENT",
        }
    }
}

/// ORGANIZER or ATTENDEE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub address: String,
    pub name: Option<String>,
    pub status: Option<String>,
}

/// A property the parser does not model, kept as written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawProperty {
    pub name: String,
    pub params: Vec<(String, String)>,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub uid: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub url: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
    pub sequence: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub stamp: Option<DateTime<Utc>>,
    pub recurrence: Option<RecurrenceRule>,
    pub recurrence_id: Option<EventTime>,
    pub exception_dates: Vec<EventTime>,
    pub recurrence_dates: Vec<EventTime>,
    /// Seconds relative to the start; negative values fire before it.
    pub reminders: Vec<i64>,
    pub status: Option<EventStatus>,
    pub transparency: Transparency,
    pub organizer: Option<Person>,
    pub attendees: Vec<Person>,
    pub categories: Vec<String>,
    pub priority: Option<u8>,
    pub time_zone: Option<String>,
    pub extra_properties: Vec<RawProperty>,
    /// Override instances folded in by the reconciler.
    pub overrides: Vec<Event>,
    /// Source text of the block, for diagnostics.
    pub raw: String,
}

impl Event {
    pub fn new(uid: impl Into<String>, title: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        let all_day = start.is_date();
        let time_zone = start.tzid().map(str::to_string);
        Self {
            uid: uid.into(),
            title: title.into(),
            description: None,
            location: None,
            url: None,
            start,
            end,
            all_day,
            sequence: 0,
            last_modified: None,
            stamp: None,
            recurrence: None,
            recurrence_id: None,
            exception_dates: Vec::new(),
            recurrence_dates: Vec::new(),
            reminders: Vec::new(),
            status: None,
            transparency: Transparency::default(),
            organizer: None,
            attendees: Vec::new(),
            categories: Vec::new(),
            priority: None,
            time_zone,
            extra_properties: Vec::new(),
            overrides: Vec::new(),
            raw: String::new(),
        }
    }

    /// Identity used for tracking and for the embedded marker.
    ///
    /// Detached override instances (RECURRENCE-ID without their master in the
    /// feed) are keyed by UID and recurrence id so they never collide with the
    /// master's record.
    pub fn sync_key(&self) -> String {
        match &self.recurrence_id {
            Some(rid) => format!("{}@{}", self.uid, rid.canonical()),
            None => self.uid.clone(),
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.recurrence.is_some() || !self.recurrence_dates.is_empty()
    }

    pub fn is_override(&self) -> bool {
        self.recurrence_id.is_some()
    }
}
