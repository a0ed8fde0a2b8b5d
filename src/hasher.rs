//! Content fingerprints for change detection.
//!
//! The digest covers the fields that change what the destination item looks
//! like. Sequence, LAST-MODIFIED and DTSTAMP are left out so metadata-only
//! bumps from the source never force an update on their own.

use sha2::{Digest, Sha256};

use crate::models::{Event, EventTime};

/// Length of the prefix shown in logs.
pub const SHORT_HASH_LEN: usize = 8;

struct CanonicalWriter {
    hasher: Sha256,
}

impl CanonicalWriter {
    fn new() -> Self {
        Self { hasher: Sha256::new() }
    }

    /// `tag:len:value;` so no two field tuples can concatenate to the same bytes.
    fn field(&mut self, tag: &str, value: &str) {
        self.hasher.update(tag.as_bytes());
        self.hasher.update(b":");
        self.hasher.update(value.len().to_string().as_bytes());
        self.hasher.update(b":");
        self.hasher.update(value.as_bytes());
        self.hasher.update(b";");
    }

    fn optional(&mut self, tag: &str, value: Option<&str>) {
        match value {
            Some(value) => self.field(tag, value),
            // distinct from Some("")
            None => self.field(&format!("{}?", tag), ""),
        }
    }

    fn list(&mut self, tag: &str, mut values: Vec<String>) {
        values.sort();
        self.field(&format!("{}#", tag), &values.len().to_string());
        for value in &values {
            self.field(tag, value);
        }
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

fn canonical_times(times: &[EventTime]) -> Vec<String> {
    times.iter().map(EventTime::canonical).collect()
}

/// 64-character lowercase hex SHA-256 of the event's content.
pub fn hash_event(event: &Event) -> String {
    let mut writer = CanonicalWriter::new();

    writer.field("uid", &event.uid);
    writer.field("title", &event.title);
    writer.optional("description", event.description.as_deref());
    writer.optional("location", event.location.as_deref());
    writer.field("start", &event.start.canonical());
    writer.field("end", &event.end.canonical());
    writer.field("all_day", if event.all_day { "1" } else { "0" });
    writer.optional("rrule", event.recurrence.as_ref().map(|r| r.canonical_form()).as_deref());
    writer.list("exdate", canonical_times(&event.exception_dates));
    writer.list(
        "reminder",
        event.reminders.iter().map(|offset| offset.to_string()).collect(),
    );
    writer.optional("status", event.status.map(|s| s.as_str()));
    writer.field("transp", event.transparency.as_str());
    writer.list("rdate", canonical_times(&event.recurrence_dates));
    writer.list("override", event.overrides.iter().map(hash_event).collect());

    writer.finish()
}

/// First eight hex characters of [`hash_event`], for diagnostics.
pub fn short_hash(event: &Event) -> String {
    short(&hash_event(event))
}

pub fn short(hash: &str) -> String {
    hash.chars().take(SHORT_HASH_LEN).collect()
}

pub fn are_equal(a: &Event, b: &Event) -> bool {
    hash_event(a) == hash_event(b)
}
