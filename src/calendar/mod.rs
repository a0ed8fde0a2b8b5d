// Destination calendar and feed source interfaces.
//
// The engine only talks to these traits; concrete adapters live in the
// submodules.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::{DestinationIds, Event};

pub mod common;
pub mod memory;
pub mod source;

pub use memory::MemoryCalendarStore;
pub use source::{FeedSource, HttpFeedSource, StaticFeedSource};

const MARKER_PREFIX: &str = "[SYNC-UID:";

lazy_static! {
    // `\` and `]` inside the key are backslash-escaped
    static ref MARKER_RE: Regex =
        Regex::new(r"\[SYNC-UID:((?:[^\]\\\r\n]|\\[^\r\n])+)\]").expect("marker pattern is valid");
}

/// What the destination knows about one of its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationItem {
    /// Current ids; the secondary id may differ from the one last recorded.
    pub ids: DestinationIds,
    pub title: String,
    pub start: DateTime<Utc>,
    /// Sync key found in the item's notes.
    pub marker: Option<String>,
}

/// A calendar the engine writes into.
///
/// Events handed to `create`/`update` already carry the marker in their
/// description.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CalendarStore: Send + Sync {
    async fn create(&self, event: &Event, calendar: &str) -> Result<DestinationIds>;

    /// Returns the item's ids after the write.
    async fn update(&self, ids: &DestinationIds, event: &Event) -> Result<DestinationIds>;

    /// Deleting an item that is already gone succeeds.
    async fn delete(&self, ids: &DestinationIds) -> Result<()>;

    /// `Ok(None)` means the item is confirmed missing.
    async fn resolve(&self, ids: &DestinationIds) -> Result<Option<DestinationItem>>;

    async fn list(&self, calendar: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DestinationItem>>;
}

pub fn marker_for(key: &str) -> String {
    let escaped = key.replace('\\', "\\\\").replace(']', "\\]");
    format!("{}{}]", MARKER_PREFIX, escaped)
}

fn unescape_key(escaped: &str) -> String {
    let mut key = String::with_capacity(escaped.len());
    let mut chars = escaped.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => key.extend(chars.next()),
            other => key.push(other),
        }
    }
    key
}

/// Notes text with exactly one marker for `key`, appended after the user text.
pub fn embed_marker(notes: Option<&str>, key: &str) -> String {
    let body = notes.map(strip_marker).unwrap_or_default();
    if body.is_empty() {
        marker_for(key)
    } else {
        format!("{}\n\n{}", body, marker_for(key))
    }
}

pub fn extract_marker(notes: &str) -> Option<String> {
    MARKER_RE
        .captures(notes)
        .and_then(|captures| captures.get(1))
        .map(|key| unescape_key(key.as_str().trim()))
        .filter(|key| !key.is_empty())
}

/// Notes text without any marker.
pub fn strip_marker(notes: &str) -> String {
    MARKER_RE.replace_all(notes, "").trim_end().to_string()
}

/// Copy of `event` as it should be written to the destination.
pub fn destination_payload(event: &Event) -> Event {
    let mut payload = event.clone();
    payload.description = Some(embed_marker(event.description.as_deref(), &event.sync_key()));
    payload
}
