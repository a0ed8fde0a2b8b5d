//! iCalendar feed parsing.
//!
//! [`FeedParser::new`] checks the block structure of the whole feed up front
//! and fails with `MalformedFeed` when it is broken. Event blocks are then
//! converted lazily by [`FeedParser::events`]; a bad block only costs that
//! block.

mod component;
mod convert;
mod lexer;
mod timezone;
mod values;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::models::{Diagnostic, DiagnosticKind, Event};

use component::Component;
use timezone::TimezoneTable;

pub use convert::DEFAULT_TITLE;
pub use lexer::{split_text_list, unescape_text, unfold};
pub use values::{parse_duration, parse_utc_offset};

/// Everything a pass needs from one feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedFeed {
    pub events: Vec<Event>,
    pub diagnostics: Vec<Diagnostic>,
    pub calendar_name: Option<String>,
    /// `X-WR-TIMEZONE`, when the feed declares one.
    pub default_time_zone: Option<String>,
}

pub struct FeedParser {
    event_blocks: Vec<Component>,
    zones: TimezoneTable,
    calendar_name: Option<String>,
    default_time_zone: Option<String>,
}

impl FeedParser {
    pub fn new(text: &str) -> SyncResult<Self> {
        let calendar = component::parse_calendar(text)?;
        let zones = TimezoneTable::from_calendar(&calendar);

        let calendar_name = calendar
            .property("X-WR-CALNAME")
            .map(|p| unescape_text(&p.value));
        let default_time_zone = calendar
            .property("X-WR-TIMEZONE")
            .map(|p| p.value.trim().to_string());

        let event_blocks: Vec<Component> = calendar
            .children
            .into_iter()
            .filter(|c| c.name == "VEVENT")
            .collect();

        debug!(
            "Indexed feed: {} event blocks, {} embedded time zones",
            event_blocks.len(),
            zones.len()
        );

        Ok(Self {
            event_blocks,
            zones,
            calendar_name,
            default_time_zone,
        })
    }

    pub fn block_count(&self) -> usize {
        self.event_blocks.len()
    }

    pub fn calendar_name(&self) -> Option<&str> {
        self.calendar_name.as_deref()
    }

    pub fn default_time_zone(&self) -> Option<&str> {
        self.default_time_zone.as_deref()
    }

    /// Events in feed order. Each call starts from the first block again.
    pub fn events(&self) -> EventIter<'_> {
        EventIter {
            blocks: self.event_blocks.iter(),
            zones: &self.zones,
            diagnostics: Vec::new(),
            reported_zones: Vec::new(),
        }
    }

    /// Convert every block; invalid blocks become diagnostics.
    pub fn parse_all(&self) -> ParsedFeed {
        let mut iter = self.events();
        let mut events = Vec::with_capacity(self.event_blocks.len());
        let mut diagnostics = Vec::new();

        for result in iter.by_ref() {
            match result {
                Ok(event) => events.push(event),
                Err(err) => {
                    warn!("Skipping event block: {}", err.to_safe_string());
                    diagnostics.push(block_diagnostic(&err));
                }
            }
        }
        diagnostics.extend(iter.take_diagnostics());

        ParsedFeed {
            events,
            diagnostics,
            calendar_name: self.calendar_name.clone(),
            default_time_zone: self.default_time_zone.clone(),
        }
    }
}

fn block_diagnostic(err: &SyncError) -> Diagnostic {
    match err {
        SyncError::InvalidEventBlock { line, reason } => {
            Diagnostic::new(DiagnosticKind::InvalidEventBlock, None, Some(*line), reason.clone())
        }
        other => Diagnostic::new(DiagnosticKind::InvalidEventBlock, None, None, other.to_string()),
    }
}

/// Lazy conversion of event blocks.
///
/// Soft problems found along the way are collected and can be drained with
/// [`EventIter::take_diagnostics`].
pub struct EventIter<'a> {
    blocks: std::slice::Iter<'a, Component>,
    zones: &'a TimezoneTable,
    diagnostics: Vec<Diagnostic>,
    reported_zones: Vec<String>,
}

impl<'a> EventIter<'a> {
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// An unknown zone is reported once per feed, not once per event using it.
    fn push_diagnostic(&mut self, diagnostic: Diagnostic) {
        if diagnostic.kind == DiagnosticKind::UnknownTimeZone {
            let zone = diagnostic.message.clone();
            if self.reported_zones.contains(&zone) {
                return;
            }
            self.reported_zones.push(zone);
        }
        self.diagnostics.push(diagnostic);
    }
}

impl<'a> Iterator for EventIter<'a> {
    type Item = SyncResult<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        let block = self.blocks.next()?;
        Some(convert::build_event(block, self.zones).map(|(event, diagnostics)| {
            for diagnostic in diagnostics {
                self.push_diagnostic(diagnostic);
            }
            event
        }))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.blocks.size_hint()
    }
}

/// Parse a whole feed in one call.
pub fn parse_feed(text: &str) -> SyncResult<ParsedFeed> {
    Ok(FeedParser::new(text)?.parse_all())
}
