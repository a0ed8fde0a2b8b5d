// feedsync library
// Keeps a destination calendar in step with a published ICS feed

pub mod calendar;
pub mod config;
pub mod database;
pub mod engine;
pub mod error;
pub mod feed;
pub mod hasher;
pub mod http_config;
pub mod identity;
pub mod models;
pub mod reconcile;
pub mod recurrence;
pub mod utils;

// Re-export commonly used types
pub use calendar::{CalendarStore, FeedSource, HttpFeedSource, MemoryCalendarStore, StaticFeedSource};
pub use config::{SyncConfig, SyncWindow};
pub use database::{Database, MemoryStateStore, StateStore};
pub use engine::SyncEngine;
pub use error::{SyncError, SyncResult};
pub use feed::{parse_feed, FeedParser, ParsedFeed};
pub use models::*;
pub use reconcile::{plan, reconcile, OperationPlan};
pub use recurrence::RecurrenceRule;
