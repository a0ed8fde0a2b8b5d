use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::MatchTier;
use crate::models::{DestinationIds, Diagnostic, Event, TrackedEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedCreate {
    pub event: Event,
    pub content_hash: String,
    /// Record whose destination item vanished; kept if the create fails.
    pub replaces: Option<TrackedEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedUpdate {
    pub event: Event,
    pub content_hash: String,
    pub ids: DestinationIds,
    /// Record carried forward if the update fails.
    pub prior: Option<TrackedEvent>,
    pub tier: MatchTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannedDelete {
    pub record: TrackedEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedReason {
    Identical,
    /// Same content; stored sequence or destination ids refreshed.
    Refreshed,
    /// Untracked destination item taken over without a write.
    Adopted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Unchanged {
    pub source_uid: String,
    /// Record to keep for this event.
    pub record: TrackedEvent,
    pub reason: UnchangedReason,
}

impl Unchanged {
    pub fn is_adoption(&self) -> bool {
        self.reason == UnchangedReason::Adopted
    }
}

/// Everything one pass intends to do, in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationPlan {
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub creates: Vec<PlannedCreate>,
    pub updates: Vec<PlannedUpdate>,
    pub deletes: Vec<PlannedDelete>,
    pub unchanged: Vec<Unchanged>,
    /// Prior records left as they are: orphans when deletion is off, and
    /// events still in the feed but outside the window.
    pub retained: Vec<TrackedEvent>,
    pub diagnostics: Vec<Diagnostic>,
}

impl OperationPlan {
    pub fn new(window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            window_start,
            window_end,
            creates: Vec::new(),
            updates: Vec::new(),
            deletes: Vec::new(),
            unchanged: Vec::new(),
            retained: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Number of destination writes.
    pub fn operation_count(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    pub fn has_writes(&self) -> bool {
        self.operation_count() > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to create, {} to update, {} to delete, {} unchanged, {} retained",
            self.creates.len(),
            self.updates.len(),
            self.deletes.len(),
            self.unchanged.len(),
            self.retained.len()
        )
    }
}
