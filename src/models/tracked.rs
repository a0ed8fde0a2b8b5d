// file: src/models/tracked.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::BTreeMap;

/// Identifiers of an item in the destination calendar store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationIds {
    /// Stable identifier.
    pub primary: String,
    /// Volatile identifier; stores may renumber it between runs.
    pub secondary: Option<String>,
}

impl DestinationIds {
    pub fn new(primary: impl Into<String>, secondary: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            secondary,
        }
    }
}

/// What the engine remembers about one synced logical event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TrackedEvent {
    pub source_uid: String,
    pub primary_id: String,
    pub secondary_id: Option<String>,
    pub content_hash: String,
    pub sequence: i64,
    pub last_synced: DateTime<Utc>,
}

impl TrackedEvent {
    pub fn new(
        source_uid: impl Into<String>,
        ids: &DestinationIds,
        content_hash: impl Into<String>,
        sequence: i64,
        last_synced: DateTime<Utc>,
    ) -> Self {
        Self {
            source_uid: source_uid.into(),
            primary_id: ids.primary.clone(),
            secondary_id: ids.secondary.clone(),
            content_hash: content_hash.into(),
            sequence,
            last_synced,
        }
    }

    pub fn ids(&self) -> DestinationIds {
        DestinationIds::new(self.primary_id.clone(), self.secondary_id.clone())
    }

    pub fn with_ids(mut self, ids: &DestinationIds) -> Self {
        self.primary_id = ids.primary.clone();
        self.secondary_id = ids.secondary.clone();
        self
    }
}

/// Complete set of tracked records, keyed by sync key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    records: BTreeMap<String, TrackedEvent>,
}

impl StateSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I: IntoIterator<Item = TrackedEvent>>(records: I) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.source_uid.clone(), record))
                .collect(),
        }
    }

    pub fn get(&self, source_uid: &str) -> Option<&TrackedEvent> {
        self.records.get(source_uid)
    }

    pub fn insert(&mut self, record: TrackedEvent) -> Option<TrackedEvent> {
        self.records.insert(record.source_uid.clone(), record)
    }

    pub fn remove(&mut self, source_uid: &str) -> Option<TrackedEvent> {
        self.records.remove(source_uid)
    }

    pub fn records(&self) -> impl Iterator<Item = &TrackedEvent> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when some record points at the given destination item.
    pub fn references(&self, primary_id: &str) -> bool {
        self.records.values().any(|r| r.primary_id == primary_id)
    }
}
