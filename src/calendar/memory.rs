//! In-process [`CalendarStore`] used by tests and dry integrations.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{extract_marker, CalendarStore, DestinationItem};
use crate::models::{DestinationIds, Event, OperationKind};

#[derive(Debug, Clone)]
struct StoredItem {
    ids: DestinationIds,
    calendar: String,
    event: Event,
}

impl StoredItem {
    fn view(&self) -> DestinationItem {
        DestinationItem {
            ids: self.ids.clone(),
            title: self.event.title.clone(),
            start: self.event.start.instant(),
            marker: self.event.description.as_deref().and_then(extract_marker),
        }
    }
}

#[derive(Debug, Default)]
struct Faults {
    /// (operation, sync key) pairs that fail.
    writes: HashSet<(OperationKind, String)>,
    resolve: bool,
    list: bool,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Inner {
    /// Keyed by primary id.
    items: BTreeMap<String, StoredItem>,
    faults: Faults,
    log: Vec<(OperationKind, String)>,
}

#[derive(Debug, Default)]
pub struct MemoryCalendarStore {
    inner: RwLock<Inner>,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

impl MemoryCalendarStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `kind` write for `key` fail until cleared.
    pub async fn fail_writes(&self, kind: OperationKind, key: &str) {
        self.inner.write().await.faults.writes.insert((kind, key.to_string()));
    }

    pub async fn fail_resolve(&self, failing: bool) {
        self.inner.write().await.faults.resolve = failing;
    }

    pub async fn fail_list(&self, failing: bool) {
        self.inner.write().await.faults.list = failing;
    }

    pub async fn set_latency(&self, latency: Option<Duration>) {
        self.inner.write().await.faults.latency = latency;
    }

    pub async fn clear_faults(&self) {
        self.inner.write().await.faults = Faults::default();
    }

    /// Put an item in place without going through the engine.
    pub async fn insert_existing(&self, calendar: &str, event: Event) -> DestinationIds {
        let ids = DestinationIds::new(new_id(), Some(new_id()));
        self.inner.write().await.items.insert(
            ids.primary.clone(),
            StoredItem {
                ids: ids.clone(),
                calendar: calendar.to_string(),
                event,
            },
        );
        ids
    }

    /// Give the item a new secondary id, as stores do after a local rebuild.
    pub async fn renumber(&self, primary: &str) -> Option<DestinationIds> {
        let mut inner = self.inner.write().await;
        let item = inner.items.get_mut(primary)?;
        item.ids.secondary = Some(new_id());
        Some(item.ids.clone())
    }

    /// Delete an item behind the engine's back.
    pub async fn remove_externally(&self, primary: &str) -> bool {
        self.inner.write().await.items.remove(primary).is_some()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn events(&self, calendar: &str) -> Vec<Event> {
        self.inner
            .read()
            .await
            .items
            .values()
            .filter(|item| item.calendar == calendar)
            .map(|item| item.event.clone())
            .collect()
    }

    pub async fn get(&self, primary: &str) -> Option<Event> {
        self.inner.read().await.items.get(primary).map(|item| item.event.clone())
    }

    /// Successful writes so far, in order, as (operation, sync key).
    pub async fn write_log(&self) -> Vec<(OperationKind, String)> {
        self.inner.read().await.log.clone()
    }

    pub async fn clear_log(&self) {
        self.inner.write().await.log.clear();
    }

    async fn pause(&self) {
        let latency = self.inner.read().await.faults.latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

#[async_trait]
impl CalendarStore for MemoryCalendarStore {
    async fn create(&self, event: &Event, calendar: &str) -> Result<DestinationIds> {
        self.pause().await;
        let key = event.sync_key();
        let mut inner = self.inner.write().await;
        if inner.faults.writes.contains(&(OperationKind::Create, key.clone())) {
            return Err(anyhow!("calendar rejected the new event"));
        }

        let ids = DestinationIds::new(new_id(), Some(new_id()));
        inner.items.insert(
            ids.primary.clone(),
            StoredItem {
                ids: ids.clone(),
                calendar: calendar.to_string(),
                event: event.clone(),
            },
        );
        inner.log.push((OperationKind::Create, key));
        Ok(ids)
    }

    async fn update(&self, ids: &DestinationIds, event: &Event) -> Result<DestinationIds> {
        self.pause().await;
        let key = event.sync_key();
        let mut inner = self.inner.write().await;
        if inner.faults.writes.contains(&(OperationKind::Update, key.clone())) {
            return Err(anyhow!("calendar rejected the change"));
        }

        let item = inner
            .items
            .get_mut(&ids.primary)
            .ok_or_else(|| anyhow!("item {} not found", ids.primary))?;
        item.event = event.clone();
        let current = item.ids.clone();
        inner.log.push((OperationKind::Update, key));
        Ok(current)
    }

    async fn delete(&self, ids: &DestinationIds) -> Result<()> {
        self.pause().await;
        let mut inner = self.inner.write().await;
        let key = inner
            .items
            .get(&ids.primary)
            .map(|item| item.event.sync_key())
            .unwrap_or_else(|| ids.primary.clone());
        if inner.faults.writes.contains(&(OperationKind::Delete, key.clone())) {
            return Err(anyhow!("calendar refused to delete the event"));
        }

        inner.items.remove(&ids.primary);
        inner.log.push((OperationKind::Delete, key));
        Ok(())
    }

    async fn resolve(&self, ids: &DestinationIds) -> Result<Option<DestinationItem>> {
        let inner = self.inner.read().await;
        if inner.faults.resolve {
            return Err(anyhow!("calendar lookup unavailable"));
        }
        Ok(inner.items.get(&ids.primary).map(StoredItem::view))
    }

    async fn list(&self, calendar: &str, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<DestinationItem>> {
        let inner = self.inner.read().await;
        if inner.faults.list {
            return Err(anyhow!("calendar listing unavailable"));
        }
        Ok(inner
            .items
            .values()
            .filter(|item| item.calendar == calendar)
            .filter(|item| {
                let start = item.event.start.instant();
                item.event.is_recurring() || (start >= from && start <= to)
            })
            .map(StoredItem::view)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::destination_payload;
    use crate::models::EventTime;
    use chrono::TimeZone;

    fn event(uid: &str) -> Event {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        Event::new(uid, "Review", EventTime::Utc(start), EventTime::Utc(start))
    }

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        (
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_create_resolve_delete() {
        let store = MemoryCalendarStore::new();
        let ids = store.create(&destination_payload(&event("a")), "Work").await.unwrap();

        let item = store.resolve(&ids).await.unwrap().unwrap();
        assert_eq!(item.marker.as_deref(), Some("a"));
        assert_eq!(item.title, "Review");

        store.delete(&ids).await.unwrap();
        assert!(store.resolve(&ids).await.unwrap().is_none());
        // already gone
        assert!(store.delete(&ids).await.is_ok());
        assert_eq!(store.write_log().await.len(), 3);
    }

    #[tokio::test]
    async fn test_injected_write_failure() {
        let store = MemoryCalendarStore::new();
        store.fail_writes(OperationKind::Create, "a").await;
        assert!(store.create(&event("a"), "Work").await.is_err());
        assert!(store.create(&event("b"), "Work").await.is_ok());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_update_missing_item_fails() {
        let store = MemoryCalendarStore::new();
        let ids = DestinationIds::new("nope", None);
        assert!(store.update(&ids, &event("a")).await.is_err());
    }

    #[tokio::test]
    async fn test_list_filters_calendar_and_window() {
        let store = MemoryCalendarStore::new();
        store.insert_existing("Work", event("in")).await;
        store.insert_existing("Home", event("other-calendar")).await;

        let mut old = event("old");
        old.start = EventTime::Utc(Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap());
        store.insert_existing("Work", old).await;

        let (from, to) = window();
        let listed = store.list("Work", from, to).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].marker.is_none());
    }

    #[tokio::test]
    async fn test_renumber_changes_secondary_only() {
        let store = MemoryCalendarStore::new();
        let ids = store.insert_existing("Work", event("a")).await;
        let renumbered = store.renumber(&ids.primary).await.unwrap();
        assert_eq!(renumbered.primary, ids.primary);
        assert_ne!(renumbered.secondary, ids.secondary);
    }
}
