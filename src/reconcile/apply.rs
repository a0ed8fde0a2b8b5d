use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::plan::OperationPlan;
use crate::calendar::{destination_payload, CalendarStore};
use crate::error::{SyncError, SyncResult};
use crate::models::{OperationKind, StateSnapshot, SyncReport, TrackedEvent};
use crate::utils::logging;

pub struct ApplyOptions<'a> {
    pub calendar: &'a str,
    /// Upper bound for each single store call.
    pub operation_timeout: Duration,
    pub cancel: &'a CancellationToken,
    pub now: DateTime<Utc>,
}

#[derive(Debug)]
pub struct ApplyOutcome {
    pub report: SyncReport,
    /// Snapshot to persist in place of the prior one.
    pub snapshot: StateSnapshot,
}

/// Run the plan's writes one at a time: creates, then updates, then deletes.
///
/// A failed write is recorded and the next one proceeds. Cancellation is
/// checked between writes and abandons the pass with `SyncError::Cancelled`.
pub async fn apply_plan(
    plan: &OperationPlan,
    store: &dyn CalendarStore,
    options: &ApplyOptions<'_>,
) -> SyncResult<ApplyOutcome> {
    let mut report = SyncReport::empty();
    report.sync_time = options.now;
    report.diagnostics = plan.diagnostics.clone();

    let mut next = StateSnapshot::new();
    for record in &plan.retained {
        next.insert(record.clone());
    }
    for kept in &plan.unchanged {
        if kept.is_adoption() {
            report.adopted += 1;
        } else {
            report.unchanged += 1;
        }
        next.insert(kept.record.clone());
    }

    for create in &plan.creates {
        check_cancelled(options.cancel)?;
        let key = create.event.sync_key();
        let payload = destination_payload(&create.event);

        match guarded(options.operation_timeout, store.create(&payload, options.calendar)).await {
            Ok(ids) => {
                debug!("Created {} as {}", key, ids.primary);
                next.insert(TrackedEvent::new(
                    key,
                    &ids,
                    create.content_hash.clone(),
                    create.event.sequence,
                    options.now,
                ));
                report.created += 1;
            }
            Err(detail) => {
                fail(&mut report, &key, OperationKind::Create, detail);
                if let Some(prior) = &create.replaces {
                    next.insert(prior.clone());
                }
            }
        }
    }

    for update in &plan.updates {
        check_cancelled(options.cancel)?;
        let key = update.event.sync_key();
        let payload = destination_payload(&update.event);

        match guarded(options.operation_timeout, store.update(&update.ids, &payload)).await {
            Ok(ids) => {
                debug!("Updated {} ({:?} match)", key, update.tier);
                let sequence = update
                    .prior
                    .as_ref()
                    .map_or(update.event.sequence, |p| p.sequence.max(update.event.sequence));
                next.insert(TrackedEvent::new(
                    key,
                    &ids,
                    update.content_hash.clone(),
                    sequence,
                    options.now,
                ));
                report.updated += 1;
            }
            Err(detail) => {
                fail(&mut report, &key, OperationKind::Update, detail);
                if let Some(prior) = &update.prior {
                    next.insert(prior.clone());
                }
            }
        }
    }

    for delete in &plan.deletes {
        check_cancelled(options.cancel)?;
        let record = &delete.record;

        match guarded(options.operation_timeout, store.delete(&record.ids())).await {
            Ok(()) => {
                debug!("Deleted orphan {}", record.source_uid);
                report.deleted += 1;
            }
            Err(detail) => {
                fail(&mut report, &record.source_uid, OperationKind::Delete, detail);
                next.insert(record.clone());
            }
        }
    }

    info!(
        "Applied plan: {} created, {} updated, {} deleted, {} failed",
        report.created, report.updated, report.deleted, report.failed
    );
    Ok(ApplyOutcome { report, snapshot: next })
}

fn check_cancelled(cancel: &CancellationToken) -> SyncResult<()> {
    if cancel.is_cancelled() {
        info!("Pass cancelled; prior state left in place");
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Await one store call under `limit`, flattening failures to a message.
async fn guarded<T, F>(limit: Duration, operation: F) -> std::result::Result<T, String>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{:#}", e)),
        Err(_) => Err(format!("timed out after {}ms", limit.as_millis())),
    }
}

fn fail(report: &mut SyncReport, key: &str, kind: OperationKind, detail: String) {
    logging::log_operation_failure(kind, key, &detail);
    report.record_failure(key, kind, detail);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{DestinationItem, MockCalendarStore};
    use crate::config::SyncWindow;
    use crate::identity::DestinationView;
    use crate::models::{DestinationIds, Event, EventTime, PassStatus};
    use crate::reconcile::{plan, reconcile, PlanOptions};
    use anyhow::anyhow;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn event(uid: &str) -> Event {
        let start = now() + ChronoDuration::days(2);
        Event::new(uid, uid.to_uppercase(), EventTime::Utc(start), EventTime::Utc(start))
    }

    fn record(e: &Event, primary: &str) -> TrackedEvent {
        TrackedEvent::new(
            e.sync_key(),
            &DestinationIds::new(primary, None),
            crate::hasher::hash_event(e),
            e.sequence,
            now(),
        )
    }

    fn options<'a>(cancel: &'a CancellationToken) -> ApplyOptions<'a> {
        ApplyOptions {
            calendar: "Work",
            operation_timeout: Duration::from_secs(5),
            cancel,
            now: now(),
        }
    }

    #[tokio::test]
    async fn test_create_failure_does_not_stop_others() {
        let plan = reconcile(
            vec![event("a"), event("b")],
            &StateSnapshot::new(),
            SyncWindow::default(),
            false,
            now(),
        );

        let mut store = MockCalendarStore::new();
        store.expect_create().times(2).returning(|event, _| {
            if event.uid == "a" {
                Err(anyhow!("quota exceeded"))
            } else {
                Ok(DestinationIds::new("p-b", None))
            }
        });

        let cancel = CancellationToken::new();
        let outcome = apply_plan(&plan, &store, &options(&cancel)).await.unwrap();
        assert_eq!(outcome.report.created, 1);
        assert_eq!(outcome.report.failed, 1);
        assert_eq!(outcome.report.failures[0].uid, "a");
        assert_eq!(outcome.report.failures[0].kind, OperationKind::Create);
        assert_eq!(outcome.report.status(), PassStatus::CompletedWithErrors);
        assert!(outcome.snapshot.get("a").is_none());
        assert_eq!(outcome.snapshot.get("b").unwrap().primary_id, "p-b");
    }

    #[tokio::test]
    async fn test_payload_carries_marker() {
        let plan = reconcile(vec![event("a")], &StateSnapshot::new(), SyncWindow::default(), false, now());

        let mut store = MockCalendarStore::new();
        store
            .expect_create()
            .withf(|event, calendar| {
                calendar == "Work" && event.description.as_deref().map_or(false, |d| d.contains("[SYNC-UID:a]"))
            })
            .times(1)
            .returning(|_, _| Ok(DestinationIds::new("p-a", None)));

        let cancel = CancellationToken::new();
        let outcome = apply_plan(&plan, &store, &options(&cancel)).await.unwrap();
        assert_eq!(outcome.report.created, 1);
    }

    #[tokio::test]
    async fn test_failed_update_and_delete_keep_prior_records() {
        let a = event("a");
        let gone = event("gone");
        let prior = StateSnapshot::from_records(vec![record(&a, "p-a"), record(&gone, "p-gone")]);
        let mut changed = a.clone();
        changed.title = "Renamed".to_string();
        let plan = reconcile(vec![changed], &prior, SyncWindow::default(), true, now());

        let mut store = MockCalendarStore::new();
        store.expect_update().times(1).returning(|_, _| Err(anyhow!("conflict")));
        store.expect_delete().times(1).returning(|_| Err(anyhow!("locked")));

        let cancel = CancellationToken::new();
        let outcome = apply_plan(&plan, &store, &options(&cancel)).await.unwrap();
        assert_eq!(outcome.report.failed, 2);
        assert_eq!(outcome.snapshot, prior);
    }

    #[tokio::test]
    async fn test_successful_delete_drops_record() {
        let gone = event("gone");
        let prior = StateSnapshot::from_records(vec![record(&gone, "p-gone")]);
        let plan = reconcile(vec![], &prior, SyncWindow::default(), true, now());

        let mut store = MockCalendarStore::new();
        store
            .expect_delete()
            .withf(|ids| ids.primary == "p-gone")
            .times(1)
            .returning(|_| Ok(()));

        let cancel = CancellationToken::new();
        let outcome = apply_plan(&plan, &store, &options(&cancel)).await.unwrap();
        assert_eq!(outcome.report.deleted, 1);
        assert!(outcome.snapshot.is_empty());
    }

    #[tokio::test]
    async fn test_update_records_returned_ids() {
        let a = event("a");
        let prior = StateSnapshot::from_records(vec![record(&a, "p-a")]);
        let mut changed = a.clone();
        changed.sequence = 3;
        changed.location = Some("Hall".to_string());
        let plan = reconcile(vec![changed], &prior, SyncWindow::default(), false, now());

        let mut store = MockCalendarStore::new();
        store
            .expect_update()
            .times(1)
            .returning(|ids, _| Ok(DestinationIds::new(ids.primary.clone(), Some("v7".to_string()))));

        let cancel = CancellationToken::new();
        let outcome = apply_plan(&plan, &store, &options(&cancel)).await.unwrap();
        let stored = outcome.snapshot.get("a").unwrap();
        assert_eq!(stored.secondary_id.as_deref(), Some("v7"));
        assert_eq!(stored.sequence, 3);
        assert_ne!(stored.content_hash, prior.get("a").unwrap().content_hash);
    }

    #[tokio::test]
    async fn test_cancelled_before_first_write() {
        let plan = reconcile(vec![event("a")], &StateSnapshot::new(), SyncWindow::default(), false, now());
        let mut store = MockCalendarStore::new();
        store.expect_create().never();

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = apply_plan(&plan, &store, &options(&cancel)).await;
        assert!(matches!(result, Err(SyncError::Cancelled)));
    }

    #[tokio::test]
    async fn test_adoption_counts_and_records() {
        let a = event("a");
        let view = DestinationView::new(
            HashMap::new(),
            vec![DestinationItem {
                ids: DestinationIds::new("p-x", None),
                title: a.title.clone(),
                start: a.start.instant(),
                marker: None,
            }],
        );
        let plan = plan(
            vec![a],
            &StateSnapshot::new(),
            &view,
            &PlanOptions {
                window: SyncWindow::default(),
                delete_orphans: false,
            },
            now(),
        );

        let store = MockCalendarStore::new();
        let cancel = CancellationToken::new();
        let outcome = apply_plan(&plan, &store, &options(&cancel)).await.unwrap();
        assert_eq!(outcome.report.adopted, 1);
        assert_eq!(outcome.report.total_changes(), 0);
        assert_eq!(outcome.snapshot.get("a").unwrap().primary_id, "p-x");
    }
}
