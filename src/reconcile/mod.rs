//! Reconciliation: turn the feed and the prior state into an operation plan,
//! then carry the plan out against the destination.
//!
//! Planning is pure. Nothing here touches a store until [`apply_plan`].

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::{HashMap, HashSet};

use crate::config::SyncWindow;
use crate::hasher::{hash_event, short};
use crate::identity::{DestinationView, Liveness, MatchContext, MatchTier, MatchVerdict};
use crate::models::{DestinationIds, Diagnostic, DiagnosticKind, Event, StateSnapshot, TrackedEvent};

pub mod apply;
pub mod plan;

pub use apply::{apply_plan, ApplyOptions, ApplyOutcome};
pub use plan::{OperationPlan, PlannedCreate, PlannedDelete, PlannedUpdate, Unchanged, UnchangedReason};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanOptions {
    pub window: SyncWindow,
    pub delete_orphans: bool,
}

/// Plan without destination knowledge: only records under the same sync key
/// are matched.
pub fn reconcile(
    feed_events: Vec<Event>,
    prior: &StateSnapshot,
    window: SyncWindow,
    delete_orphans: bool,
    now: DateTime<Utc>,
) -> OperationPlan {
    plan(
        feed_events,
        prior,
        &DestinationView::empty(),
        &PlanOptions { window, delete_orphans },
        now,
    )
}

/// Plan with every identity tier available.
pub fn plan(
    feed_events: Vec<Event>,
    prior: &StateSnapshot,
    destination: &DestinationView,
    options: &PlanOptions,
    now: DateTime<Utc>,
) -> OperationPlan {
    let (from, to) = options.window.bounds(now);
    let mut plan = OperationPlan::new(from, to);

    let events = merge_overrides(dedupe_events(feed_events));
    let feed_keys: HashSet<String> = events.iter().map(Event::sync_key).collect();
    let mut ctx = MatchContext::new(prior, destination);

    for event in events {
        if !in_window(&event, from, to) {
            debug!("Skipping {}: outside the sync window", event.sync_key());
            continue;
        }

        let key = event.sync_key();
        let content_hash = hash_event(&event);
        let outcome = ctx.match_event(&event);
        if let Some(detail) = outcome.ambiguity {
            warn!("Ambiguous identity for {}: {}", key, detail);
            plan.diagnostics
                .push(Diagnostic::new(DiagnosticKind::IdentityAmbiguous, Some(key.clone()), None, detail));
        }
        ctx.claim(&outcome.verdict);

        match outcome.verdict {
            MatchVerdict::NoMatch => plan.creates.push(PlannedCreate {
                event,
                content_hash,
                replaces: None,
            }),
            MatchVerdict::PrimaryMatch { record, item } => {
                plan_existing(&mut plan, event, content_hash, record, item.ids, MatchTier::Primary, now)
            }
            MatchVerdict::UidMatch { record, liveness } => match liveness {
                Liveness::Live(item) => {
                    plan_existing(&mut plan, event, content_hash, record, item.ids, MatchTier::SourceUid, now)
                }
                Liveness::Unknown => {
                    let ids = record.ids();
                    plan_existing(&mut plan, event, content_hash, record, ids, MatchTier::SourceUid, now)
                }
                Liveness::Missing => {
                    let recovered = ctx.recover_by_marker(&event);
                    if let Some(detail) = recovered.ambiguity {
                        plan.diagnostics.push(Diagnostic::new(
                            DiagnosticKind::IdentityAmbiguous,
                            Some(key.clone()),
                            None,
                            detail,
                        ));
                    }
                    match recovered.verdict {
                        MatchVerdict::MarkerRecovered(item) => {
                            info!("Rebinding {} to destination item found by marker", key);
                            ctx.claim_item(&item.ids.primary);
                            plan.updates.push(PlannedUpdate {
                                event,
                                content_hash,
                                ids: item.ids,
                                prior: Some(record),
                                tier: MatchTier::Marker,
                            });
                        }
                        _ => {
                            info!("Destination item for {} is gone; recreating", key);
                            plan.creates.push(PlannedCreate {
                                event,
                                content_hash,
                                replaces: Some(record),
                            });
                        }
                    }
                }
            },
            MatchVerdict::MarkerRecovered(item) => {
                info!("Recovered untracked destination item for {} by marker", key);
                plan.updates.push(PlannedUpdate {
                    event,
                    content_hash,
                    ids: item.ids,
                    prior: None,
                    tier: MatchTier::Marker,
                });
            }
            MatchVerdict::FuzzyMatch(item) => {
                info!("Adopting existing destination item for {}", key);
                let record = TrackedEvent::new(key.clone(), &item.ids, content_hash, event.sequence, now);
                plan.unchanged.push(Unchanged {
                    source_uid: key,
                    record,
                    reason: UnchangedReason::Adopted,
                });
            }
        }
    }

    for record in prior.records() {
        if ctx.is_record_claimed(&record.source_uid) {
            continue;
        }
        if feed_keys.contains(&record.source_uid) || !options.delete_orphans {
            plan.retained.push(record.clone());
        } else {
            plan.deletes.push(PlannedDelete { record: record.clone() });
        }
    }

    debug!("Planned pass: {}", plan.summary());
    plan
}

/// Matched event with a known destination item: no-op or update.
fn plan_existing(
    plan: &mut OperationPlan,
    event: Event,
    content_hash: String,
    record: TrackedEvent,
    ids: DestinationIds,
    tier: MatchTier,
    now: DateTime<Utc>,
) {
    let key = event.sync_key();

    if record.content_hash == content_hash {
        let sequence_bumped = event.sequence > record.sequence;
        let renumbered = ids != record.ids();
        let rekeyed = record.source_uid != key;
        if sequence_bumped || renumbered || rekeyed {
            let mut refreshed = record.with_ids(&ids);
            refreshed.source_uid = key.clone();
            refreshed.sequence = refreshed.sequence.max(event.sequence);
            refreshed.last_synced = now;
            plan.unchanged.push(Unchanged {
                source_uid: key,
                record: refreshed,
                reason: UnchangedReason::Refreshed,
            });
        } else {
            plan.unchanged.push(Unchanged {
                source_uid: key,
                record,
                reason: UnchangedReason::Identical,
            });
        }
        return;
    }

    if event.sequence < record.sequence {
        warn!(
            "Sequence for {} went backwards ({} -> {}); applying the feed's content",
            key, record.sequence, event.sequence
        );
    }
    debug!(
        "Content of {} changed ({} -> {})",
        key,
        short(&record.content_hash),
        short(&content_hash)
    );
    plan.updates.push(PlannedUpdate {
        event,
        content_hash,
        ids,
        prior: Some(record),
        tier,
    });
}

/// One event per sync key: highest sequence wins, ties go to the later
/// LAST-MODIFIED, then to the earlier block. Feed order is kept otherwise.
pub fn dedupe_events(events: Vec<Event>) -> Vec<Event> {
    let mut kept: Vec<Event> = Vec::with_capacity(events.len());
    let mut position: HashMap<String, usize> = HashMap::new();

    for event in events {
        let key = event.sync_key();
        match position.get(&key) {
            Some(&index) => {
                let current = &kept[index];
                let newer = (event.sequence, event.last_modified) > (current.sequence, current.last_modified);
                debug!(
                    "Duplicate block for {} (sequence {} vs {}); keeping {}",
                    key,
                    current.sequence,
                    event.sequence,
                    if newer { "the later block" } else { "the earlier block" }
                );
                if newer {
                    kept[index] = event;
                }
            }
            None => {
                position.insert(key, kept.len());
                kept.push(event);
            }
        }
    }
    kept
}

/// Fold override instances into their master when the master is present.
///
/// Overrides without a master stay as standalone events keyed by
/// `uid@recurrence-id`.
pub fn merge_overrides(events: Vec<Event>) -> Vec<Event> {
    let (mut masters, overrides): (Vec<Event>, Vec<Event>) = events.into_iter().partition(|e| !e.is_override());
    let index: HashMap<String, usize> = masters
        .iter()
        .enumerate()
        .map(|(i, master)| (master.uid.clone(), i))
        .collect();

    let mut detached = Vec::new();
    for instance in overrides {
        match index.get(&instance.uid) {
            Some(&i) => masters[i].overrides.push(instance),
            None => detached.push(instance),
        }
    }

    for master in masters.iter_mut().filter(|m| !m.overrides.is_empty()) {
        master
            .overrides
            .sort_by_key(|o| o.recurrence_id.as_ref().map(|rid| rid.instant()));
    }

    masters.extend(detached);
    masters
}

/// True when the event, or some occurrence of it, may fall in `[from, to]`.
pub fn in_window(event: &Event, from: DateTime<Utc>, to: DateTime<Utc>) -> bool {
    let start = event.start.instant();
    let within = |instant: DateTime<Utc>| instant >= from && instant <= to;

    if within(start) {
        return true;
    }
    if let Some(rule) = &event.recurrence {
        if rule.may_occur_between(start, from, to) {
            return true;
        }
    }
    event.recurrence_dates.iter().any(|rdate| within(rdate.instant()))
        || event.overrides.iter().any(|instance| within(instance.start.instant()))
}
