//! Tiered identity matching.
//!
//! A feed event is matched against what earlier passes recorded and against
//! what the destination currently holds. Tiers run in a fixed order and the
//! first one with a candidate decides:
//!
//! 1. primary: a tracked record whose destination item is live and carries
//!    this event's marker,
//! 2. source uid: a tracked record under the event's sync key,
//! 3. marker: an untracked destination item carrying the marker,
//! 4. fuzzy: an untracked, unmarked item with the same title and start.
//!
//! A record or item is claimed by at most one event per pass, so two feed
//! events are never merged into one destination item.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::calendar::{CalendarStore, DestinationItem};
use crate::models::{Event, StateSnapshot, TrackedEvent};

/// What the destination said about a tracked record's item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Live(DestinationItem),
    Missing,
    /// Not asked, or the store could not answer.
    Unknown,
}

/// Read-only picture of the destination for one pass.
#[derive(Debug, Clone, Default)]
pub struct DestinationView {
    liveness: HashMap<String, Liveness>,
    items: Vec<DestinationItem>,
}

static UNKNOWN: Liveness = Liveness::Unknown;

impl DestinationView {
    /// No destination knowledge: every record is unknown and nothing is listed.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(liveness: HashMap<String, Liveness>, items: Vec<DestinationItem>) -> Self {
        Self { liveness, items }
    }

    /// Ask the store about every tracked record and list the window.
    ///
    /// Store failures degrade to `Unknown` liveness or an empty listing.
    pub async fn gather(
        store: &dyn CalendarStore,
        snapshot: &StateSnapshot,
        calendar: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Self {
        let mut liveness = HashMap::with_capacity(snapshot.len());
        let mut failed_lookups = 0usize;

        for record in snapshot.records() {
            let state = match store.resolve(&record.ids()).await {
                Ok(Some(item)) => Liveness::Live(item),
                Ok(None) => Liveness::Missing,
                Err(e) => {
                    failed_lookups += 1;
                    log::debug!("Could not resolve {}: {}", record.source_uid, e);
                    Liveness::Unknown
                }
            };
            liveness.insert(record.source_uid.clone(), state);
        }
        if failed_lookups > 0 {
            warn!(
                "Destination lookup failed for {} of {} tracked events; treating them as unknown",
                failed_lookups,
                snapshot.len()
            );
        }

        let items = match store.list(calendar, from, to).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Destination listing failed, marker and fuzzy recovery disabled: {}", e);
                Vec::new()
            }
        };

        Self { liveness, items }
    }

    pub fn liveness(&self, source_uid: &str) -> &Liveness {
        self.liveness.get(source_uid).unwrap_or(&UNKNOWN)
    }

    pub fn items(&self) -> &[DestinationItem] {
        &self.items
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Primary,
    SourceUid,
    Marker,
    Fuzzy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchVerdict {
    NoMatch,
    PrimaryMatch {
        record: TrackedEvent,
        item: DestinationItem,
    },
    UidMatch {
        record: TrackedEvent,
        liveness: Liveness,
    },
    MarkerRecovered(DestinationItem),
    FuzzyMatch(DestinationItem),
}

impl MatchVerdict {
    pub fn tier(&self) -> Option<MatchTier> {
        match self {
            MatchVerdict::NoMatch => None,
            MatchVerdict::PrimaryMatch { .. } => Some(MatchTier::Primary),
            MatchVerdict::UidMatch { .. } => Some(MatchTier::SourceUid),
            MatchVerdict::MarkerRecovered(_) => Some(MatchTier::Marker),
            MatchVerdict::FuzzyMatch(_) => Some(MatchTier::Fuzzy),
        }
    }

    pub fn record(&self) -> Option<&TrackedEvent> {
        match self {
            MatchVerdict::PrimaryMatch { record, .. } | MatchVerdict::UidMatch { record, .. } => Some(record),
            _ => None,
        }
    }

    /// Destination item this verdict binds to, when known.
    pub fn item_primary_id(&self) -> Option<&str> {
        match self {
            MatchVerdict::PrimaryMatch { item, .. }
            | MatchVerdict::MarkerRecovered(item)
            | MatchVerdict::FuzzyMatch(item) => Some(&item.ids.primary),
            MatchVerdict::UidMatch { record, .. } => Some(&record.primary_id),
            MatchVerdict::NoMatch => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub verdict: MatchVerdict,
    /// Set when the deciding tier had more than one candidate.
    pub ambiguity: Option<String>,
}

/// Matching state for one pass.
pub struct MatchContext<'a> {
    snapshot: &'a StateSnapshot,
    destination: &'a DestinationView,
    claimed_records: HashSet<String>,
    claimed_items: HashSet<String>,
}

type Tier = fn(&Event, &str, &MatchContext<'_>) -> Vec<MatchVerdict>;

const TIERS: [Tier; 4] = [primary_tier, uid_tier, marker_tier, fuzzy_tier];

impl<'a> MatchContext<'a> {
    pub fn new(snapshot: &'a StateSnapshot, destination: &'a DestinationView) -> Self {
        Self {
            snapshot,
            destination,
            claimed_records: HashSet::new(),
            claimed_items: HashSet::new(),
        }
    }

    pub fn snapshot(&self) -> &StateSnapshot {
        self.snapshot
    }

    pub fn destination(&self) -> &DestinationView {
        self.destination
    }

    pub fn is_record_claimed(&self, source_uid: &str) -> bool {
        self.claimed_records.contains(source_uid)
    }

    pub fn is_item_claimed(&self, primary_id: &str) -> bool {
        self.claimed_items.contains(primary_id)
    }

    /// Reserve whatever `verdict` binds to.
    pub fn claim(&mut self, verdict: &MatchVerdict) {
        if let Some(record) = verdict.record() {
            self.claimed_records.insert(record.source_uid.clone());
        }
        if let Some(primary) = verdict.item_primary_id() {
            self.claimed_items.insert(primary.to_string());
        }
    }

    pub fn claim_item(&mut self, primary_id: &str) {
        self.claimed_items.insert(primary_id.to_string());
    }

    /// Untracked, unclaimed listed items.
    fn free_items(&self) -> impl Iterator<Item = &DestinationItem> + '_ {
        self.destination
            .items()
            .iter()
            .filter(move |item| !self.snapshot.references(&item.ids.primary) && !self.is_item_claimed(&item.ids.primary))
    }

    /// Tier 3 on its own, for rebinding a record whose item disappeared.
    pub fn recover_by_marker(&self, event: &Event) -> MatchOutcome {
        decide(marker_tier(event, &event.sync_key(), self), "marker")
    }

    pub fn match_event(&self, event: &Event) -> MatchOutcome {
        let key = event.sync_key();
        for (tier, name) in TIERS.iter().zip(["primary", "source uid", "marker", "fuzzy"]) {
            let candidates = tier(event, &key, self);
            if !candidates.is_empty() {
                return decide(candidates, name);
            }
        }
        MatchOutcome {
            verdict: MatchVerdict::NoMatch,
            ambiguity: None,
        }
    }
}

fn decide(candidates: Vec<MatchVerdict>, tier_name: &str) -> MatchOutcome {
    let count = candidates.len();
    let ambiguity = (count > 1).then(|| format!("{} {} candidates; using the first", count, tier_name));
    let verdict = candidates.into_iter().next().unwrap_or(MatchVerdict::NoMatch);
    MatchOutcome { verdict, ambiguity }
}

fn primary_tier(_event: &Event, key: &str, ctx: &MatchContext<'_>) -> Vec<MatchVerdict> {
    let mut candidates: Vec<(bool, MatchVerdict)> = ctx
        .snapshot
        .records()
        .filter(|record| !ctx.is_record_claimed(&record.source_uid))
        .filter_map(|record| match ctx.destination.liveness(&record.source_uid) {
            Liveness::Live(item) if item.marker.as_deref() == Some(key) && !ctx.is_item_claimed(&item.ids.primary) => {
                Some((
                    record.source_uid == key,
                    MatchVerdict::PrimaryMatch {
                        record: record.clone(),
                        item: item.clone(),
                    },
                ))
            }
            _ => None,
        })
        .collect();
    // the record under the event's own key goes first
    candidates.sort_by_key(|(same_key, _)| !*same_key);
    candidates.into_iter().map(|(_, verdict)| verdict).collect()
}

fn uid_tier(_event: &Event, key: &str, ctx: &MatchContext<'_>) -> Vec<MatchVerdict> {
    ctx.snapshot
        .get(key)
        .filter(|record| !ctx.is_record_claimed(&record.source_uid))
        .map(|record| MatchVerdict::UidMatch {
            record: record.clone(),
            liveness: ctx.destination.liveness(key).clone(),
        })
        .into_iter()
        .collect()
}

fn marker_tier(_event: &Event, key: &str, ctx: &MatchContext<'_>) -> Vec<MatchVerdict> {
    ctx.free_items()
        .filter(|item| item.marker.as_deref() == Some(key))
        .map(|item| MatchVerdict::MarkerRecovered(item.clone()))
        .collect()
}

fn fuzzy_tier(event: &Event, _key: &str, ctx: &MatchContext<'_>) -> Vec<MatchVerdict> {
    let start = event.start.instant();
    ctx.free_items()
        .filter(|item| item.marker.is_none() && item.title == event.title && item.start == start)
        .map(|item| MatchVerdict::FuzzyMatch(item.clone()))
        .collect()
}
