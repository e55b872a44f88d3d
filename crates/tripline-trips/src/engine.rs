//! Whole-set aggregation pass.
//!
//! A pass reads every completed booking extraction, screens and consolidates
//! the fragments, groups them, derives the trips and replaces the trips of
//! its scope in one repository call. Nothing is written until the final
//! replacement, so a failed pass leaves the previous trips untouched.
//!
//! Passes are serialized with stage writes that change the fragment set
//! through [`TripAggregator::exclusive`] and [`TripAggregator::shared`].

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use tripline_core::{
    AggregationScope, PipelineStateRepository, ReplaceSummary, Repositories, Result,
    TripRecord, TripRepository,
};

use crate::derive::derive_trip;
use crate::eligibility::{screen, Eligibility};
use crate::fragments::{consolidate, ConsolidatedFragment, EmailBooking};
use crate::grouping::{group_fragments, Grouping};
use crate::policy::GroupingPolicy;

/// Outcome of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationReport {
    pub trip_ids: Vec<Uuid>,
    /// Consolidated fragments placed in a trip.
    pub fragments: usize,
    /// Emails evidencing at least one placed fragment.
    pub linked_emails: BTreeSet<String>,
    /// Excluded emails with the reason.
    pub excluded: BTreeMap<String, String>,
    /// Emails whose extraction is a non-booking or non-travel answer.
    pub no_booking: BTreeSet<String>,
    /// Emails evidencing only fragments that could not be placed.
    pub unplaced: BTreeSet<String>,
    pub data_quality_flags: usize,
    /// Scope actually replaced; a date range grows to whole trips.
    pub scope: AggregationScope,
    pub replaced: ReplaceSummary,
}

impl AggregationReport {
    pub fn trip_count(&self) -> usize {
        self.trip_ids.len()
    }
}

/// Runs aggregation passes over the repositories.
#[derive(Clone)]
pub struct TripAggregator {
    state: Arc<dyn PipelineStateRepository>,
    trips: Arc<dyn TripRepository>,
    policy: GroupingPolicy,
    lock: Arc<RwLock<()>>,
}

impl TripAggregator {
    pub fn new(repos: &Repositories, policy: GroupingPolicy) -> Self {
        Self {
            state: repos.state.clone(),
            trips: repos.trips.clone(),
            policy,
            lock: Arc::new(RwLock::new(())),
        }
    }

    pub fn policy(&self) -> &GroupingPolicy {
        &self.policy
    }

    /// Exclusive guard held for a whole pass.
    pub async fn exclusive(&self) -> OwnedRwLockWriteGuard<()> {
        self.lock.clone().write_owned().await
    }

    /// Shared guard for stage writes that change the fragment set.
    pub async fn shared(&self) -> OwnedRwLockReadGuard<()> {
        self.lock.clone().read_owned().await
    }

    /// Run one pass under the exclusive guard.
    pub async fn run_pass(&self, scope: AggregationScope) -> Result<AggregationReport> {
        let guard = self.exclusive().await;
        self.run_pass_locked(scope, &guard).await
    }

    /// Run one pass while the caller already holds the exclusive guard.
    #[instrument(
        skip(self, _guard),
        fields(subsystem = "trips", component = "aggregator", op = "run_pass")
    )]
    pub async fn run_pass_locked(
        &self,
        scope: AggregationScope,
        _guard: &OwnedRwLockWriteGuard<()>,
    ) -> Result<AggregationReport> {
        let started = Instant::now();
        let mut report = AggregationReport::default();

        let evidence = self.state.completed_bookings().await?;
        let mut bookings = Vec::with_capacity(evidence.len());
        for item in &evidence {
            match screen(item, &self.policy) {
                Eligibility::Eligible(record) => bookings.push(EmailBooking {
                    email_id: item.email_id.clone(),
                    email_timestamp: item.email_timestamp,
                    record,
                }),
                Eligibility::NoBooking => {
                    report.no_booking.insert(item.email_id.clone());
                }
                Eligibility::Excluded(reason) => {
                    debug!(
                        email_id = %item.email_id,
                        reason = %reason,
                        "Booking excluded from aggregation"
                    );
                    report.excluded.insert(item.email_id.clone(), reason);
                }
            }
        }

        let existing = self.trips.list_trips().await?;
        let (fragments, scope) = match scope {
            AggregationScope::All => (consolidate(&bookings), scope),
            AggregationScope::DateRange { start, end } => {
                widen(consolidate(&bookings), &existing, start, end)
            }
        };
        if let AggregationScope::DateRange { start, end } = scope {
            debug!(
                %start,
                %end,
                fragments = fragments.len(),
                "Date range widened to whole trips"
            );
        }
        report.scope = scope;
        let Grouping { groups, unplaced } = group_fragments(&fragments, &self.policy);

        let created_at: HashMap<Uuid, _> = existing
            .iter()
            .map(|r| (r.trip.id, r.trip.created_at))
            .collect();
        let now = Utc::now();

        let mut records = Vec::with_capacity(groups.len());
        for group in &groups {
            let record = derive_trip(&fragments, group, &self.policy, &created_at, now);
            report.fragments += record.fragments.len();
            report.data_quality_flags += record.trip.data_quality_flags.len();
            report.linked_emails.extend(record.email_ids());
            report.trip_ids.push(record.trip.id);
            records.push(record);
        }

        for &idx in &unplaced {
            let fragment = &fragments[idx];
            warn!(
                key = %fragment.key,
                email_id = %fragment.fragment.email_id,
                "Fragment without start time has no trip to join"
            );
            for email_id in &fragment.evidence_email_ids {
                if !report.linked_emails.contains(email_id) {
                    report.unplaced.insert(email_id.clone());
                }
            }
        }

        report.replaced = self.trips.replace_trips(scope, &records).await?;

        info!(
            result_count = report.trip_count(),
            fragments = report.fragments,
            linked_emails = report.linked_emails.len(),
            excluded = report.excluded.len(),
            data_quality_flags = report.data_quality_flags,
            deleted = report.replaced.deleted,
            duration_ms = started.elapsed().as_millis() as u64,
            "Aggregation pass complete"
        );
        Ok(report)
    }
}

/// Select the fragments a date-range pass regroups.
///
/// The window grows until it covers every stored trip that overlaps it or
/// owns a selected fragment, and every fragment of those trips is selected.
/// Unanchored fragments no trip owns join when one of their emails also
/// evidences a selected anchored fragment. Returns the grown window as the
/// scope to replace.
fn widen(
    fragments: Vec<ConsolidatedFragment>,
    existing: &[TripRecord],
    start: NaiveDate,
    end: NaiveDate,
) -> (Vec<ConsolidatedFragment>, AggregationScope) {
    let owner: HashMap<Uuid, usize> = existing
        .iter()
        .enumerate()
        .flat_map(|(trip, r)| r.fragments.iter().map(move |f| (f.id, trip)))
        .collect();
    let owners: Vec<Option<usize>> = fragments
        .iter()
        .map(|f| owner.get(&f.id()).copied())
        .collect();

    let mut window = AggregationScope::DateRange { start, end };
    let mut affected: BTreeSet<usize> = BTreeSet::new();
    let mut selected: BTreeSet<usize> = BTreeSet::new();
    loop {
        let mut changed = false;
        for (idx, record) in existing.iter().enumerate() {
            if !affected.contains(&idx)
                && window.overlaps(record.trip.start_date, record.trip.end_date)
            {
                affected.insert(idx);
                changed = true;
            }
        }
        for (idx, fragment) in fragments.iter().enumerate() {
            if selected.contains(&idx) {
                continue;
            }
            let owned_by_affected = owners[idx].is_some_and(|t| affected.contains(&t));
            let anchored_inside = fragment
                .fragment
                .start()
                .is_some_and(|s| window.contains(Some(s.date())));
            if owned_by_affected || anchored_inside {
                selected.insert(idx);
                if let Some(trip) = owners[idx] {
                    affected.insert(trip);
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }

        let AggregationScope::DateRange {
            start: mut from,
            end: mut to,
        } = window
        else {
            break;
        };
        for &idx in &affected {
            let trip = &existing[idx].trip;
            if let Some(s) = trip.start_date {
                from = from.min(s);
                to = to.max(trip.end_date.unwrap_or(s).max(s));
            }
        }
        for &idx in &selected {
            let fragment = &fragments[idx].fragment;
            if let Some(s) = fragment.start() {
                from = from.min(s.date());
                to = to.max(fragment.last_instant().unwrap_or(s).date());
            }
        }
        window = AggregationScope::DateRange { start: from, end: to };
    }

    let selected_emails: BTreeSet<&str> = selected
        .iter()
        .filter(|&&idx| fragments[idx].fragment.start().is_some())
        .flat_map(|&idx| fragments[idx].evidence_email_ids.iter().map(String::as_str))
        .collect();
    let loose: Vec<usize> = fragments
        .iter()
        .enumerate()
        .filter(|(idx, f)| {
            !selected.contains(idx)
                && owners[*idx].is_none()
                && f.fragment.start().is_none()
                && f.evidence_email_ids
                    .iter()
                    .any(|id| selected_emails.contains(id.as_str()))
        })
        .map(|(idx, _)| idx)
        .collect();
    selected.extend(loose);

    let kept = fragments
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| selected.contains(idx))
        .map(|(_, f)| f)
        .collect();
    (kept, window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tripline_core::{EmailProcessingState, EmailRecord, EmailRepository, StageStatus};
    use tripline_db::MemoryStore;

    async fn seed(store: &Arc<MemoryStore>, id: &str, info: serde_json::Value) {
        let repos = store.repositories();
        repos
            .emails
            .insert_many(&[EmailRecord {
                id: id.into(),
                subject: "Booking".into(),
                sender: "bookings@example.com".into(),
                date: "Tue, 3 Jun 2025 10:00:00 +0000".into(),
                raw_content: None,
            }])
            .await
            .unwrap();
        let mut state = EmailProcessingState::new(id, Utc::now());
        state.booking_extraction_status = StageStatus::Completed;
        state.set_stored_booking_info(Some(info));
        store.put_state(state).await;
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_previous_trips() {
        let store = MemoryStore::new();
        seed(
            &store,
            "e1",
            json!({
                "outcome": "booking",
                "booking_type": "hotel",
                "status": "confirmed",
                "accommodations": [{"city": "Oslo", "check_in_date": "2025-06-10", "check_out_date": "2025-06-12"}]
            }),
        )
        .await;
        let repos = store.repositories();
        let aggregator = TripAggregator::new(&repos, GroupingPolicy::default());
        aggregator.run_pass(AggregationScope::All).await.unwrap();

        store.set_unavailable(true).await;
        assert!(aggregator.run_pass(AggregationScope::All).await.is_err());
        store.set_unavailable(false).await;
        assert_eq!(repos.trips.list_trips().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_exclusive_blocks_shared() {
        let store = MemoryStore::new();
        let aggregator = TripAggregator::new(&store.repositories(), GroupingPolicy::default());
        let guard = aggregator.exclusive().await;
        let pending =
            tokio::time::timeout(std::time::Duration::from_millis(20), aggregator.shared()).await;
        assert!(pending.is_err());
        drop(guard);
        let _shared = aggregator.shared().await;
    }
}
