//! In-memory repositories with the same claim and reset semantics as the
//! PostgreSQL implementations.
//!
//! Used by tests and by `tripline --memory` dry runs. A single async mutex
//! serializes every operation, which makes each claim trivially atomic.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use tripline_core::{
    AggregationScope, BookingEvidence, Category, ClaimedEmail, Email, EmailProcessingState,
    EmailRecord, EmailRepository, Error, ImportSummary, PipelineStateRepository, ReplaceSummary,
    Repositories, Result, Stage, StageOutput, StageStatus, StatusCounts, TripRecord,
    TripRepository,
};

#[derive(Default)]
struct Inner {
    emails: BTreeMap<String, Email>,
    states: BTreeMap<String, EmailProcessingState>,
    trips: Vec<TripRecord>,
    unavailable: bool,
}

impl Inner {
    fn check_available(&self) -> Result<()> {
        if self.unavailable {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn is_eligible(&self, stage: Stage, state: &EmailProcessingState) -> bool {
        if state.status(stage) != StageStatus::Pending {
            return false;
        }
        match stage {
            Stage::Classification => true,
            Stage::ContentExtraction | Stage::BookingExtraction => self
                .emails
                .get(&state.email_id)
                .and_then(|e| e.classification)
                .is_some_and(Category::is_travel),
            Stage::TripDetection => state.booking_extraction_status == StageStatus::Completed,
        }
    }
}

fn set_status(state: &mut EmailProcessingState, stage: Stage, status: StageStatus) {
    match stage {
        Stage::Classification => state.classification_status = status,
        Stage::ContentExtraction => state.extraction_status = status,
        Stage::BookingExtraction => state.booking_extraction_status = status,
        Stage::TripDetection => state.trip_detection_status = status,
    }
}

fn set_error(state: &mut EmailProcessingState, stage: Stage, error: Option<String>) {
    match stage {
        Stage::Classification => state.classification_error = error,
        Stage::ContentExtraction => state.extraction_error = error,
        Stage::BookingExtraction => state.booking_extraction_error = error,
        Stage::TripDetection => state.trip_detection_error = error,
    }
}

fn adjust_attempts(state: &mut EmailProcessingState, stage: Stage, delta: i32) {
    let attempts = match stage {
        Stage::Classification => &mut state.classification_attempts,
        Stage::ContentExtraction => &mut state.extraction_attempts,
        Stage::BookingExtraction => &mut state.booking_extraction_attempts,
        Stage::TripDetection => &mut state.trip_detection_attempts,
    };
    *attempts = (*attempts + delta).max(0);
}

/// In-memory store implementing all three repository traits.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Repository bundle backed by this store.
    pub fn repositories(self: &Arc<Self>) -> Repositories {
        Repositories {
            emails: self.clone(),
            state: self.clone(),
            trips: self.clone(),
        }
    }

    /// Make every subsequent operation fail with a connectivity error.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.inner.lock().await.unavailable = unavailable;
    }

    /// Overwrite a stored state, bypassing the state machine. Test setup only.
    pub async fn put_state(&self, state: EmailProcessingState) {
        self.inner
            .lock()
            .await
            .states
            .insert(state.email_id.clone(), state);
    }
}

#[async_trait]
impl EmailRepository for MemoryStore {
    async fn insert_many(&self, records: &[EmailRecord]) -> Result<ImportSummary> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let now = Utc::now();
        let mut summary = ImportSummary::default();
        for record in records {
            if inner.emails.contains_key(&record.id) {
                summary.skipped += 1;
                continue;
            }
            let email = Email::from_record(record.clone(), now);
            inner
                .states
                .insert(email.id.clone(), EmailProcessingState::new(&email.id, now));
            inner.emails.insert(email.id.clone(), email);
            summary.inserted += 1;
        }
        Ok(summary)
    }

    async fn get(&self, id: &str) -> Result<Option<Email>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.emails.get(id).cloned())
    }

    async fn count(&self) -> Result<u64> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.emails.len() as u64)
    }
}

#[async_trait]
impl PipelineStateRepository for MemoryStore {
    async fn claim(&self, stage: Stage, limit: usize) -> Result<Vec<ClaimedEmail>> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let mut eligible: Vec<Email> = inner
            .states
            .values()
            .filter(|s| inner.is_eligible(stage, s))
            .filter_map(|s| inner.emails.get(&s.email_id).cloned())
            .collect();
        eligible.sort_by(|a, b| {
            (a.timestamp.is_none(), a.timestamp, &a.id).cmp(&(
                b.timestamp.is_none(),
                b.timestamp,
                &b.id,
            ))
        });
        eligible.truncate(limit);

        let now = Utc::now();
        let mut claimed = Vec::with_capacity(eligible.len());
        for email in eligible {
            if let Some(state) = inner.states.get_mut(&email.id) {
                set_status(state, stage, StageStatus::Processing);
                set_error(state, stage, None);
                adjust_attempts(state, stage, 1);
                state.updated_at = now;
                claimed.push(ClaimedEmail {
                    state: state.clone(),
                    email,
                });
            }
        }
        Ok(claimed)
    }

    async fn complete(&self, email_id: &str, output: StageOutput) -> Result<()> {
        let mut guard = self.inner.lock().await;
        guard.check_available()?;
        let inner = &mut *guard;
        let stage = output.stage();
        let state = inner
            .states
            .get_mut(email_id)
            .filter(|s| s.status(stage) == StageStatus::Processing)
            .ok_or_else(|| {
                Error::NotFound(format!("email {} is not processing {}", email_id, stage))
            })?;

        set_status(state, stage, StageStatus::Completed);
        set_error(state, stage, None);
        state.updated_at = Utc::now();
        match output {
            StageOutput::Classification(category) => {
                if let Some(email) = inner.emails.get_mut(email_id) {
                    email.classification = Some(category);
                }
            }
            StageOutput::Content(text) => state.content_text = Some(text),
            StageOutput::Booking(info) => state.set_stored_booking_info(Some(info)),
            StageOutput::TripDetection => {}
        }
        Ok(())
    }

    async fn fail(&self, stage: Stage, email_id: &str, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let state = inner
            .states
            .get_mut(email_id)
            .filter(|s| s.status(stage) == StageStatus::Processing)
            .ok_or_else(|| {
                Error::NotFound(format!("email {} is not processing {}", email_id, stage))
            })?;
        set_status(state, stage, StageStatus::Failed);
        set_error(state, stage, Some(error.to_string()));
        state.updated_at = Utc::now();
        Ok(())
    }

    async fn release(&self, stage: Stage, email_ids: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let mut released = 0;
        for id in email_ids {
            if let Some(state) = inner.states.get_mut(id) {
                if state.status(stage) == StageStatus::Processing {
                    set_status(state, stage, StageStatus::Pending);
                    adjust_attempts(state, stage, -1);
                    released += 1;
                }
            }
        }
        Ok(released)
    }

    async fn reset(&self, stage: Stage, email_ids: &[String]) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let now = Utc::now();
        let mut reset_ids = Vec::new();
        for id in email_ids {
            let Some(state) = inner.states.get_mut(id) else {
                continue;
            };
            if state.status(stage) == StageStatus::Processing {
                continue;
            }
            set_status(state, stage, StageStatus::Pending);
            set_error(state, stage, None);
            match stage {
                Stage::ContentExtraction => state.content_text = None,
                Stage::BookingExtraction => state.set_stored_booking_info(None),
                Stage::Classification | Stage::TripDetection => {}
            }
            state.updated_at = now;
            reset_ids.push(id.clone());
        }
        if stage == Stage::Classification {
            for id in &reset_ids {
                if let Some(email) = inner.emails.get_mut(id) {
                    email.classification = None;
                }
            }
        }
        Ok(reset_ids.len() as u64)
    }

    async fn reset_failed(&self, stage: Stage) -> Result<u64> {
        let failed = self.list_by_status(stage, StageStatus::Failed).await?;
        self.reset(stage, &failed).await
    }

    async fn recover_stuck(&self, stage: Stage) -> Result<u64> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;
        let mut recovered = 0;
        for state in inner.states.values_mut() {
            if state.status(stage) == StageStatus::Processing {
                set_status(state, stage, StageStatus::Pending);
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    async fn list_by_status(&self, stage: Stage, status: StageStatus) -> Result<Vec<String>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner
            .states
            .values()
            .filter(|s| s.status(stage) == status)
            .map(|s| s.email_id.clone())
            .collect())
    }

    async fn status_counts(&self, stage: Stage) -> Result<StatusCounts> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let mut counts = StatusCounts::default();
        for state in inner.states.values() {
            counts.add(state.status(stage));
        }
        Ok(counts)
    }

    async fn get(&self, email_id: &str) -> Result<Option<EmailProcessingState>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.states.get(email_id).cloned())
    }

    async fn completed_bookings(&self) -> Result<Vec<BookingEvidence>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let mut evidence: Vec<BookingEvidence> = inner
            .states
            .values()
            .filter_map(|s| {
                let info = s.booking_info()?.clone();
                Some(BookingEvidence {
                    email_id: s.email_id.clone(),
                    email_timestamp: inner.emails.get(&s.email_id).and_then(|e| e.timestamp),
                    info,
                })
            })
            .collect();
        evidence.sort_by(|a, b| {
            (a.email_timestamp.is_none(), a.email_timestamp, &a.email_id).cmp(&(
                b.email_timestamp.is_none(),
                b.email_timestamp,
                &b.email_id,
            ))
        });
        Ok(evidence)
    }
}

#[async_trait]
impl TripRepository for MemoryStore {
    async fn replace_trips(
        &self,
        scope: AggregationScope,
        records: &[TripRecord],
    ) -> Result<ReplaceSummary> {
        let mut inner = self.inner.lock().await;
        inner.check_available()?;

        let mut seen = HashSet::new();
        if let Some(dup) = records.iter().find(|r| !seen.insert(r.trip.id)) {
            return Err(Error::InvalidInput(format!(
                "duplicate trip id {} in replacement set",
                dup.trip.id
            )));
        }

        let incoming: HashSet<Uuid> = records
            .iter()
            .flat_map(|r| r.fragments.iter().map(|f| f.id))
            .collect();
        let before = inner.trips.len();
        inner.trips.retain(|r| {
            !scope.overlaps(r.trip.start_date, r.trip.end_date)
                && !r.fragments.iter().any(|f| incoming.contains(&f.id))
        });
        let deleted = (before - inner.trips.len()) as u64;

        inner.trips.extend(records.iter().cloned());
        inner.trips.sort_by(|a, b| {
            (a.trip.start_date.is_none(), a.trip.start_date, a.trip.id).cmp(&(
                b.trip.start_date.is_none(),
                b.trip.start_date,
                b.trip.id,
            ))
        });

        Ok(ReplaceSummary {
            deleted,
            inserted: records.len() as u64,
        })
    }

    async fn list_trips(&self) -> Result<Vec<TripRecord>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        Ok(inner.trips.clone())
    }

    async fn trip_ids_for_email(&self, email_id: &str) -> Result<Vec<Uuid>> {
        let inner = self.inner.lock().await;
        inner.check_available()?;
        let mut ids: Vec<Uuid> = inner
            .trips
            .iter()
            .filter(|r| r.email_ids().iter().any(|id| id == email_id))
            .map(|r| r.trip.id)
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::email_record;
    use tripline_core::{
        AccommodationFragment, BookingFragment, BookingStatus, FragmentDetail, Trip, TripFragment,
    };

    async fn seeded(ids: &[&str]) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        let records: Vec<EmailRecord> = ids.iter().map(|id| email_record(id, "Booking")).collect();
        store.insert_many(&records).await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_insert_is_idempotent_by_id() {
        let store = seeded(&["a", "b"]).await;
        let summary = store
            .insert_many(&[email_record("b", "again"), email_record("c", "new")])
            .await
            .unwrap();
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(EmailRepository::count(store.as_ref()).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_claim_never_returns_same_email_twice() {
        let store = seeded(&["a", "b", "c"]).await;
        let first = store.claim(Stage::Classification, 2).await.unwrap();
        let second = store.claim(Stage::Classification, 2).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 1);
        let ids: HashSet<_> = first.iter().chain(&second).map(|c| c.email.id.clone()).collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(second[0].state.classification_attempts, 1);
    }

    #[tokio::test]
    async fn test_booking_claim_requires_travel_classification() {
        let store = seeded(&["flight", "promo"]).await;
        store.claim(Stage::Classification, 10).await.unwrap();
        store
            .complete("flight", StageOutput::Classification(Category::Flight))
            .await
            .unwrap();
        store
            .complete("promo", StageOutput::Classification(Category::Marketing))
            .await
            .unwrap();

        let claimed = store.claim(Stage::BookingExtraction, 10).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].email.id, "flight");
    }

    #[tokio::test]
    async fn test_complete_requires_processing() {
        let store = seeded(&["a"]).await;
        let err = store
            .complete("a", StageOutput::Classification(Category::Hotel))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_release_returns_to_pending() {
        let store = seeded(&["a"]).await;
        store.claim(Stage::Classification, 1).await.unwrap();
        let released = store
            .release(Stage::Classification, &["a".to_string()])
            .await
            .unwrap();
        assert_eq!(released, 1);
        let state = PipelineStateRepository::get(store.as_ref(), "a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.classification_status, StageStatus::Pending);
        assert_eq!(state.classification_attempts, 0);
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_database_error() {
        let store = seeded(&["a"]).await;
        store.set_unavailable(true).await;
        let err = store.claim(Stage::Classification, 1).await.unwrap_err();
        assert!(err.is_infrastructure());
    }

    fn stay(
        trip_id: Uuid,
        fragment_id: Uuid,
        city: &str,
        from: (u32, u32),
        to: (u32, u32),
    ) -> TripRecord {
        let day = |(m, d): (u32, u32)| chrono::NaiveDate::from_ymd_opt(2025, m, d).unwrap();
        TripRecord {
            trip: Trip {
                id: trip_id,
                name: format!("Trip to {city}"),
                start_date: Some(day(from)),
                end_date: Some(day(to)),
                origin_city: "Zurich".into(),
                cities_visited: vec![city.into()],
                total_cost: 0.0,
                currency: None,
                data_quality_flags: Vec::new(),
                created_at: Utc::now(),
            },
            fragments: vec![TripFragment {
                id: fragment_id,
                trip_id,
                fragment: BookingFragment {
                    email_id: "a".into(),
                    index: 0,
                    status: BookingStatus::Confirmed,
                    confirmation_number: None,
                    booking_platform: None,
                    cost: None,
                    currency: None,
                    detail: FragmentDetail::Accommodation(AccommodationFragment {
                        property_name: None,
                        address: None,
                        city: Some(city.into()),
                        country: None,
                        check_in: day(from).and_hms_opt(15, 0, 0),
                        check_out: day(to).and_hms_opt(11, 0, 0),
                    }),
                },
                evidence_email_ids: vec!["a".into()],
            }],
        }
    }

    #[tokio::test]
    async fn test_range_replace_drops_overlapping_and_regrouped_trips() {
        let store = MemoryStore::new();
        let shared = Uuid::new_v4();
        let holder = stay(Uuid::new_v4(), shared, "Oslo", (6, 20), (6, 25));
        let crossing = stay(Uuid::new_v4(), Uuid::new_v4(), "Lisbon", (7, 30), (8, 2));
        let later = stay(Uuid::new_v4(), Uuid::new_v4(), "Rome", (9, 1), (9, 3));
        let earlier = stay(Uuid::new_v4(), Uuid::new_v4(), "Bern", (5, 1), (5, 2));
        store
            .replace_trips(
                AggregationScope::All,
                &[holder, crossing, later.clone(), earlier.clone()],
            )
            .await
            .unwrap();

        // The regrouped trip takes over the shared fragment from a trip outside the range.
        let regrouped = stay(Uuid::new_v4(), shared, "Oslo", (7, 1), (7, 2));
        let scope = AggregationScope::DateRange {
            start: chrono::NaiveDate::from_ymd_opt(2025, 7, 1).unwrap(),
            end: chrono::NaiveDate::from_ymd_opt(2025, 7, 31).unwrap(),
        };
        let summary = store.replace_trips(scope, &[regrouped.clone()]).await.unwrap();
        assert_eq!(summary.deleted, 2);

        let trips = store.list_trips().await.unwrap();
        let ids: HashSet<Uuid> = trips.iter().map(|r| r.trip.id).collect();
        assert_eq!(trips.len(), 3);
        assert!(ids.contains(&regrouped.trip.id));
        assert!(ids.contains(&later.trip.id));
        assert!(ids.contains(&earlier.trip.id));
        let holders = trips
            .iter()
            .filter(|r| r.fragments.iter().any(|f| f.id == shared))
            .count();
        assert_eq!(holders, 1);
    }
}
