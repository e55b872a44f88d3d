//! Trip repository implementation.
//!
//! An aggregation pass replaces trips wholesale: the scoped trips are
//! deleted (fragment and link rows cascade) and the new set is inserted in
//! the same transaction, so a failed pass leaves the previous trips intact.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use tripline_core::{
    AggregationScope, BookingFragment, DataQualityFlag, Error, FragmentDetail, ReplaceSummary,
    Result, Trip, TripFragment, TripRecord, TripRepository,
};

/// PostgreSQL implementation of TripRepository.
pub struct PgTripRepository {
    pool: Pool<Postgres>,
}

impl PgTripRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn insert_trip(tx: &mut Transaction<'_, Postgres>, record: &TripRecord) -> Result<()> {
        let trip = &record.trip;
        let flags = serde_json::to_value(&trip.data_quality_flags)?;
        sqlx::query(
            "INSERT INTO trips (id, name, start_date, end_date, origin_city, cities_visited,
                                total_cost, currency, data_quality_flags, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(trip.id)
        .bind(&trip.name)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(&trip.origin_city)
        .bind(&trip.cities_visited)
        .bind(trip.total_cost)
        .bind(&trip.currency)
        .bind(flags)
        .bind(trip.created_at)
        .execute(&mut **tx)
        .await
        .map_err(Error::Database)?;

        for fragment in &record.fragments {
            Self::insert_fragment(tx, fragment).await?;
        }

        for email_id in record.email_ids() {
            sqlx::query(
                "INSERT INTO trip_emails (trip_id, email_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(trip.id)
            .bind(&email_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }
        Ok(())
    }

    async fn insert_fragment(
        tx: &mut Transaction<'_, Postgres>,
        fragment: &TripFragment,
    ) -> Result<()> {
        let f = &fragment.fragment;
        let payload = serde_json::to_value(f)?;
        let status = f.status.as_str();

        let query = match &f.detail {
            FragmentDetail::TransportSegment(t) => sqlx::query(
                "INSERT INTO trip_transport_segments
                    (id, trip_id, email_id, status, confirmation_number, starts_at, ends_at,
                     cost, payload, carrier_name, segment_number, departure_location,
                     arrival_location)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            )
            .bind(fragment.id)
            .bind(fragment.trip_id)
            .bind(&f.email_id)
            .bind(status)
            .bind(&f.confirmation_number)
            .bind(f.start())
            .bind(f.end())
            .bind(f.cost)
            .bind(&payload)
            .bind(&t.carrier_name)
            .bind(&t.segment_number)
            .bind(&t.departure_location)
            .bind(&t.arrival_location),
            FragmentDetail::Accommodation(a) => sqlx::query(
                "INSERT INTO trip_accommodations
                    (id, trip_id, email_id, status, confirmation_number, starts_at, ends_at,
                     cost, payload, property_name, city)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(fragment.id)
            .bind(fragment.trip_id)
            .bind(&f.email_id)
            .bind(status)
            .bind(&f.confirmation_number)
            .bind(f.start())
            .bind(f.end())
            .bind(f.cost)
            .bind(&payload)
            .bind(&a.property_name)
            .bind(&a.city),
            FragmentDetail::Activity(a) => sqlx::query(
                "INSERT INTO trip_activities
                    (id, trip_id, email_id, status, confirmation_number, starts_at, ends_at,
                     cost, payload, activity_name, city)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(fragment.id)
            .bind(fragment.trip_id)
            .bind(&f.email_id)
            .bind(status)
            .bind(&f.confirmation_number)
            .bind(f.start())
            .bind(f.end())
            .bind(f.cost)
            .bind(&payload)
            .bind(&a.activity_name)
            .bind(&a.city),
            FragmentDetail::Cruise(c) => sqlx::query(
                "INSERT INTO trip_cruises
                    (id, trip_id, email_id, status, confirmation_number, starts_at, ends_at,
                     cost, payload, cruise_line, departure_port, arrival_port)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(fragment.id)
            .bind(fragment.trip_id)
            .bind(&f.email_id)
            .bind(status)
            .bind(&f.confirmation_number)
            .bind(f.start())
            .bind(f.end())
            .bind(f.cost)
            .bind(&payload)
            .bind(&c.cruise_line)
            .bind(&c.departure_port)
            .bind(&c.arrival_port),
        };
        query.execute(&mut **tx).await.map_err(Error::Database)?;

        for (position, email_id) in fragment.evidence_email_ids.iter().enumerate() {
            sqlx::query(
                "INSERT INTO trip_fragment_emails (fragment_id, fragment_kind, trip_id, email_id, position)
                 VALUES ($1, $2, $3, $4, $5)
                 ON CONFLICT DO NOTHING",
            )
            .bind(fragment.id)
            .bind(f.kind().as_str())
            .bind(fragment.trip_id)
            .bind(email_id)
            .bind(position as i32)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }
        Ok(())
    }
}

fn trip_from_row(row: &sqlx::postgres::PgRow) -> Result<Trip> {
    let flags: JsonValue = row.get("data_quality_flags");
    let data_quality_flags: Vec<DataQualityFlag> = serde_json::from_value(flags)?;
    Ok(Trip {
        id: row.get("id"),
        name: row.get("name"),
        start_date: row.get("start_date"),
        end_date: row.get("end_date"),
        origin_city: row.get("origin_city"),
        cities_visited: row.get("cities_visited"),
        total_cost: row.get("total_cost"),
        currency: row.get("currency"),
        data_quality_flags,
        created_at: row.get("created_at"),
    })
}

#[async_trait]
impl TripRepository for PgTripRepository {
    async fn replace_trips(
        &self,
        scope: AggregationScope,
        records: &[TripRecord],
    ) -> Result<ReplaceSummary> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let deleted = match scope {
            AggregationScope::All => sqlx::query("DELETE FROM trips")
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?
                .rows_affected(),
            AggregationScope::DateRange { start, end } => {
                let fragment_ids: Vec<Uuid> = records
                    .iter()
                    .flat_map(|r| r.fragments.iter().map(|f| f.id))
                    .collect();
                sqlx::query(
                    "DELETE FROM trips
                     WHERE (start_date <= $2 AND GREATEST(start_date, COALESCE(end_date, start_date)) >= $1)
                        OR id IN (
                            SELECT trip_id FROM trip_transport_segments WHERE id = ANY($3)
                            UNION SELECT trip_id FROM trip_accommodations WHERE id = ANY($3)
                            UNION SELECT trip_id FROM trip_activities WHERE id = ANY($3)
                            UNION SELECT trip_id FROM trip_cruises WHERE id = ANY($3)
                        )",
                )
                .bind(start)
                .bind(end)
                .bind(&fragment_ids)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?
                .rows_affected()
            }
        };

        for record in records {
            Self::insert_trip(&mut tx, record).await?;
        }

        tx.commit().await.map_err(Error::Database)?;

        let summary = ReplaceSummary {
            deleted,
            inserted: records.len() as u64,
        };
        info!(
            subsystem = "db",
            component = "trips",
            op = "replace",
            deleted = summary.deleted,
            inserted = summary.inserted,
            "Replaced trips"
        );
        Ok(summary)
    }

    async fn list_trips(&self) -> Result<Vec<TripRecord>> {
        let trip_rows = sqlx::query(
            "SELECT id, name, start_date, end_date, origin_city, cities_visited, total_cost,
                    currency, data_quality_flags, created_at
             FROM trips
             ORDER BY start_date ASC NULLS LAST, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let fragment_rows = sqlx::query(
            "SELECT id, trip_id, payload, starts_at FROM trip_transport_segments
             UNION ALL SELECT id, trip_id, payload, starts_at FROM trip_accommodations
             UNION ALL SELECT id, trip_id, payload, starts_at FROM trip_activities
             UNION ALL SELECT id, trip_id, payload, starts_at FROM trip_cruises
             ORDER BY starts_at ASC NULLS LAST, id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let link_rows = sqlx::query(
            "SELECT fragment_id, email_id FROM trip_fragment_emails
             ORDER BY fragment_id, position",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut evidence: HashMap<Uuid, Vec<String>> = HashMap::new();
        for row in &link_rows {
            evidence
                .entry(row.get("fragment_id"))
                .or_default()
                .push(row.get("email_id"));
        }

        let mut fragments_by_trip: HashMap<Uuid, Vec<TripFragment>> = HashMap::new();
        for row in &fragment_rows {
            let id: Uuid = row.get("id");
            let trip_id: Uuid = row.get("trip_id");
            let payload: JsonValue = row.get("payload");
            let fragment: BookingFragment = serde_json::from_value(payload)?;
            fragments_by_trip.entry(trip_id).or_default().push(TripFragment {
                id,
                trip_id,
                fragment,
                evidence_email_ids: evidence.remove(&id).unwrap_or_default(),
            });
        }

        trip_rows
            .iter()
            .map(|row| {
                let trip = trip_from_row(row)?;
                let fragments = fragments_by_trip.remove(&trip.id).unwrap_or_default();
                Ok(TripRecord { trip, fragments })
            })
            .collect()
    }

    async fn trip_ids_for_email(&self, email_id: &str) -> Result<Vec<Uuid>> {
        sqlx::query_scalar("SELECT trip_id FROM trip_emails WHERE email_id = $1 ORDER BY trip_id")
            .bind(email_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }
}
