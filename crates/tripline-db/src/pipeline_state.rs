//! Pipeline state repository implementation.
//!
//! Each stage owns one status/error/attempts column triple on
//! `email_processing_state`. Claims use `FOR UPDATE SKIP LOCKED` so two
//! concurrent batches never receive the same email for the same stage.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info, warn};

use tripline_core::{
    BookingEvidence, Category, ClaimedEmail, EmailProcessingState, Error,
    PipelineStateRepository, Result, Stage, StageOutput, StageStatus, StatusCounts,
};

use crate::emails::{email_from_row, EMAIL_COLUMNS};

const STATE_COLUMNS: &str = "s.email_id, \
     s.classification_status, s.classification_error, s.classification_attempts, \
     s.extraction_status, s.extraction_error, s.extraction_attempts, s.content_text, \
     s.booking_extraction_status, s.booking_extraction_error, s.booking_extraction_attempts, \
     s.extracted_booking_info, \
     s.trip_detection_status, s.trip_detection_error, s.trip_detection_attempts, \
     s.updated_at";

/// Column names owned by one stage.
struct StageColumns {
    status: &'static str,
    error: &'static str,
    attempts: &'static str,
    /// Output column cleared on reset, if the stage stores one here.
    output: Option<&'static str>,
}

fn columns(stage: Stage) -> StageColumns {
    match stage {
        Stage::Classification => StageColumns {
            status: "classification_status",
            error: "classification_error",
            attempts: "classification_attempts",
            output: None,
        },
        Stage::ContentExtraction => StageColumns {
            status: "extraction_status",
            error: "extraction_error",
            attempts: "extraction_attempts",
            output: Some("content_text"),
        },
        Stage::BookingExtraction => StageColumns {
            status: "booking_extraction_status",
            error: "booking_extraction_error",
            attempts: "booking_extraction_attempts",
            output: Some("extracted_booking_info"),
        },
        Stage::TripDetection => StageColumns {
            status: "trip_detection_status",
            error: "trip_detection_error",
            attempts: "trip_detection_attempts",
            output: None,
        },
    }
}

/// Extra claim predicate per stage. `$3` is the travel category list.
fn eligibility(stage: Stage) -> &'static str {
    match stage {
        Stage::Classification => "TRUE",
        Stage::ContentExtraction | Stage::BookingExtraction => "e.classification = ANY($3)",
        Stage::TripDetection => "s.booking_extraction_status = 'completed'",
    }
}

fn needs_travel_categories(stage: Stage) -> bool {
    matches!(stage, Stage::ContentExtraction | Stage::BookingExtraction)
}

fn travel_category_names() -> Vec<String> {
    Category::travel().map(|c| c.as_str().to_string()).collect()
}

fn parse_status(row: &PgRow, column: &str) -> Result<StageStatus> {
    let raw: String = row.get(column);
    raw.parse()
}

fn state_from_row(row: &PgRow) -> Result<EmailProcessingState> {
    let email_id: String = row.get("email_id");
    let mut state = EmailProcessingState::new(email_id, row.get("updated_at"));

    state.classification_status = parse_status(row, "classification_status")?;
    state.classification_error = row.get("classification_error");
    state.classification_attempts = row.get("classification_attempts");

    state.extraction_status = parse_status(row, "extraction_status")?;
    state.extraction_error = row.get("extraction_error");
    state.extraction_attempts = row.get("extraction_attempts");
    state.content_text = row.get("content_text");

    state.booking_extraction_status = parse_status(row, "booking_extraction_status")?;
    state.booking_extraction_error = row.get("booking_extraction_error");
    state.booking_extraction_attempts = row.get("booking_extraction_attempts");
    state.set_stored_booking_info(row.get::<Option<JsonValue>, _>("extracted_booking_info"));

    state.trip_detection_status = parse_status(row, "trip_detection_status")?;
    state.trip_detection_error = row.get("trip_detection_error");
    state.trip_detection_attempts = row.get("trip_detection_attempts");

    Ok(state)
}

/// PostgreSQL implementation of PipelineStateRepository.
pub struct PgPipelineStateRepository {
    pool: Pool<Postgres>,
}

impl PgPipelineStateRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineStateRepository for PgPipelineStateRepository {
    async fn claim(&self, stage: Stage, limit: usize) -> Result<Vec<ClaimedEmail>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let cols = columns(stage);
        let sql = format!(
            "UPDATE email_processing_state
             SET {status} = 'processing', {attempts} = {attempts} + 1, {error} = NULL, updated_at = $1
             WHERE email_id IN (
                 SELECT s.email_id FROM email_processing_state s
                 JOIN emails e ON e.id = s.email_id
                 WHERE s.{status} = 'pending' AND {eligible}
                 ORDER BY e.timestamp ASC NULLS LAST, e.id ASC
                 LIMIT $2
                 FOR UPDATE OF s SKIP LOCKED
             )
             RETURNING email_id",
            status = cols.status,
            attempts = cols.attempts,
            error = cols.error,
            eligible = eligibility(stage),
        );

        let mut query = sqlx::query_scalar::<_, String>(&sql)
            .bind(Utc::now())
            .bind(limit as i64);
        if needs_travel_categories(stage) {
            query = query.bind(travel_category_names());
        }
        let ids = query.fetch_all(&self.pool).await.map_err(Error::Database)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS}, {STATE_COLUMNS}
             FROM emails e JOIN email_processing_state s ON s.email_id = e.id
             WHERE e.id = ANY($1)
             ORDER BY e.timestamp ASC NULLS LAST, e.id ASC"
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let claimed = rows
            .iter()
            .map(|row| {
                Ok(ClaimedEmail {
                    email: email_from_row(row),
                    state: state_from_row(row)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            subsystem = "db",
            component = "pipeline_state",
            op = "claim",
            stage = %stage,
            batch_size = claimed.len(),
            "Claimed emails"
        );
        Ok(claimed)
    }

    async fn complete(&self, email_id: &str, output: StageOutput) -> Result<()> {
        let stage = output.stage();
        let cols = columns(stage);
        let set_output = match &output {
            StageOutput::Content(_) => ", content_text = $3",
            StageOutput::Booking(_) => ", extracted_booking_info = $3",
            StageOutput::Classification(_) | StageOutput::TripDetection => "",
        };
        let sql = format!(
            "UPDATE email_processing_state
             SET {status} = 'completed', {error} = NULL, updated_at = $2{set_output}
             WHERE email_id = $1 AND {status} = 'processing'",
            status = cols.status,
            error = cols.error,
        );

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let mut query = sqlx::query(&sql).bind(email_id).bind(Utc::now());
        match &output {
            StageOutput::Content(text) => query = query.bind(text),
            StageOutput::Booking(info) => query = query.bind(info),
            StageOutput::Classification(_) | StageOutput::TripDetection => {}
        }
        let updated = query
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!(
                "email {} is not processing {}",
                email_id, stage
            )));
        }

        if let StageOutput::Classification(category) = &output {
            sqlx::query("UPDATE emails SET classification = $2 WHERE id = $1")
                .bind(email_id)
                .bind(category.as_str())
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn fail(&self, stage: Stage, email_id: &str, error: &str) -> Result<()> {
        let cols = columns(stage);
        let sql = format!(
            "UPDATE email_processing_state
             SET {status} = 'failed', {error} = $2, updated_at = $3
             WHERE email_id = $1 AND {status} = 'processing'",
            status = cols.status,
            error = cols.error,
        );
        let updated = sqlx::query(&sql)
            .bind(email_id)
            .bind(error)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        if updated == 0 {
            return Err(Error::NotFound(format!(
                "email {} is not processing {}",
                email_id, stage
            )));
        }
        Ok(())
    }

    async fn release(&self, stage: Stage, email_ids: &[String]) -> Result<u64> {
        if email_ids.is_empty() {
            return Ok(0);
        }
        let cols = columns(stage);
        let sql = format!(
            "UPDATE email_processing_state
             SET {status} = 'pending', {attempts} = GREATEST({attempts} - 1, 0), updated_at = $2
             WHERE email_id = ANY($1) AND {status} = 'processing'",
            status = cols.status,
            attempts = cols.attempts,
        );
        let released = sqlx::query(&sql)
            .bind(email_ids)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        Ok(released)
    }

    async fn reset(&self, stage: Stage, email_ids: &[String]) -> Result<u64> {
        if email_ids.is_empty() {
            return Ok(0);
        }
        let cols = columns(stage);
        let clear_output = cols
            .output
            .map(|c| format!(", {c} = NULL"))
            .unwrap_or_default();
        // Rows in flight keep their claim.
        let sql = format!(
            "UPDATE email_processing_state
             SET {status} = 'pending', {error} = NULL, updated_at = $2{clear_output}
             WHERE email_id = ANY($1) AND {status} <> 'processing'
             RETURNING email_id",
            status = cols.status,
            error = cols.error,
        );

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let reset_ids: Vec<String> = sqlx::query_scalar(&sql)
            .bind(email_ids)
            .bind(Utc::now())
            .fetch_all(&mut *tx)
            .await
            .map_err(Error::Database)?;

        if stage == Stage::Classification && !reset_ids.is_empty() {
            sqlx::query("UPDATE emails SET classification = NULL WHERE id = ANY($1)")
                .bind(&reset_ids)
                .execute(&mut *tx)
                .await
                .map_err(Error::Database)?;
        }
        tx.commit().await.map_err(Error::Database)?;

        let count = reset_ids.len() as u64;
        if count < email_ids.len() as u64 {
            warn!(
                subsystem = "db",
                component = "pipeline_state",
                op = "reset",
                stage = %stage,
                requested = email_ids.len(),
                reset = count,
                "Some emails were not reset (unknown id or currently processing)"
            );
        }
        info!(
            subsystem = "db",
            component = "pipeline_state",
            op = "reset",
            stage = %stage,
            result_count = count,
            "Stage reset to pending"
        );
        Ok(count)
    }

    async fn reset_failed(&self, stage: Stage) -> Result<u64> {
        let failed = self.list_by_status(stage, StageStatus::Failed).await?;
        self.reset(stage, &failed).await
    }

    async fn recover_stuck(&self, stage: Stage) -> Result<u64> {
        let cols = columns(stage);
        let sql = format!(
            "UPDATE email_processing_state
             SET {status} = 'pending', updated_at = $1
             WHERE {status} = 'processing'",
            status = cols.status,
        );
        let recovered = sqlx::query(&sql)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?
            .rows_affected();
        if recovered > 0 {
            warn!(
                subsystem = "db",
                component = "pipeline_state",
                op = "recover_stuck",
                stage = %stage,
                result_count = recovered,
                "Recovered emails stuck in processing"
            );
        }
        Ok(recovered)
    }

    async fn list_by_status(&self, stage: Stage, status: StageStatus) -> Result<Vec<String>> {
        let cols = columns(stage);
        let sql = format!(
            "SELECT email_id FROM email_processing_state WHERE {status} = $1 ORDER BY email_id",
            status = cols.status,
        );
        sqlx::query_scalar(&sql)
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)
    }

    async fn status_counts(&self, stage: Stage) -> Result<StatusCounts> {
        let cols = columns(stage);
        let sql = format!(
            "SELECT {status} AS status, COUNT(*) AS n FROM email_processing_state GROUP BY {status}",
            status = cols.status,
        );
        let rows = sqlx::query(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status: StageStatus = row.get::<String, _>("status").parse()?;
            let n = row.get::<i64, _>("n").max(0) as u64;
            match status {
                StageStatus::Pending => counts.pending = n,
                StageStatus::Processing => counts.processing = n,
                StageStatus::Completed => counts.completed = n,
                StageStatus::Failed => counts.failed = n,
            }
        }
        Ok(counts)
    }

    async fn get(&self, email_id: &str) -> Result<Option<EmailProcessingState>> {
        let row = sqlx::query(&format!(
            "SELECT {STATE_COLUMNS} FROM email_processing_state s WHERE s.email_id = $1"
        ))
        .bind(email_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        row.as_ref().map(state_from_row).transpose()
    }

    async fn completed_bookings(&self) -> Result<Vec<BookingEvidence>> {
        let rows = sqlx::query(
            "SELECT s.email_id, e.timestamp, s.extracted_booking_info
             FROM email_processing_state s JOIN emails e ON e.id = s.email_id
             WHERE s.booking_extraction_status = 'completed'
               AND s.extracted_booking_info IS NOT NULL
             ORDER BY e.timestamp ASC NULLS LAST, e.id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows
            .iter()
            .map(|row| BookingEvidence {
                email_id: row.get("email_id"),
                email_timestamp: row.get("timestamp"),
                info: row.get("extracted_booking_info"),
            })
            .collect())
    }
}
