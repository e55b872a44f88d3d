//! Email repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use tracing::{debug, info};

use tripline_core::{Email, EmailRecord, EmailRepository, Error, ImportSummary, Result};

pub(crate) const EMAIL_COLUMNS: &str =
    "e.id, e.subject, e.sender, e.date, e.timestamp, e.classification, e.raw_content, e.imported_at";

/// Map a row selected with [`EMAIL_COLUMNS`].
pub(crate) fn email_from_row(row: &PgRow) -> Email {
    let classification: Option<String> = row.get("classification");
    Email {
        id: row.get("id"),
        subject: row.get("subject"),
        sender: row.get("sender"),
        date: row.get("date"),
        timestamp: row.get("timestamp"),
        // Values outside the taxonomy can only come from manual edits; treat
        // them as unclassified.
        classification: classification.and_then(|c| c.parse().ok()),
        raw_content: row.get("raw_content"),
        imported_at: row.get("imported_at"),
    }
}

/// PostgreSQL implementation of EmailRepository.
pub struct PgEmailRepository {
    pool: Pool<Postgres>,
}

impl PgEmailRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EmailRepository for PgEmailRepository {
    async fn insert_many(&self, records: &[EmailRecord]) -> Result<ImportSummary> {
        let now = Utc::now();
        let mut summary = ImportSummary::default();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for record in records {
            let email = Email::from_record(record.clone(), now);
            let inserted = sqlx::query(
                "INSERT INTO emails (id, subject, sender, date, timestamp, raw_content, imported_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(&email.id)
            .bind(&email.subject)
            .bind(&email.sender)
            .bind(&email.date)
            .bind(email.timestamp)
            .bind(&email.raw_content)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?
            .rows_affected();

            if inserted == 0 {
                debug!(email_id = %email.id, "Email already imported, skipping");
                summary.skipped += 1;
                continue;
            }

            sqlx::query(
                "INSERT INTO email_processing_state (email_id, updated_at)
                 VALUES ($1, $2)
                 ON CONFLICT (email_id) DO NOTHING",
            )
            .bind(&email.id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            summary.inserted += 1;
        }

        tx.commit().await.map_err(Error::Database)?;

        info!(
            subsystem = "db",
            component = "emails",
            op = "insert_many",
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Imported emails"
        );
        Ok(summary)
    }

    async fn get(&self, id: &str) -> Result<Option<Email>> {
        let row = sqlx::query(&format!("SELECT {EMAIL_COLUMNS} FROM emails e WHERE e.id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(row.as_ref().map(email_from_row))
    }

    async fn count(&self) -> Result<u64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM emails")
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(count.0.max(0) as u64)
    }
}
