//! Core traits for tripline abstractions.
//!
//! These traits define the interfaces that concrete implementations
//! must satisfy, enabling pluggable backends and testability.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::inference::{CostBreakdown, GenerationOutput, ModelInfo, ProviderKind, Tier};
use crate::models::*;
use crate::trip::{AggregationScope, ReplaceSummary, TripRecord};

// =============================================================================
// EMAIL REPOSITORY
// =============================================================================

/// Repository for imported emails.
#[async_trait]
pub trait EmailRepository: Send + Sync {
    /// Insert records in input order. Ids that already exist are skipped,
    /// and every inserted email gets a fresh all-pending state row.
    async fn insert_many(&self, records: &[EmailRecord]) -> Result<ImportSummary>;

    /// Fetch an email by id.
    async fn get(&self, id: &str) -> Result<Option<Email>>;

    /// Total number of stored emails.
    async fn count(&self) -> Result<u64>;
}

// =============================================================================
// PIPELINE STATE REPOSITORY
// =============================================================================

/// Per-email, per-stage status store with compare-and-swap claims.
///
/// Work eligibility per stage:
///
/// | Stage | Claimable when |
/// |-------|----------------|
/// | classification | `classification_status = pending` |
/// | content extraction | `extraction_status = pending` and classification is a travel category |
/// | booking extraction | `booking_extraction_status = pending` and classification is a travel category |
/// | trip detection | `trip_detection_status = pending` and `booking_extraction_status = completed` |
#[async_trait]
pub trait PipelineStateRepository: Send + Sync {
    /// Atomically move up to `limit` eligible emails from `pending` to
    /// `processing`, incrementing their attempt counter. Rows claimed by a
    /// concurrent caller are never returned twice. Ordered by email
    /// timestamp, then id.
    async fn claim(&self, stage: Stage, limit: usize) -> Result<Vec<ClaimedEmail>>;

    /// Persist a stage output and move `processing -> completed`.
    ///
    /// Returns `NotFound` when the email is not currently processing that stage.
    async fn complete(&self, email_id: &str, output: StageOutput) -> Result<()>;

    /// Record error text and move `processing -> failed`.
    async fn fail(&self, stage: Stage, email_id: &str, error: &str) -> Result<()>;

    /// Return claimed but unprocessed emails to `pending` (cancellation).
    async fn release(&self, stage: Stage, email_ids: &[String]) -> Result<u64>;

    /// Clear one stage back to `pending` for the given emails, dropping that
    /// stage's error and output. Other stages are untouched.
    async fn reset(&self, stage: Stage, email_ids: &[String]) -> Result<u64>;

    /// Reset every `failed` row of a stage.
    async fn reset_failed(&self, stage: Stage) -> Result<u64>;

    /// Return rows left in `processing` by an interrupted run to `pending`.
    async fn recover_stuck(&self, stage: Stage) -> Result<u64>;

    /// Email ids whose stage is in `status`, ordered by id.
    async fn list_by_status(&self, stage: Stage, status: StageStatus) -> Result<Vec<String>>;

    async fn status_counts(&self, stage: Stage) -> Result<StatusCounts>;

    async fn get(&self, email_id: &str) -> Result<Option<EmailProcessingState>>;

    /// Booking info of every email whose booking extraction completed.
    async fn completed_bookings(&self) -> Result<Vec<BookingEvidence>>;
}

// =============================================================================
// TRIP REPOSITORY
// =============================================================================

/// Repository for aggregated trips and their fragments.
#[async_trait]
pub trait TripRepository: Send + Sync {
    /// Delete trips overlapping `scope` and trips holding any fragment of
    /// `records`, then insert `records`, in one transaction.
    /// On error nothing is changed.
    async fn replace_trips(
        &self,
        scope: AggregationScope,
        records: &[TripRecord],
    ) -> Result<ReplaceSummary>;

    /// All trips ordered by start date, fragments ordered by start time.
    async fn list_trips(&self) -> Result<Vec<TripRecord>>;

    /// Trips an email is linked to.
    async fn trip_ids_for_email(&self, email_id: &str) -> Result<Vec<Uuid>>;
}

/// Bundle of repository handles shared by the pipeline.
#[derive(Clone)]
pub struct Repositories {
    pub emails: Arc<dyn EmailRepository>,
    pub state: Arc<dyn PipelineStateRepository>,
    pub trips: Arc<dyn TripRepository>,
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Uniform capability interface over AI vendors.
#[async_trait]
pub trait AiProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Tier this instance was built for.
    fn tier(&self) -> Tier;

    /// Generate a completion for `prompt` under the shared system prompt.
    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput>;

    /// Cost of a call with the given token counts. Never touches the network.
    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown;

    fn model_info(&self) -> ModelInfo;
}
