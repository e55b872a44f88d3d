//! Email and pipeline-state models.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::temporal::parse_email_date;

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Closed classification taxonomy for emails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Flight,
    Hotel,
    CarRental,
    Train,
    Cruise,
    Tour,
    TravelInsurance,
    FlightChange,
    HotelChange,
    OtherTravel,
    /// Travel-company promotion without booking details.
    Marketing,
    NotTravel,
}

impl Category {
    pub const ALL: [Category; 12] = [
        Category::Flight,
        Category::Hotel,
        Category::CarRental,
        Category::Train,
        Category::Cruise,
        Category::Tour,
        Category::TravelInsurance,
        Category::FlightChange,
        Category::HotelChange,
        Category::OtherTravel,
        Category::Marketing,
        Category::NotTravel,
    ];

    /// `marketing` and `not_travel` are the only non-travel categories.
    pub fn is_travel(self) -> bool {
        !matches!(self, Category::Marketing | Category::NotTravel)
    }

    /// All categories that make an email eligible for booking extraction.
    pub fn travel() -> impl Iterator<Item = Category> {
        Self::ALL.into_iter().filter(|c| c.is_travel())
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Flight => "flight",
            Category::Hotel => "hotel",
            Category::CarRental => "car_rental",
            Category::Train => "train",
            Category::Cruise => "cruise",
            Category::Tour => "tour",
            Category::TravelInsurance => "travel_insurance",
            Category::FlightChange => "flight_change",
            Category::HotelChange => "hotel_change",
            Category::OtherTravel => "other_travel",
            Category::Marketing => "marketing",
            Category::NotTravel => "not_travel",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown category '{}'", s)))
    }
}

// =============================================================================
// STAGES
// =============================================================================

/// One step of the per-email pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Classification,
    ContentExtraction,
    BookingExtraction,
    TripDetection,
}

impl Stage {
    /// Stages in pipeline order.
    pub const ALL: [Stage; 4] = [
        Stage::Classification,
        Stage::ContentExtraction,
        Stage::BookingExtraction,
        Stage::TripDetection,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Classification => "classification",
            Stage::ContentExtraction => "content_extraction",
            Stage::BookingExtraction => "booking_extraction",
            Stage::TripDetection => "trip_detection",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "classification" | "classify" => Ok(Stage::Classification),
            "content_extraction" | "content" => Ok(Stage::ContentExtraction),
            "booking_extraction" | "booking" => Ok(Stage::BookingExtraction),
            "trip_detection" | "trips" => Ok(Stage::TripDetection),
            _ => Err(Error::InvalidInput(format!("unknown stage '{}'", s))),
        }
    }
}

/// Status of one stage for one email.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl StageStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "pending",
            StageStatus::Processing => "processing",
            StageStatus::Completed => "completed",
            StageStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(StageStatus::Pending),
            "processing" => Ok(StageStatus::Processing),
            "completed" => Ok(StageStatus::Completed),
            "failed" => Ok(StageStatus::Failed),
            _ => Err(Error::InvalidInput(format!("unknown stage status '{}'", s))),
        }
    }
}

// =============================================================================
// EMAILS
// =============================================================================

/// Email as delivered by the import collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// RFC 2822-like date string.
    pub date: String,
    #[serde(default)]
    pub raw_content: Option<String>,
}

/// Stored email. Only `classification` changes after import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    pub id: String,
    pub subject: String,
    pub sender: String,
    /// Date exactly as imported.
    pub date: String,
    /// Parsed form of `date`, when parseable.
    pub timestamp: Option<DateTime<Utc>>,
    pub classification: Option<Category>,
    pub raw_content: Option<String>,
    pub imported_at: DateTime<Utc>,
}

impl Email {
    /// Build a stored email from an import record.
    pub fn from_record(record: EmailRecord, imported_at: DateTime<Utc>) -> Self {
        let timestamp = parse_email_date(&record.date);
        Self {
            id: record.id,
            subject: record.subject,
            sender: record.sender,
            date: record.date,
            timestamp,
            classification: None,
            raw_content: record.raw_content,
            imported_at,
        }
    }
}

/// Outcome of importing a batch of email records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub inserted: u64,
    /// Records whose id already existed.
    pub skipped: u64,
}

// =============================================================================
// PROCESSING STATE
// =============================================================================

/// Per-email pipeline state; one row per email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailProcessingState {
    pub email_id: String,

    pub classification_status: StageStatus,
    pub classification_error: Option<String>,
    pub classification_attempts: i32,

    pub extraction_status: StageStatus,
    pub extraction_error: Option<String>,
    pub extraction_attempts: i32,
    /// Cleaned message body produced by content extraction.
    pub content_text: Option<String>,

    pub booking_extraction_status: StageStatus,
    pub booking_extraction_error: Option<String>,
    pub booking_extraction_attempts: i32,
    extracted_booking_info: Option<JsonValue>,

    pub trip_detection_status: StageStatus,
    pub trip_detection_error: Option<String>,
    pub trip_detection_attempts: i32,

    pub updated_at: DateTime<Utc>,
}

impl EmailProcessingState {
    /// Fresh state with every stage pending.
    pub fn new(email_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            email_id: email_id.into(),
            classification_status: StageStatus::Pending,
            classification_error: None,
            classification_attempts: 0,
            extraction_status: StageStatus::Pending,
            extraction_error: None,
            extraction_attempts: 0,
            content_text: None,
            booking_extraction_status: StageStatus::Pending,
            booking_extraction_error: None,
            booking_extraction_attempts: 0,
            extracted_booking_info: None,
            trip_detection_status: StageStatus::Pending,
            trip_detection_error: None,
            trip_detection_attempts: 0,
            updated_at: now,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Classification => self.classification_status,
            Stage::ContentExtraction => self.extraction_status,
            Stage::BookingExtraction => self.booking_extraction_status,
            Stage::TripDetection => self.trip_detection_status,
        }
    }

    pub fn error(&self, stage: Stage) -> Option<&str> {
        match stage {
            Stage::Classification => self.classification_error.as_deref(),
            Stage::ContentExtraction => self.extraction_error.as_deref(),
            Stage::BookingExtraction => self.booking_extraction_error.as_deref(),
            Stage::TripDetection => self.trip_detection_error.as_deref(),
        }
    }

    pub fn attempts(&self, stage: Stage) -> i32 {
        match stage {
            Stage::Classification => self.classification_attempts,
            Stage::ContentExtraction => self.extraction_attempts,
            Stage::BookingExtraction => self.booking_extraction_attempts,
            Stage::TripDetection => self.trip_detection_attempts,
        }
    }

    /// Normalized booking info, readable only once booking extraction completed.
    pub fn booking_info(&self) -> Option<&JsonValue> {
        if self.booking_extraction_status == StageStatus::Completed {
            self.extracted_booking_info.as_ref()
        } else {
            None
        }
    }

    /// Raw column value regardless of status; for persistence layers only.
    pub fn stored_booking_info(&self) -> Option<&JsonValue> {
        self.extracted_booking_info.as_ref()
    }

    /// Set the stored booking info; for persistence layers only.
    pub fn set_stored_booking_info(&mut self, info: Option<JsonValue>) {
        self.extracted_booking_info = info;
    }
}

/// Email paired with its state, as returned by a claim.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedEmail {
    pub email: Email,
    pub state: EmailProcessingState,
}

/// Result persisted when a stage completes for one email.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Classification(Category),
    Content(String),
    Booking(JsonValue),
    TripDetection,
}

impl StageOutput {
    pub fn stage(&self) -> Stage {
        match self {
            StageOutput::Classification(_) => Stage::Classification,
            StageOutput::Content(_) => Stage::ContentExtraction,
            StageOutput::Booking(_) => Stage::BookingExtraction,
            StageOutput::TripDetection => Stage::TripDetection,
        }
    }
}

/// Number of emails in each status for one stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: StageStatus) {
        match status {
            StageStatus::Pending => self.pending += 1,
            StageStatus::Processing => self.processing += 1,
            StageStatus::Completed => self.completed += 1,
            StageStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Completed booking-extraction output of one email, input to aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingEvidence {
    pub email_id: String,
    pub email_timestamp: Option<DateTime<Utc>>,
    pub info: JsonValue,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_travel_flag_matches_taxonomy() {
        for category in Category::ALL {
            let expected = !matches!(category, Category::Marketing | Category::NotTravel);
            assert_eq!(category.is_travel(), expected, "{}", category);
        }
        assert_eq!(Category::travel().count(), 10);
    }

    #[test]
    fn test_category_round_trips_through_str() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
        assert_eq!(" Car_Rental ".parse::<Category>().unwrap(), Category::CarRental);
        assert!("classification_failed".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_names() {
        let json = serde_json::to_string(&Category::TravelInsurance).unwrap();
        assert_eq!(json, "\"travel_insurance\"");
    }

    #[test]
    fn test_stage_aliases() {
        assert_eq!("booking".parse::<Stage>().unwrap(), Stage::BookingExtraction);
        assert_eq!("trip-detection".parse::<Stage>().unwrap(), Stage::TripDetection);
        assert!("import".parse::<Stage>().is_err());
    }

    #[test]
    fn test_booking_info_hidden_until_completed() {
        let mut state = EmailProcessingState::new("e1", Utc::now());
        state.set_stored_booking_info(Some(serde_json::json!({"outcome": "booking"})));
        state.booking_extraction_status = StageStatus::Processing;
        assert!(state.booking_info().is_none());

        state.booking_extraction_status = StageStatus::Completed;
        assert!(state.booking_info().is_some());
    }

    #[test]
    fn test_email_from_record_parses_date() {
        let record = EmailRecord {
            id: "m1".into(),
            subject: "Your flight".into(),
            sender: "noreply@swiss.com".into(),
            date: "Tue, 3 Jun 2025 10:15:00 +0200".into(),
            raw_content: None,
        };
        let email = Email::from_record(record, Utc::now());
        assert!(email.timestamp.is_some());
        assert!(email.classification.is_none());
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(StageStatus::Pending);
        counts.add(StageStatus::Failed);
        counts.add(StageStatus::Failed);
        assert_eq!(counts.failed, 2);
        assert_eq!(counts.total(), 3);
    }
}
