//! Canonical booking-extraction schema and the fragments materialized from it.
//!
//! [`ExtractedBooking`] is what the normalizer persists into
//! `extracted_booking_info`; every list field is always a list. Fragments
//! are rebuilt from it on each aggregation pass and never stored on their own.

use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDateTime;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::Category;

// =============================================================================
// ENUMS
// =============================================================================

/// Kind of booking an email confirms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BookingType {
    Flight,
    Hotel,
    CarRental,
    Train,
    Cruise,
    Tour,
    TravelInsurance,
    Cancellation,
    Modification,
}

impl BookingType {
    pub const ALL: [BookingType; 9] = [
        BookingType::Flight,
        BookingType::Hotel,
        BookingType::CarRental,
        BookingType::Train,
        BookingType::Cruise,
        BookingType::Tour,
        BookingType::TravelInsurance,
        BookingType::Cancellation,
        BookingType::Modification,
    ];
}

/// Lifecycle state of a booking as stated by the email.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Confirmed,
    Cancelled,
    Modified,
    Pending,
    #[default]
    Unknown,
}

impl BookingStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::Modified => "modified",
            BookingStatus::Pending => "pending",
            BookingStatus::Unknown => "unknown",
        }
    }

    pub fn is_cancelled(self) -> bool {
        self == BookingStatus::Cancelled
    }
}

/// Why a travel email carries no booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum NonBookingType {
    Reminder,
    Marketing,
    StatusUpdate,
    CheckIn,
    GeneralInfo,
    Survey,
    ProgramEnrollment,
}

// =============================================================================
// CANONICAL RECORD
// =============================================================================

/// One leg of transport (flight, train, bus, ferry, car rental pickup).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TransportSegment {
    pub segment_type: Option<String>,
    pub carrier_name: Option<String>,
    /// Flight or train number.
    pub segment_number: Option<String>,
    pub departure_location: Option<String>,
    pub departure_airport_code: Option<String>,
    pub arrival_location: Option<String>,
    pub arrival_airport_code: Option<String>,
    pub departure_datetime: Option<String>,
    pub arrival_datetime: Option<String>,
    pub distance_km: Option<f64>,
    /// "actual" or "straight".
    pub distance_type: Option<String>,
    pub booking_platform: Option<String>,
    pub confirmation_number: Option<String>,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Accommodation {
    pub property_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub check_in_date: Option<String>,
    pub check_out_date: Option<String>,
    pub booking_platform: Option<String>,
    pub confirmation_number: Option<String>,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Activity {
    pub activity_name: Option<String>,
    pub description: Option<String>,
    pub start_datetime: Option<String>,
    pub end_datetime: Option<String>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub booking_platform: Option<String>,
    pub confirmation_number: Option<String>,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct Cruise {
    pub cruise_line: Option<String>,
    pub ship_name: Option<String>,
    pub departure_datetime: Option<String>,
    pub arrival_datetime: Option<String>,
    pub departure_port: Option<String>,
    pub arrival_port: Option<String>,
    pub itinerary: Vec<String>,
    pub booking_platform: Option<String>,
    pub confirmation_number: Option<String>,
    pub cost: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct CostInfo {
    pub total_cost: f64,
    pub currency: Option<String>,
    pub cost_breakdown: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct BookingDates {
    pub booking_date: Option<String>,
    pub travel_start_date: Option<String>,
    pub travel_end_date: Option<String>,
}

/// An email that confirms, changes or cancels a booking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BookingRecord {
    pub booking_type: BookingType,
    #[serde(default)]
    pub status: BookingStatus,
    #[serde(default)]
    pub confirmation_numbers: Vec<String>,
    /// For cancellations and changes: the booking being referred to.
    #[serde(default)]
    pub original_booking_reference: Option<String>,
    #[serde(default)]
    pub transport_segments: Vec<TransportSegment>,
    #[serde(default)]
    pub accommodations: Vec<Accommodation>,
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub cruises: Vec<Cruise>,
    #[serde(default)]
    pub cost_info: CostInfo,
    #[serde(default)]
    pub dates: BookingDates,
    #[serde(default)]
    pub additional_info: Option<JsonValue>,
}

impl BookingRecord {
    pub fn fragment_count(&self) -> usize {
        self.transport_segments.len()
            + self.accommodations.len()
            + self.activities.len()
            + self.cruises.len()
    }

    /// Booking-level and per-fragment confirmation numbers, deduplicated.
    pub fn all_confirmation_numbers(&self) -> Vec<&str> {
        let mut numbers: Vec<&str> = self
            .confirmation_numbers
            .iter()
            .map(String::as_str)
            .chain(
                self.transport_segments
                    .iter()
                    .filter_map(|s| s.confirmation_number.as_deref()),
            )
            .chain(
                self.accommodations
                    .iter()
                    .filter_map(|a| a.confirmation_number.as_deref()),
            )
            .chain(
                self.activities
                    .iter()
                    .filter_map(|a| a.confirmation_number.as_deref()),
            )
            .chain(
                self.cruises
                    .iter()
                    .filter_map(|c| c.confirmation_number.as_deref()),
            )
            .collect();
        numbers.sort_unstable();
        numbers.dedup();
        numbers
    }
}

/// Travel email without booking details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NonBookingInfo {
    pub non_booking_type: NonBookingType,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Email the extraction model judged not to be travel-related.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct NonTravelInfo {
    pub actual_category: Category,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Persisted booking-extraction outcome of one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExtractedBooking {
    Booking(BookingRecord),
    NonBooking(NonBookingInfo),
    NonTravel(NonTravelInfo),
}

impl ExtractedBooking {
    pub fn as_booking(&self) -> Option<&BookingRecord> {
        match self {
            ExtractedBooking::Booking(record) => Some(record),
            _ => None,
        }
    }

    pub fn to_json(&self) -> crate::Result<JsonValue> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn from_json(value: &JsonValue) -> crate::Result<Self> {
        Ok(serde_json::from_value(value.clone())?)
    }
}

// =============================================================================
// FRAGMENTS
// =============================================================================

/// Fragment kind, also the name of its trip-level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    TransportSegment,
    Accommodation,
    Activity,
    Cruise,
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FragmentKind::TransportSegment => "transport_segment",
            FragmentKind::Accommodation => "accommodation",
            FragmentKind::Activity => "activity",
            FragmentKind::Cruise => "cruise",
        }
    }
}

impl fmt::Display for FragmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportFragment {
    pub segment_type: Option<String>,
    pub carrier_name: Option<String>,
    pub segment_number: Option<String>,
    pub departure_location: Option<String>,
    pub departure_code: Option<String>,
    pub arrival_location: Option<String>,
    pub arrival_code: Option<String>,
    pub departure: Option<NaiveDateTime>,
    pub arrival: Option<NaiveDateTime>,
    pub distance_km: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccommodationFragment {
    pub property_name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub check_in: Option<NaiveDateTime>,
    pub check_out: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityFragment {
    pub activity_name: Option<String>,
    pub location: Option<String>,
    pub city: Option<String>,
    pub start: Option<NaiveDateTime>,
    pub end: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CruiseFragment {
    pub cruise_line: Option<String>,
    pub ship_name: Option<String>,
    pub departure_port: Option<String>,
    pub arrival_port: Option<String>,
    pub itinerary: Vec<String>,
    pub departure: Option<NaiveDateTime>,
    pub arrival: Option<NaiveDateTime>,
}

/// Type-specific part of a fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FragmentDetail {
    TransportSegment(TransportFragment),
    Accommodation(AccommodationFragment),
    Activity(ActivityFragment),
    Cruise(CruiseFragment),
}

/// A single normalized booking unit extracted from one email.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookingFragment {
    /// Originating email.
    pub email_id: String,
    /// Position of this fragment within its kind's list in the email.
    pub index: usize,
    pub status: BookingStatus,
    pub confirmation_number: Option<String>,
    pub booking_platform: Option<String>,
    pub cost: Option<f64>,
    pub currency: Option<String>,
    pub detail: FragmentDetail,
}

impl BookingFragment {
    pub fn kind(&self) -> FragmentKind {
        match self.detail {
            FragmentDetail::TransportSegment(_) => FragmentKind::TransportSegment,
            FragmentDetail::Accommodation(_) => FragmentKind::Accommodation,
            FragmentDetail::Activity(_) => FragmentKind::Activity,
            FragmentDetail::Cruise(_) => FragmentKind::Cruise,
        }
    }

    pub fn start(&self) -> Option<NaiveDateTime> {
        match &self.detail {
            FragmentDetail::TransportSegment(t) => t.departure,
            FragmentDetail::Accommodation(a) => a.check_in,
            FragmentDetail::Activity(a) => a.start,
            FragmentDetail::Cruise(c) => c.departure,
        }
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        match &self.detail {
            FragmentDetail::TransportSegment(t) => t.arrival,
            FragmentDetail::Accommodation(a) => a.check_out,
            FragmentDetail::Activity(a) => a.end,
            FragmentDetail::Cruise(c) => c.arrival,
        }
    }

    /// Latest known instant of the fragment, falling back to its start.
    pub fn last_instant(&self) -> Option<NaiveDateTime> {
        match (self.start(), self.end()) {
            (Some(s), Some(e)) => Some(s.max(e)),
            (s, e) => e.or(s),
        }
    }

    /// Carrier, operator or property name.
    pub fn operator_name(&self) -> Option<&str> {
        match &self.detail {
            FragmentDetail::TransportSegment(t) => t.carrier_name.as_deref(),
            FragmentDetail::Accommodation(a) => a.property_name.as_deref(),
            FragmentDetail::Activity(a) => a.activity_name.as_deref(),
            FragmentDetail::Cruise(c) => c
                .cruise_line
                .as_deref()
                .or(c.ship_name.as_deref()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.status.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extracted_booking_tagging() {
        let value = json!({
            "outcome": "non_booking",
            "non_booking_type": "check_in",
            "reason": "online check-in reminder"
        });
        let parsed = ExtractedBooking::from_json(&value).unwrap();
        assert!(matches!(
            parsed,
            ExtractedBooking::NonBooking(NonBookingInfo {
                non_booking_type: NonBookingType::CheckIn,
                ..
            })
        ));
        assert!(parsed.as_booking().is_none());
    }

    #[test]
    fn test_booking_record_defaults() {
        let value = json!({"outcome": "booking", "booking_type": "hotel"});
        let parsed = ExtractedBooking::from_json(&value).unwrap();
        let record = parsed.as_booking().unwrap();
        assert_eq!(record.status, BookingStatus::Unknown);
        assert!(record.transport_segments.is_empty());
        assert_eq!(record.cost_info.total_cost, 0.0);
    }

    #[test]
    fn test_all_confirmation_numbers_dedup() {
        let record = BookingRecord {
            booking_type: BookingType::Flight,
            status: BookingStatus::Confirmed,
            confirmation_numbers: vec!["ABC123".into()],
            original_booking_reference: None,
            transport_segments: vec![TransportSegment {
                confirmation_number: Some("ABC123".into()),
                ..Default::default()
            }],
            accommodations: vec![Accommodation {
                confirmation_number: Some("HTL9".into()),
                ..Default::default()
            }],
            activities: vec![],
            cruises: vec![],
            cost_info: CostInfo::default(),
            dates: BookingDates::default(),
            additional_info: None,
        };
        assert_eq!(record.all_confirmation_numbers(), vec!["ABC123", "HTL9"]);
        assert_eq!(record.fragment_count(), 2);
    }

    #[test]
    fn test_fragment_last_instant() {
        let start = chrono::NaiveDate::from_ymd_opt(2025, 6, 10)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let fragment = BookingFragment {
            email_id: "e1".into(),
            index: 0,
            status: BookingStatus::Confirmed,
            confirmation_number: None,
            booking_platform: None,
            cost: None,
            currency: None,
            detail: FragmentDetail::TransportSegment(TransportFragment {
                segment_type: Some("flight".into()),
                carrier_name: Some("SWISS".into()),
                segment_number: Some("LX1234".into()),
                departure_location: Some("Zurich".into()),
                departure_code: Some("ZRH".into()),
                arrival_location: Some("Oslo".into()),
                arrival_code: None,
                departure: Some(start),
                arrival: None,
                distance_km: None,
            }),
        };
        assert_eq!(fragment.kind(), FragmentKind::TransportSegment);
        assert_eq!(fragment.last_instant(), Some(start));
        assert_eq!(fragment.operator_name(), Some("SWISS"));
    }
}
