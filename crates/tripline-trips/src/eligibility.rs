//! Screening of completed booking extractions before aggregation.

use tripline_core::defaults::TEST_BOOKING_MARKERS;
use tripline_core::{BookingEvidence, BookingRecord, ExtractedBooking};

use crate::policy::GroupingPolicy;

/// What aggregation does with one email's extraction.
#[derive(Debug, Clone, PartialEq)]
pub enum Eligibility {
    /// Booking whose fragments take part in grouping.
    Eligible(BookingRecord),
    /// Non-booking or non-travel answer; contributes nothing.
    NoBooking,
    /// Booking deliberately left out of every trip.
    Excluded(String),
}

/// Decide whether an email's booking takes part in aggregation.
pub fn screen(evidence: &BookingEvidence, policy: &GroupingPolicy) -> Eligibility {
    let extracted = match ExtractedBooking::from_json(&evidence.info) {
        Ok(extracted) => extracted,
        Err(e) => return Eligibility::Excluded(format!("unreadable booking info: {}", e)),
    };
    let record = match extracted {
        ExtractedBooking::Booking(record) => record,
        ExtractedBooking::NonBooking(_) | ExtractedBooking::NonTravel(_) => {
            return Eligibility::NoBooking
        }
    };

    if let Some(number) = test_confirmation(&record) {
        return Eligibility::Excluded(format!(
            "test booking (confirmation number '{}')",
            number
        ));
    }
    if is_local(&record, policy) {
        return Eligibility::Excluded(format!(
            "booking is entirely within the home area ({})",
            policy.home_city
        ));
    }
    Eligibility::Eligible(record)
}

fn test_confirmation(record: &BookingRecord) -> Option<&str> {
    record.all_confirmation_numbers().into_iter().find(|number| {
        let lower = number.to_ascii_lowercase();
        TEST_BOOKING_MARKERS.iter().any(|marker| lower.contains(marker))
    })
}

/// Every located fragment lies in the home area.
///
/// Bookings without any location are not local; they are simply
/// unplaceable and handled by grouping.
fn is_local(record: &BookingRecord, policy: &GroupingPolicy) -> bool {
    let mut locations: Vec<&str> = Vec::new();
    for segment in &record.transport_segments {
        locations.extend(segment.departure_location.as_deref());
        locations.extend(segment.arrival_location.as_deref());
    }
    for stay in &record.accommodations {
        locations.extend(stay.city.as_deref().or(stay.address.as_deref()));
    }
    for activity in &record.activities {
        locations.extend(activity.city.as_deref().or(activity.location.as_deref()));
    }
    for cruise in &record.cruises {
        locations.extend(cruise.departure_port.as_deref());
        locations.extend(cruise.arrival_port.as_deref());
        locations.extend(cruise.itinerary.iter().map(String::as_str));
    }
    locations.retain(|l| !l.trim().is_empty());
    !locations.is_empty() && locations.iter().all(|l| policy.is_home(l))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn evidence(info: serde_json::Value) -> BookingEvidence {
        BookingEvidence {
            email_id: "e1".into(),
            email_timestamp: None,
            info,
        }
    }

    #[test]
    fn test_negative_outcomes_contribute_nothing() {
        let policy = GroupingPolicy::default();
        let info = json!({"outcome": "non_booking", "non_booking_type": "reminder"});
        assert_eq!(screen(&evidence(info), &policy), Eligibility::NoBooking);
    }

    #[test]
    fn test_test_booking_excluded() {
        let policy = GroupingPolicy::default();
        let info = json!({
            "outcome": "booking",
            "booking_type": "hotel",
            "confirmation_numbers": ["DEMO-0001"],
            "accommodations": [{"city": "Oslo"}]
        });
        let result = screen(&evidence(info), &policy);
        assert!(matches!(result, Eligibility::Excluded(reason) if reason.contains("DEMO-0001")));
    }

    #[test]
    fn test_local_booking_excluded() {
        let policy = GroupingPolicy::default();
        let info = json!({
            "outcome": "booking",
            "booking_type": "tour",
            "activities": [{"activity_name": "Old town walk", "city": "Zürich"}]
        });
        assert!(matches!(screen(&evidence(info), &policy), Eligibility::Excluded(_)));

        let away = json!({
            "outcome": "booking",
            "booking_type": "flight",
            "transport_segments": [{"departure_location": "Zurich", "arrival_location": "Oslo"}]
        });
        assert!(matches!(screen(&evidence(away), &policy), Eligibility::Eligible(_)));
    }

    #[test]
    fn test_unreadable_info_excluded() {
        let policy = GroupingPolicy::default();
        let result = screen(&evidence(json!({"booking_type": "hotel"})), &policy);
        assert!(matches!(result, Eligibility::Excluded(reason) if reason.starts_with("unreadable")));
    }
}
