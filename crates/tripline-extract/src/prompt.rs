//! Extraction request builder.
//!
//! Classification batches many emails into one prompt and expects a
//! positional JSON array back. Booking extraction sends one email body and
//! expects one of three discriminated JSON objects.

use std::fmt::Write as _;

use serde_json::Value as JsonValue;

use tripline_core::defaults::{BODY_MAX_CHARS, SENDER_MAX_CHARS, SUBJECT_MAX_CHARS};
use tripline_core::{Category, Email, ExtractedBooking};

/// Marker appended when an email body is cut to fit the prompt.
pub const TRUNCATION_MARKER: &str = "\n[... content truncated ...]";

fn category_description(category: Category) -> &'static str {
    match category {
        Category::Flight => "flight booking confirmations, e-tickets, itineraries",
        Category::Hotel => "hotel or accommodation reservation confirmations",
        Category::CarRental => "car rental reservations",
        Category::Train => "train ticket confirmations",
        Category::Cruise => "cruise booking confirmations",
        Category::Tour => "tour, excursion or activity bookings",
        Category::TravelInsurance => "travel insurance policies",
        Category::FlightChange => "flight changes, cancellations or schedule updates",
        Category::HotelChange => "hotel reservation changes or cancellations",
        Category::OtherTravel => "other travel bookings with concrete itinerary details",
        Category::Marketing => "travel company promotions, newsletters, deals",
        Category::NotTravel => "anything unrelated to travel",
    }
}

/// Keep at most `max` characters on a single line.
fn clip(text: &str, max: usize) -> String {
    text.chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .take(max)
        .collect::<String>()
        .trim()
        .to_string()
}

/// Build the classification prompt for a batch of emails.
///
/// Lines are numbered from 1 in input order; the model answers with the
/// same ids. Subjects and senders are clipped to bound token cost.
pub fn classification_prompt(emails: &[Email]) -> String {
    let n = emails.len();
    let mut prompt = String::with_capacity(1_500 + n * (SUBJECT_MAX_CHARS + SENDER_MAX_CHARS + 32));

    let _ = writeln!(prompt, "Classify these {} emails as travel-related or not.", n);
    prompt.push_str(
        "IMPORTANT: only emails that contain or change a concrete itinerary \
         (bookings, reservations, tickets, confirmations) are travel categories. \
         Promotions from travel companies are marketing.\n\n",
    );
    prompt.push_str("Categories:\n");
    for category in Category::ALL {
        let _ = writeln!(prompt, "- {}: {}", category, category_description(category));
    }
    let _ = write!(
        prompt,
        "\nReturn ONLY a JSON array with {} objects in this exact format:\n\
         [{{\"id\": 1, \"category\": \"flight\"}}, {{\"id\": 2, \"category\": \"not_travel\"}}, ...]\n\n\
         Emails to classify:\n",
        n
    );
    for (i, email) in emails.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. From: {} | Subject: {}",
            i + 1,
            clip(&email.sender, SENDER_MAX_CHARS),
            clip(&email.subject, SUBJECT_MAX_CHARS)
        );
    }
    prompt
}

/// Cap an email body, appending [`TRUNCATION_MARKER`] when cut.
pub fn cap_body(body: &str, max_chars: usize) -> String {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}{}", &body[..idx], TRUNCATION_MARKER),
        None => body.to_string(),
    }
}

const BOOKING_SHAPES: &str = r#"STEP 1: Verify the email is really travel-related.
If it is NOT travel-related, return:
{"is_travel": false, "actual_category": "not_travel", "reason": "short explanation"}

If it is travel-related but contains no booking (reminder, promotion, status update, check-in notice, general information, survey, loyalty program enrollment), return:
{"is_travel": true, "booking_type": null, "non_booking_type": "reminder|marketing|status_update|check_in|general_info|survey|program_enrollment", "reason": "short explanation"}

STEP 2: Otherwise extract the booking and return:
{
  "booking_type": "flight|hotel|car_rental|train|cruise|tour|travel_insurance|cancellation|modification",
  "status": "confirmed|cancelled|modified|pending",
  "confirmation_numbers": ["ABC123"],
  "original_booking_reference": null,
  "transport_segments": [{
    "segment_type": "flight|train|bus|ferry|car_rental",
    "carrier_name": "SWISS",
    "segment_number": "LX1234",
    "departure_location": "Zurich",
    "departure_airport_code": "ZRH",
    "arrival_location": "Oslo",
    "arrival_airport_code": "OSL",
    "departure_datetime": "2025-06-10T09:05:00",
    "arrival_datetime": "2025-06-10T11:35:00",
    "distance_km": null,
    "distance_type": "actual|straight",
    "booking_platform": null,
    "confirmation_number": "ABC123",
    "cost": 420.0
  }],
  "accommodations": [{
    "property_name": "", "address": "", "city": "", "country": "",
    "check_in_date": "2025-06-10", "check_out_date": "2025-06-14",
    "booking_platform": null, "confirmation_number": null, "cost": null
  }],
  "activities": [{
    "activity_name": "", "description": "", "start_datetime": "", "end_datetime": "",
    "location": "", "city": "", "booking_platform": null, "confirmation_number": null, "cost": null
  }],
  "cruises": [{
    "cruise_line": "", "ship_name": "", "departure_datetime": "", "arrival_datetime": "",
    "departure_port": "", "arrival_port": "", "itinerary": ["port"],
    "booking_platform": null, "confirmation_number": null, "cost": null
  }],
  "cost_info": {"total_cost": 0.0, "currency": "CHF", "cost_breakdown": {}},
  "dates": {"booking_date": null, "travel_start_date": null, "travel_end_date": null},
  "additional_info": null
}"#;

const BOOKING_RULES: &str = r#"CRITICAL REQUIREMENTS:
1. transport_segments, accommodations, activities and cruises are ALWAYS arrays, even with zero or one element: "transport_segments": [{...}] NOT "transport_details": {...}
2. Use carrier_name and segment_number for airline/rail operator and flight/train number.
3. Use null for any value that is not stated in the email. Do not guess.
4. Dates as YYYY-MM-DD, date-times as YYYY-MM-DDTHH:MM:SS in local time of the place.
5. Costs are plain numbers without currency symbols.
6. Return ONLY the JSON object, no explanation and no Markdown. Do NOT use <think> tags."#;

/// Build the booking-extraction prompt for one email.
pub fn booking_prompt(email: &Email, body: &str) -> String {
    let body = cap_body(body, BODY_MAX_CHARS);
    let classification = email
        .classification
        .map(Category::as_str)
        .unwrap_or("unclassified");

    let mut prompt = String::with_capacity(BOOKING_SHAPES.len() + BOOKING_RULES.len() + body.len() + 512);
    prompt.push_str(
        "Extract the travel booking from this email as JSON.\n\n",
    );
    prompt.push_str(BOOKING_SHAPES);
    let _ = write!(
        prompt,
        "\n\n{}\n\nEmail Details:\n- Email ID: {}\n- Subject: {}\n- From: {}\n- Date: {}\n- Classification: {}\n\nFull Email Content:\n{}\n",
        BOOKING_RULES,
        email.id,
        clip(&email.subject, SUBJECT_MAX_CHARS * 3),
        clip(&email.sender, SENDER_MAX_CHARS * 3),
        email.date,
        classification,
        body
    );
    prompt
}

/// JSON Schema of the persisted booking-extraction outcome.
pub fn booking_response_schema() -> JsonValue {
    let schema = schemars::schema_for!(ExtractedBooking);
    serde_json::to_value(schema).unwrap_or(JsonValue::Null)
}
