//! Response normalizer.
//!
//! Turns raw model output into the canonical shapes of `tripline-core`.
//! Nothing here returns an error or panics: every input produces an outcome,
//! and failed outcomes are kept distinct from "not travel" and "no booking"
//! answers so callers never confuse a broken response with a negative one.
//!
//! Repairs applied to booking responses are recorded as [`Coercion`]s and
//! logged at WARN.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use tracing::{debug, warn};

use tripline_core::defaults::RESPONSE_EXCERPT_CHARS;
use tripline_core::{
    Accommodation, Activity, BookingDates, BookingRecord, BookingStatus, BookingType, Category,
    CostInfo, Cruise, Error, ExtractedBooking, NonBookingInfo, NonBookingType, NonTravelInfo,
    Result, TransportSegment,
};
use tripline_inference::strip_thinking;

// =============================================================================
// JSON PAYLOAD
// =============================================================================

fn fence_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("valid regex"))
}

/// First `max` characters of a response, for diagnostic error text.
pub fn excerpt(raw: &str, max: usize) -> String {
    let mut out: String = raw.chars().take(max).collect();
    if raw.chars().nth(max).is_some() {
        out.push_str("...");
    }
    out
}

/// Locate the JSON value in a model response.
///
/// Removes reasoning blocks and Markdown fences, then takes the first
/// complete JSON object or array, ignoring any prose around it.
pub fn extract_json_payload(raw: &str) -> Option<JsonValue> {
    let text = strip_thinking(raw);
    let body = match fence_regex().captures(&text) {
        Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or_default(),
        None => text.as_str(),
    };
    let body = body.trim();

    if let Ok(value) = serde_json::from_str::<JsonValue>(body) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    // Try each opening bracket until one yields a complete value.
    body.char_indices()
        .filter(|(_, c)| *c == '{' || *c == '[')
        .find_map(|(idx, _)| {
            let mut stream =
                serde_json::Deserializer::from_str(&body[idx..]).into_iter::<JsonValue>();
            match stream.next() {
                Some(Ok(value)) if value.is_object() || value.is_array() => Some(value),
                _ => None,
            }
        })
}

// =============================================================================
// CLASSIFICATION
// =============================================================================

/// Per-email result of a classification batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassificationOutcome {
    Classified(Category),
    /// The response carried no usable answer for this email.
    Failed(String),
}

impl ClassificationOutcome {
    pub fn category(&self) -> Option<Category> {
        match self {
            ClassificationOutcome::Classified(c) => Some(*c),
            ClassificationOutcome::Failed(_) => None,
        }
    }

    /// Derived from the category; `None` for failed results.
    pub fn is_travel(&self) -> Option<bool> {
        self.category().map(Category::is_travel)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, ClassificationOutcome::Failed(_))
    }
}

fn classification_entries(payload: JsonValue, expected: usize) -> Option<Vec<JsonValue>> {
    match payload {
        JsonValue::Array(items) => Some(items),
        JsonValue::Object(map) => {
            let wrapped = map.values().find(|v| v.is_array()).cloned();
            match wrapped {
                Some(JsonValue::Array(items)) => Some(items),
                _ if expected == 1 => Some(vec![JsonValue::Object(map)]),
                _ => None,
            }
        }
        _ => None,
    }
}

fn entry_id(entry: &Map<String, JsonValue>) -> Option<u64> {
    match entry.get("id")? {
        JsonValue::Number(n) => n.as_u64(),
        JsonValue::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Normalize a classification response for a batch of `expected` emails.
///
/// Always returns exactly `expected` outcomes in input order. Ids are
/// 1-based positions; entries without an id take their array position.
/// Unknown categories and duplicated ids fail only the affected emails;
/// ids outside the batch are ignored.
pub fn normalize_classification(raw: &str, expected: usize) -> Vec<ClassificationOutcome> {
    let entries = extract_json_payload(raw).and_then(|p| classification_entries(p, expected));
    let Some(entries) = entries else {
        let reason = format!(
            "classification response is not a JSON array: {}",
            excerpt(raw, RESPONSE_EXCERPT_CHARS)
        );
        warn!(
            subsystem = "extract",
            component = "normalizer",
            op = "classification",
            batch_size = expected,
            "Unparseable classification response"
        );
        return vec![ClassificationOutcome::Failed(reason); expected];
    };

    let mut results: Vec<Option<ClassificationOutcome>> = vec![None; expected];
    let mut seen: HashSet<usize> = HashSet::new();

    for (position, entry) in entries.iter().enumerate() {
        let Some(obj) = entry.as_object() else {
            if position < expected && results[position].is_none() {
                results[position] = Some(ClassificationOutcome::Failed(
                    "classification entry is not an object".to_string(),
                ));
            }
            continue;
        };
        let id = entry_id(obj).unwrap_or(position as u64 + 1);
        if id == 0 || id > expected as u64 {
            debug!(subsystem = "extract", component = "normalizer", id, "Ignoring classification id outside batch");
            continue;
        }
        let slot = (id - 1) as usize;
        if !seen.insert(slot) {
            results[slot] = Some(ClassificationOutcome::Failed(format!(
                "duplicate classification id {}",
                id
            )));
            continue;
        }
        let outcome = match obj.get("category").and_then(JsonValue::as_str) {
            Some(name) => match name.parse::<Category>() {
                Ok(category) => ClassificationOutcome::Classified(category),
                Err(_) => ClassificationOutcome::Failed(format!("unknown category '{}'", name)),
            },
            None => ClassificationOutcome::Failed("missing category".to_string()),
        };
        results[slot] = Some(outcome);
    }

    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            r.unwrap_or_else(|| {
                ClassificationOutcome::Failed(format!("no classification returned for id {}", i + 1))
            })
        })
        .collect()
}

// =============================================================================
// COERCIONS
// =============================================================================

/// Kind of repair applied to a booking response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoercionKind {
    /// A lone object where a list is required.
    ObjectToList,
    NullToEmptyList,
    StringToList,
    StringToNumber,
    NumberToString,
    /// Response was a one-element array around the object.
    UnwrappedArray,
    MissingStatus,
    NullToZero,
    /// Field renamed from a name the model is known to use.
    RenamedKey,
    /// List entry or map value that could not be used.
    DroppedEntry,
    /// Value of the wrong type replaced by null or a default.
    InvalidValue,
    /// Enum text outside the allowed set replaced by a fallback.
    UnknownEnum,
}

impl CoercionKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CoercionKind::ObjectToList => "object_to_list",
            CoercionKind::NullToEmptyList => "null_to_empty_list",
            CoercionKind::StringToList => "string_to_list",
            CoercionKind::StringToNumber => "string_to_number",
            CoercionKind::NumberToString => "number_to_string",
            CoercionKind::UnwrappedArray => "unwrapped_array",
            CoercionKind::MissingStatus => "missing_status",
            CoercionKind::NullToZero => "null_to_zero",
            CoercionKind::RenamedKey => "renamed_key",
            CoercionKind::DroppedEntry => "dropped_entry",
            CoercionKind::InvalidValue => "invalid_value",
            CoercionKind::UnknownEnum => "unknown_enum",
        }
    }
}

impl fmt::Display for CoercionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coercion {
    /// Dotted path of the repaired field, e.g. `accommodations` or
    /// `transport_segments[0].cost`.
    pub path: String,
    pub kind: CoercionKind,
}

// =============================================================================
// BOOKING OUTCOME
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeStatus {
    Success,
    Failed,
}

/// Result of normalizing one booking-extraction response.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Booking {
        record: BookingRecord,
        coercions: Vec<Coercion>,
    },
    NonBooking(NonBookingInfo),
    NonTravel(NonTravelInfo),
    /// Response could not be turned into any canonical outcome.
    Failed { reason: String },
}

impl BookingOutcome {
    pub fn status(&self) -> NormalizeStatus {
        match self {
            BookingOutcome::Failed { .. } => NormalizeStatus::Failed,
            _ => NormalizeStatus::Success,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.status() == NormalizeStatus::Failed
    }

    pub fn coercions(&self) -> &[Coercion] {
        match self {
            BookingOutcome::Booking { coercions, .. } => coercions,
            _ => &[],
        }
    }

    /// Canonical outcome to persist, or a schema violation for failures.
    pub fn into_extracted(self) -> Result<ExtractedBooking> {
        match self {
            BookingOutcome::Booking { record, .. } => Ok(ExtractedBooking::Booking(record)),
            BookingOutcome::NonBooking(info) => Ok(ExtractedBooking::NonBooking(info)),
            BookingOutcome::NonTravel(info) => Ok(ExtractedBooking::NonTravel(info)),
            BookingOutcome::Failed { reason } => Err(Error::SchemaViolation(reason)),
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        BookingOutcome::Failed {
            reason: reason.into(),
        }
    }
}

/// Normalize a raw booking-extraction response.
pub fn normalize_booking(raw: &str) -> BookingOutcome {
    match extract_json_payload(raw) {
        Some(payload) => normalize_booking_value(payload),
        None => BookingOutcome::failed(format!(
            "booking response is not valid JSON: {}",
            excerpt(raw, RESPONSE_EXCERPT_CHARS)
        )),
    }
}

/// Normalize an already-parsed booking response.
pub fn normalize_booking_value(payload: JsonValue) -> BookingOutcome {
    let mut normalizer = Normalizer::default();

    let payload = match payload {
        JsonValue::Array(mut items) if items.len() == 1 => {
            normalizer.note("$", CoercionKind::UnwrappedArray);
            items.remove(0)
        }
        other => other,
    };
    let mut obj = match payload {
        JsonValue::Object(obj) => obj,
        other => {
            return BookingOutcome::failed(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))
        }
    };

    let outcome = match obj.get("outcome").and_then(JsonValue::as_str) {
        Some("booking") => Discriminant::Booking,
        Some("non_booking") => Discriminant::NonBooking,
        Some("non_travel") => Discriminant::NonTravel,
        Some(other) => return BookingOutcome::failed(format!("unknown outcome '{}'", other)),
        None => {
            if obj.get("is_travel") == Some(&JsonValue::Bool(false)) {
                Discriminant::NonTravel
            } else if is_present(obj.get("booking_type")) {
                Discriminant::Booking
            } else if is_present(obj.get("non_booking_type")) {
                Discriminant::NonBooking
            } else {
                return BookingOutcome::failed("response has neither booking_type nor non_booking_type");
            }
        }
    };

    match outcome {
        Discriminant::NonTravel => BookingOutcome::NonTravel(non_travel(&obj)),
        Discriminant::NonBooking => BookingOutcome::NonBooking(non_booking(&obj)),
        Discriminant::Booking => match normalizer.booking(&mut obj) {
            Ok(record) => BookingOutcome::Booking {
                record,
                coercions: normalizer.coercions,
            },
            Err(reason) => BookingOutcome::failed(reason),
        },
    }
}

enum Discriminant {
    Booking,
    NonBooking,
    NonTravel,
}

fn is_present(value: Option<&JsonValue>) -> bool {
    matches!(value, Some(v) if !v.is_null())
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

fn reason_of(obj: &Map<String, JsonValue>) -> Option<String> {
    obj.get("reason").and_then(JsonValue::as_str).map(str::to_string)
}

/// Lowercase snake_case form of enum text written by a model.
fn enum_text(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

fn parse_enum<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(JsonValue::String(enum_text(raw))).ok()
}

fn non_travel(obj: &Map<String, JsonValue>) -> NonTravelInfo {
    let stated = obj.get("actual_category").and_then(JsonValue::as_str);
    let actual_category = match stated.and_then(|s| s.parse::<Category>().ok()) {
        Some(category) if !category.is_travel() => category,
        _ => {
            if let Some(s) = stated {
                warn!(subsystem = "extract", component = "normalizer", actual_category = s, "Replacing non-travel category");
            }
            Category::NotTravel
        }
    };
    NonTravelInfo {
        actual_category,
        reason: reason_of(obj),
    }
}

fn non_booking(obj: &Map<String, JsonValue>) -> NonBookingInfo {
    let stated = obj.get("non_booking_type").and_then(JsonValue::as_str);
    let non_booking_type = match stated.and_then(parse_enum::<NonBookingType>) {
        Some(t) => t,
        None => {
            warn!(subsystem = "extract", component = "normalizer", non_booking_type = ?stated, "Unknown non_booking_type, using general_info");
            NonBookingType::GeneralInfo
        }
    };
    NonBookingInfo {
        non_booking_type,
        reason: reason_of(obj),
    }
}

// =============================================================================
// BOOKING RECORD
// =============================================================================

/// Expected field types of one fragment object.
struct FieldSpec {
    strings: &'static [&'static str],
    numbers: &'static [&'static str],
    lists: &'static [&'static str],
    /// (name the model sometimes uses, canonical name)
    aliases: &'static [(&'static str, &'static str)],
}

const TRANSPORT_FIELDS: FieldSpec = FieldSpec {
    strings: &[
        "segment_type",
        "carrier_name",
        "segment_number",
        "departure_location",
        "departure_airport_code",
        "arrival_location",
        "arrival_airport_code",
        "departure_datetime",
        "arrival_datetime",
        "distance_type",
        "booking_platform",
        "confirmation_number",
    ],
    numbers: &["distance_km", "cost"],
    lists: &[],
    aliases: &[
        ("airline", "carrier_name"),
        ("carrier", "carrier_name"),
        ("flight_number", "segment_number"),
        ("train_number", "segment_number"),
    ],
};

const ACCOMMODATION_FIELDS: FieldSpec = FieldSpec {
    strings: &[
        "property_name",
        "address",
        "city",
        "country",
        "check_in_date",
        "check_out_date",
        "booking_platform",
        "confirmation_number",
    ],
    numbers: &["cost"],
    lists: &[],
    aliases: &[
        ("hotel_name", "property_name"),
        ("check_in", "check_in_date"),
        ("check_out", "check_out_date"),
    ],
};

const ACTIVITY_FIELDS: FieldSpec = FieldSpec {
    strings: &[
        "activity_name",
        "description",
        "start_datetime",
        "end_datetime",
        "location",
        "city",
        "booking_platform",
        "confirmation_number",
    ],
    numbers: &["cost"],
    lists: &[],
    aliases: &[("name", "activity_name")],
};

const CRUISE_FIELDS: FieldSpec = FieldSpec {
    strings: &[
        "cruise_line",
        "ship_name",
        "departure_datetime",
        "arrival_datetime",
        "departure_port",
        "arrival_port",
        "booking_platform",
        "confirmation_number",
    ],
    numbers: &["cost"],
    lists: &["itinerary"],
    aliases: &[],
};

const DATE_FIELDS: FieldSpec = FieldSpec {
    strings: &["booking_date", "travel_start_date", "travel_end_date"],
    numbers: &[],
    lists: &[],
    aliases: &[],
};

/// Top-level keys models use in place of the list names.
const LIST_ALIASES: &[(&str, &str)] = &[
    ("transport_details", "transport_segments"),
    ("accommodation", "accommodations"),
    ("activity", "activities"),
    ("cruise", "cruises"),
];

/// Parse a money or distance amount such as `"CHF 1'234.50"` or `"420,50"`.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let kept: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let normalized = match (kept.rfind('.'), kept.rfind(',')) {
        // Both present: the later one is the decimal separator.
        (Some(dot), Some(comma)) if comma > dot => kept.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => kept.replace(',', ""),
        (Some(_), None) if kept.matches('.').count() > 1 => kept.replace('.', ""),
        (None, Some(comma)) if kept.len() - comma - 1 == 2 => kept.replace(',', "."),
        _ => kept.replace(',', ""),
    };
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

#[derive(Default)]
struct Normalizer {
    coercions: Vec<Coercion>,
}

impl Normalizer {
    fn note(&mut self, path: impl Into<String>, kind: CoercionKind) {
        let path = path.into();
        warn!(
            subsystem = "extract",
            component = "normalizer",
            path = %path,
            coercion = %kind,
            "Coerced booking response field"
        );
        self.coercions.push(Coercion { path, kind });
    }

    fn booking(&mut self, obj: &mut Map<String, JsonValue>) -> std::result::Result<BookingRecord, String> {
        let booking_type = match obj.get("booking_type") {
            Some(JsonValue::String(s)) => parse_enum::<BookingType>(s)
                .ok_or_else(|| format!("unknown booking_type '{}'", s))?,
            Some(other) => return Err(format!("booking_type is a {}", json_type_name(other))),
            None => return Err("missing booking_type".to_string()),
        };

        let status = match obj.get("status") {
            None | Some(JsonValue::Null) => {
                self.note("status", CoercionKind::MissingStatus);
                BookingStatus::Unknown
            }
            Some(JsonValue::String(s)) => match parse_enum::<BookingStatus>(s) {
                Some(status) => status,
                None => {
                    self.note("status", CoercionKind::UnknownEnum);
                    BookingStatus::Unknown
                }
            },
            Some(_) => {
                self.note("status", CoercionKind::InvalidValue);
                BookingStatus::Unknown
            }
        };

        for (alias, canonical) in LIST_ALIASES {
            if !obj.contains_key(*canonical) {
                if let Some(value) = obj.remove(*alias) {
                    self.note(*canonical, CoercionKind::RenamedKey);
                    obj.insert((*canonical).to_string(), value);
                }
            }
        }

        let confirmation_numbers = self.string_list(obj.remove("confirmation_numbers"), "confirmation_numbers");
        let original_booking_reference =
            self.string_value(obj.remove("original_booking_reference"), "original_booking_reference");

        let transport_segments: Vec<TransportSegment> =
            self.fragments(obj.remove("transport_segments"), "transport_segments", &TRANSPORT_FIELDS);
        let accommodations: Vec<Accommodation> =
            self.fragments(obj.remove("accommodations"), "accommodations", &ACCOMMODATION_FIELDS);
        let activities: Vec<Activity> =
            self.fragments(obj.remove("activities"), "activities", &ACTIVITY_FIELDS);
        let cruises: Vec<Cruise> = self.fragments(obj.remove("cruises"), "cruises", &CRUISE_FIELDS);

        let cost_info = self.cost_info(obj.remove("cost_info"));
        let dates = self.dates(obj.remove("dates"));
        let additional_info = obj.remove("additional_info").filter(|v| !v.is_null());

        Ok(BookingRecord {
            booking_type,
            status,
            confirmation_numbers,
            original_booking_reference,
            transport_segments,
            accommodations,
            activities,
            cruises,
            cost_info,
            dates,
            additional_info,
        })
    }

    fn string_value(&mut self, value: Option<JsonValue>, path: &str) -> Option<String> {
        match value? {
            JsonValue::Null => None,
            JsonValue::String(s) => Some(s),
            JsonValue::Number(n) => {
                self.note(path, CoercionKind::NumberToString);
                Some(n.to_string())
            }
            JsonValue::Bool(b) => {
                self.note(path, CoercionKind::InvalidValue);
                Some(b.to_string())
            }
            _ => {
                self.note(path, CoercionKind::InvalidValue);
                None
            }
        }
    }

    fn number_value(&mut self, value: Option<JsonValue>, path: &str) -> Option<f64> {
        match value? {
            JsonValue::Null => None,
            JsonValue::Number(n) => n.as_f64(),
            JsonValue::String(s) => {
                let parsed = parse_amount(&s);
                let kind = if parsed.is_some() {
                    CoercionKind::StringToNumber
                } else {
                    CoercionKind::InvalidValue
                };
                self.note(path, kind);
                parsed
            }
            _ => {
                self.note(path, CoercionKind::InvalidValue);
                None
            }
        }
    }

    fn string_list(&mut self, value: Option<JsonValue>, path: &str) -> Vec<String> {
        match value {
            None => Vec::new(),
            Some(JsonValue::Null) => {
                self.note(path, CoercionKind::NullToEmptyList);
                Vec::new()
            }
            Some(JsonValue::String(s)) => {
                self.note(path, CoercionKind::StringToList);
                if s.trim().is_empty() {
                    Vec::new()
                } else {
                    vec![s]
                }
            }
            Some(JsonValue::Array(items)) => items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| {
                    let item_path = format!("{}[{}]", path, i);
                    match item {
                        JsonValue::String(s) => Some(s),
                        JsonValue::Number(n) => {
                            self.note(item_path, CoercionKind::NumberToString);
                            Some(n.to_string())
                        }
                        _ => {
                            self.note(item_path, CoercionKind::DroppedEntry);
                            None
                        }
                    }
                })
                .collect(),
            Some(JsonValue::Number(n)) => {
                self.note(path, CoercionKind::StringToList);
                vec![n.to_string()]
            }
            Some(_) => {
                self.note(path, CoercionKind::InvalidValue);
                Vec::new()
            }
        }
    }

    /// Coerce each field of `map` in place to the types in `spec`.
    fn coerce_fields(&mut self, map: &mut Map<String, JsonValue>, path: &str, spec: &FieldSpec) {
        for (alias, canonical) in spec.aliases {
            if !is_present(map.get(*canonical)) {
                if let Some(value) = map.remove(*alias) {
                    self.note(format!("{}.{}", path, canonical), CoercionKind::RenamedKey);
                    map.insert((*canonical).to_string(), value);
                }
            }
        }
        for field in spec.strings {
            let value = map.remove(*field);
            let field_path = format!("{}.{}", path, field);
            if let Some(s) = self.string_value(value, &field_path) {
                map.insert((*field).to_string(), JsonValue::String(s));
            }
        }
        for field in spec.numbers {
            let value = map.remove(*field);
            let field_path = format!("{}.{}", path, field);
            if let Some(n) = self.number_value(value, &field_path) {
                map.insert((*field).to_string(), JsonValue::from(n));
            }
        }
        for field in spec.lists {
            let value = map.remove(*field);
            let field_path = format!("{}.{}", path, field);
            let list = self.string_list(value, &field_path);
            map.insert((*field).to_string(), JsonValue::from(list));
        }
    }

    fn fragments<T: DeserializeOwned>(
        &mut self,
        value: Option<JsonValue>,
        path: &str,
        spec: &FieldSpec,
    ) -> Vec<T> {
        let entries = match value {
            None => return Vec::new(),
            Some(JsonValue::Null) => {
                self.note(path, CoercionKind::NullToEmptyList);
                return Vec::new();
            }
            Some(JsonValue::Object(map)) => {
                self.note(path, CoercionKind::ObjectToList);
                vec![JsonValue::Object(map)]
            }
            Some(JsonValue::Array(items)) => items,
            Some(_) => {
                self.note(path, CoercionKind::InvalidValue);
                return Vec::new();
            }
        };

        let mut out = Vec::with_capacity(entries.len());
        for (i, entry) in entries.into_iter().enumerate() {
            let entry_path = format!("{}[{}]", path, i);
            let JsonValue::Object(mut map) = entry else {
                self.note(entry_path, CoercionKind::DroppedEntry);
                continue;
            };
            self.coerce_fields(&mut map, &entry_path, spec);
            match serde_json::from_value::<T>(JsonValue::Object(map)) {
                Ok(fragment) => out.push(fragment),
                Err(e) => {
                    debug!(subsystem = "extract", component = "normalizer", path = %entry_path, error = %e, "Fragment rejected");
                    self.note(entry_path, CoercionKind::DroppedEntry);
                }
            }
        }
        out
    }

    fn cost_info(&mut self, value: Option<JsonValue>) -> CostInfo {
        let mut map = match value {
            None => return CostInfo::default(),
            Some(JsonValue::Null) => {
                self.note("cost_info", CoercionKind::NullToZero);
                return CostInfo::default();
            }
            Some(JsonValue::Object(map)) => map,
            Some(other) => {
                // A bare amount is the total.
                let total = self.number_value(Some(other), "cost_info");
                return CostInfo {
                    total_cost: total.unwrap_or(0.0),
                    ..Default::default()
                };
            }
        };

        let total_cost = match map.remove("total_cost") {
            None => 0.0,
            Some(JsonValue::Null) => {
                self.note("cost_info.total_cost", CoercionKind::NullToZero);
                0.0
            }
            value => self
                .number_value(value, "cost_info.total_cost")
                .unwrap_or(0.0),
        };
        let currency = self
            .string_value(map.remove("currency"), "cost_info.currency")
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty());

        let mut cost_breakdown = BTreeMap::new();
        match map.remove("cost_breakdown") {
            None => {}
            Some(JsonValue::Null) => self.note("cost_info.cost_breakdown", CoercionKind::NullToZero),
            Some(JsonValue::Object(items)) => {
                for (key, item) in items {
                    let item_path = format!("cost_info.cost_breakdown.{}", key);
                    match self.number_value(Some(item), &item_path) {
                        Some(amount) => {
                            cost_breakdown.insert(key, amount);
                        }
                        None => self.note(item_path, CoercionKind::DroppedEntry),
                    }
                }
            }
            Some(_) => self.note("cost_info.cost_breakdown", CoercionKind::InvalidValue),
        }

        CostInfo {
            total_cost,
            currency,
            cost_breakdown,
        }
    }

    fn dates(&mut self, value: Option<JsonValue>) -> BookingDates {
        match value {
            None | Some(JsonValue::Null) => BookingDates::default(),
            Some(JsonValue::Object(mut map)) => {
                self.coerce_fields(&mut map, "dates", &DATE_FIELDS);
                serde_json::from_value(JsonValue::Object(map)).unwrap_or_default()
            }
            Some(_) => {
                self.note("dates", CoercionKind::InvalidValue);
                BookingDates::default()
            }
        }
    }
}
