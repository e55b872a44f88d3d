//! Fragment materialization and cross-email consolidation.
//!
//! Fragments are rebuilt from each email's stored booking record on every
//! pass. Fragments from different emails that describe the same booking unit
//! (same kind, confirmation number and discriminator) collapse into one, with
//! later emails overriding earlier values.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, trace};
use uuid::Uuid;

use tripline_core::{
    parse_booking_datetime, AccommodationFragment, ActivityFragment, BookingFragment,
    BookingRecord, BookingStatus, BookingType, CruiseFragment, FragmentDetail, TransportFragment,
};

/// Namespace of deterministic fragment and trip ids.
pub const TRIPLINE_NAMESPACE: Uuid = Uuid::from_u128(0x6f1c_2a4e_93d5_4b7a_8e21_5c0d_f4a9_b372);

/// One email's eligible booking, in evidence order.
#[derive(Debug, Clone)]
pub struct EmailBooking {
    pub email_id: String,
    pub email_timestamp: Option<DateTime<Utc>>,
    pub record: BookingRecord,
}

/// A fragment after consolidation across emails.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsolidatedFragment {
    /// Consolidation key; stable across passes.
    pub key: String,
    pub fragment: BookingFragment,
    /// Evidencing emails, in evidence order, without duplicates.
    pub evidence_email_ids: Vec<String>,
    /// Timestamp of the first evidencing email.
    pub first_seen: Option<DateTime<Utc>>,
}

impl ConsolidatedFragment {
    pub fn id(&self) -> Uuid {
        Uuid::new_v5(&TRIPLINE_NAMESPACE, self.key.as_bytes())
    }

    fn add_evidence(&mut self, email_id: &str) {
        if !self.evidence_email_ids.iter().any(|id| id == email_id) {
            self.evidence_email_ids.push(email_id.to_string());
        }
    }
}

fn parse_time(raw: &Option<String>) -> Option<chrono::NaiveDateTime> {
    raw.as_deref().and_then(parse_booking_datetime)
}

fn non_empty(raw: &Option<String>) -> Option<String> {
    raw.as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Build the fragments one email's booking record describes.
pub fn materialize(email_id: &str, record: &BookingRecord) -> Vec<BookingFragment> {
    let booking_number = record.confirmation_numbers.first().cloned();
    let currency = record.cost_info.currency.clone();
    let fragment = |index: usize,
                    confirmation: &Option<String>,
                    platform: &Option<String>,
                    cost: Option<f64>,
                    detail: FragmentDetail| BookingFragment {
        email_id: email_id.to_string(),
        index,
        status: record.status,
        confirmation_number: non_empty(confirmation).or_else(|| booking_number.clone()),
        booking_platform: non_empty(platform),
        cost,
        currency: currency.clone(),
        detail,
    };

    let mut out = Vec::with_capacity(record.fragment_count());
    for (i, s) in record.transport_segments.iter().enumerate() {
        out.push(fragment(
            i,
            &s.confirmation_number,
            &s.booking_platform,
            s.cost,
            FragmentDetail::TransportSegment(TransportFragment {
                segment_type: non_empty(&s.segment_type),
                carrier_name: non_empty(&s.carrier_name),
                segment_number: non_empty(&s.segment_number),
                departure_location: non_empty(&s.departure_location),
                departure_code: non_empty(&s.departure_airport_code),
                arrival_location: non_empty(&s.arrival_location),
                arrival_code: non_empty(&s.arrival_airport_code),
                departure: parse_time(&s.departure_datetime),
                arrival: parse_time(&s.arrival_datetime),
                distance_km: s.distance_km,
            }),
        ));
    }
    for (i, a) in record.accommodations.iter().enumerate() {
        out.push(fragment(
            i,
            &a.confirmation_number,
            &a.booking_platform,
            a.cost,
            FragmentDetail::Accommodation(AccommodationFragment {
                property_name: non_empty(&a.property_name),
                address: non_empty(&a.address),
                city: non_empty(&a.city),
                country: non_empty(&a.country),
                check_in: parse_time(&a.check_in_date),
                check_out: parse_time(&a.check_out_date),
            }),
        ));
    }
    for (i, a) in record.activities.iter().enumerate() {
        out.push(fragment(
            i,
            &a.confirmation_number,
            &a.booking_platform,
            a.cost,
            FragmentDetail::Activity(ActivityFragment {
                activity_name: non_empty(&a.activity_name),
                location: non_empty(&a.location),
                city: non_empty(&a.city),
                start: parse_time(&a.start_datetime),
                end: parse_time(&a.end_datetime),
            }),
        ));
    }
    for (i, c) in record.cruises.iter().enumerate() {
        out.push(fragment(
            i,
            &c.confirmation_number,
            &c.booking_platform,
            c.cost,
            FragmentDetail::Cruise(CruiseFragment {
                cruise_line: non_empty(&c.cruise_line),
                ship_name: non_empty(&c.ship_name),
                departure_port: non_empty(&c.departure_port),
                arrival_port: non_empty(&c.arrival_port),
                itinerary: c
                    .itinerary
                    .iter()
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect(),
                departure: parse_time(&c.departure_datetime),
                arrival: parse_time(&c.arrival_datetime),
            }),
        ));
    }

    // A booking-level total belongs to the first fragment when none is priced.
    if record.cost_info.total_cost > 0.0 && out.iter().all(|f| f.cost.is_none()) {
        if let Some(first) = out.first_mut() {
            first.cost = Some(record.cost_info.total_cost);
        }
    }
    out
}

fn lower(value: Option<&str>) -> String {
    value.unwrap_or_default().trim().to_lowercase()
}

/// Key under which fragments from different emails are merged.
pub fn consolidation_key(fragment: &BookingFragment) -> String {
    let kind = fragment.kind();
    let Some(confirmation) = fragment.confirmation_number.as_deref() else {
        return format!("{}|email:{}|{}", kind, fragment.email_id, fragment.index);
    };
    let discriminator = match &fragment.detail {
        FragmentDetail::TransportSegment(t) => match t.segment_number.as_deref() {
            Some(number) => lower(Some(number)).replace(' ', ""),
            None => format!(
                "{}>{}",
                lower(t.departure_code.as_deref().or(t.departure_location.as_deref())),
                lower(t.arrival_code.as_deref().or(t.arrival_location.as_deref()))
            ),
        },
        FragmentDetail::Accommodation(a) => lower(a.property_name.as_deref()),
        FragmentDetail::Activity(a) => lower(a.activity_name.as_deref()),
        FragmentDetail::Cruise(c) => lower(c.ship_name.as_deref().or(c.cruise_line.as_deref())),
    };
    format!(
        "{}|conf:{}|{}",
        kind,
        confirmation.trim().to_lowercase(),
        discriminator
    )
}

fn overlay<T>(dst: &mut Option<T>, src: Option<T>) {
    if src.is_some() {
        *dst = src;
    }
}

/// Merge a later fragment into an earlier one with the same key.
fn merge(base: &mut BookingFragment, newer: BookingFragment) {
    if newer.status != BookingStatus::Unknown {
        base.status = newer.status;
    }
    overlay(&mut base.confirmation_number, newer.confirmation_number);
    overlay(&mut base.booking_platform, newer.booking_platform);
    overlay(&mut base.cost, newer.cost);
    overlay(&mut base.currency, newer.currency);
    base.email_id = newer.email_id;
    base.index = newer.index;

    match (&mut base.detail, newer.detail) {
        (FragmentDetail::TransportSegment(b), FragmentDetail::TransportSegment(n)) => {
            overlay(&mut b.segment_type, n.segment_type);
            overlay(&mut b.carrier_name, n.carrier_name);
            overlay(&mut b.segment_number, n.segment_number);
            overlay(&mut b.departure_location, n.departure_location);
            overlay(&mut b.departure_code, n.departure_code);
            overlay(&mut b.arrival_location, n.arrival_location);
            overlay(&mut b.arrival_code, n.arrival_code);
            overlay(&mut b.departure, n.departure);
            overlay(&mut b.arrival, n.arrival);
            overlay(&mut b.distance_km, n.distance_km);
        }
        (FragmentDetail::Accommodation(b), FragmentDetail::Accommodation(n)) => {
            overlay(&mut b.property_name, n.property_name);
            overlay(&mut b.address, n.address);
            overlay(&mut b.city, n.city);
            overlay(&mut b.country, n.country);
            overlay(&mut b.check_in, n.check_in);
            overlay(&mut b.check_out, n.check_out);
        }
        (FragmentDetail::Activity(b), FragmentDetail::Activity(n)) => {
            overlay(&mut b.activity_name, n.activity_name);
            overlay(&mut b.location, n.location);
            overlay(&mut b.city, n.city);
            overlay(&mut b.start, n.start);
            overlay(&mut b.end, n.end);
        }
        (FragmentDetail::Cruise(b), FragmentDetail::Cruise(n)) => {
            overlay(&mut b.cruise_line, n.cruise_line);
            overlay(&mut b.ship_name, n.ship_name);
            overlay(&mut b.departure_port, n.departure_port);
            overlay(&mut b.arrival_port, n.arrival_port);
            if !n.itinerary.is_empty() {
                b.itinerary = n.itinerary;
            }
            overlay(&mut b.departure, n.departure);
            overlay(&mut b.arrival, n.arrival);
        }
        // Keys include the kind, so kinds always agree.
        _ => {}
    }
}

/// Consolidate the fragments of all eligible bookings.
///
/// `bookings` must be in evidence order (email timestamp, then id). The
/// output keeps the order in which keys were first seen.
pub fn consolidate(bookings: &[EmailBooking]) -> Vec<ConsolidatedFragment> {
    let mut out: Vec<ConsolidatedFragment> = Vec::new();
    let mut by_key: HashMap<String, usize> = HashMap::new();

    for booking in bookings {
        let fragments = materialize(&booking.email_id, &booking.record);
        if fragments.is_empty() {
            apply_reference_only(&mut out, booking);
            continue;
        }
        for fragment in fragments {
            let key = consolidation_key(&fragment);
            match by_key.get(&key) {
                Some(&idx) => {
                    trace!(key = %key, email_id = %booking.email_id, "Merging fragment evidence");
                    let existing = &mut out[idx];
                    merge(&mut existing.fragment, fragment);
                    existing.add_evidence(&booking.email_id);
                }
                None => {
                    by_key.insert(key.clone(), out.len());
                    out.push(ConsolidatedFragment {
                        key,
                        fragment,
                        evidence_email_ids: vec![booking.email_id.clone()],
                        first_seen: booking.email_timestamp,
                    });
                }
            }
        }
    }
    out
}

/// Apply a booking with no fragments of its own (typically a cancellation or
/// change notice) to earlier fragments sharing its reference numbers.
fn apply_reference_only(out: &mut [ConsolidatedFragment], booking: &EmailBooking) {
    let record = &booking.record;
    let mut references: Vec<String> = record
        .confirmation_numbers
        .iter()
        .chain(record.original_booking_reference.iter())
        .map(|r| r.trim().to_lowercase())
        .filter(|r| !r.is_empty())
        .collect();
    references.dedup();
    if references.is_empty() {
        return;
    }

    let cancels = record.status == BookingStatus::Cancelled
        || record.booking_type == BookingType::Cancellation;
    let mut matched = 0usize;
    for existing in out.iter_mut() {
        let Some(number) = existing.fragment.confirmation_number.as_deref() else {
            continue;
        };
        if !references.contains(&number.trim().to_lowercase()) {
            continue;
        }
        if cancels {
            existing.fragment.status = BookingStatus::Cancelled;
        } else if record.status != BookingStatus::Unknown {
            existing.fragment.status = record.status;
        }
        existing.add_evidence(&booking.email_id);
        matched += 1;
    }
    debug!(
        email_id = %booking.email_id,
        matched,
        cancels,
        "Applied reference-only booking"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripline_core::{Accommodation, CostInfo, FragmentKind, TransportSegment};

    fn flight(conf: &str, number: &str, departure: &str) -> BookingRecord {
        BookingRecord {
            booking_type: BookingType::Flight,
            status: BookingStatus::Confirmed,
            confirmation_numbers: vec![conf.into()],
            original_booking_reference: None,
            transport_segments: vec![TransportSegment {
                segment_number: Some(number.into()),
                departure_location: Some("Zurich".into()),
                arrival_location: Some("Oslo".into()),
                departure_datetime: Some(departure.into()),
                ..Default::default()
            }],
            accommodations: vec![],
            activities: vec![],
            cruises: vec![],
            cost_info: CostInfo::default(),
            dates: Default::default(),
            additional_info: None,
        }
    }

    fn booking(email_id: &str, record: BookingRecord) -> EmailBooking {
        EmailBooking {
            email_id: email_id.into(),
            email_timestamp: None,
            record,
        }
    }

    #[test]
    fn test_materialize_inherits_booking_fields() {
        let mut record = flight("ABC123", "LX1234", "2025-06-10T09:05:00");
        record.cost_info = CostInfo {
            total_cost: 420.0,
            currency: Some("CHF".into()),
            ..Default::default()
        };
        record.accommodations.push(Accommodation {
            city: Some("Oslo".into()),
            check_in_date: Some("2025-06-10".into()),
            ..Default::default()
        });
        let fragments = materialize("e1", &record);
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[0].confirmation_number.as_deref(), Some("ABC123"));
        assert_eq!(fragments[0].cost, Some(420.0));
        assert_eq!(fragments[1].cost, None);
        assert_eq!(fragments[1].currency.as_deref(), Some("CHF"));
        assert_eq!(fragments[1].kind(), FragmentKind::Accommodation);
        assert!(fragments[1].start().is_some());
    }

    #[test]
    fn test_change_notice_overrides_and_links() {
        let original = flight("ABC123", "LX 1234", "2025-06-10T09:05:00");
        let mut change = flight("abc123", "LX1234", "2025-06-10T13:40:00");
        change.status = BookingStatus::Modified;

        let merged = consolidate(&[booking("e1", original), booking("e2", change)]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].evidence_email_ids, vec!["e1", "e2"]);
        assert_eq!(merged[0].fragment.status, BookingStatus::Modified);
        let start = merged[0].fragment.start().unwrap();
        assert_eq!(start.format("%H:%M").to_string(), "13:40");
    }

    #[test]
    fn test_unconfirmed_fragments_never_merge() {
        let mut a = flight("X", "LX1", "2025-06-10");
        a.confirmation_numbers.clear();
        let b = a.clone();
        let merged = consolidate(&[booking("e1", a), booking("e2", b)]);
        assert_eq!(merged.len(), 2);
        assert_ne!(merged[0].id(), merged[1].id());
    }

    #[test]
    fn test_cancellation_notice_cancels_by_reference() {
        let original = flight("ABC123", "LX1234", "2025-06-10T09:05:00");
        let mut cancellation = original.clone();
        cancellation.booking_type = BookingType::Cancellation;
        cancellation.status = BookingStatus::Cancelled;
        cancellation.confirmation_numbers.clear();
        cancellation.original_booking_reference = Some("ABC123".into());
        cancellation.transport_segments.clear();

        let merged = consolidate(&[booking("e1", original), booking("e2", cancellation)]);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].fragment.is_cancelled());
        assert_eq!(merged[0].evidence_email_ids, vec!["e1", "e2"]);
    }

    #[test]
    fn test_ids_are_stable() {
        let record = flight("ABC123", "LX1234", "2025-06-10T09:05:00");
        let first = consolidate(&[booking("e1", record.clone())]);
        let second = consolidate(&[booking("e1", record)]);
        assert_eq!(first[0].id(), second[0].id());
    }
}
