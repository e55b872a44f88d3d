//! Trip-level derivations over a fragment group.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use tracing::warn;
use uuid::Uuid;

use tripline_core::{
    BookingFragment, DataQualityFlag, DataQualityKind, FragmentDetail, Trip, TripFragment,
    TripRecord,
};

use crate::fragments::{ConsolidatedFragment, TRIPLINE_NAMESPACE};
use crate::grouping::FragmentGroup;
use crate::policy::GroupingPolicy;

/// Deterministic trip id over the member fragment keys.
pub fn trip_id(keys: &[&str]) -> Uuid {
    let mut sorted = keys.to_vec();
    sorted.sort_unstable();
    Uuid::new_v5(&TRIPLINE_NAMESPACE, sorted.join("\n").as_bytes())
}

/// Build the trip record for one group.
///
/// `created_at` of a trip that already exists with the same id is kept so
/// reruns over an unchanged set reproduce identical rows.
pub fn derive_trip(
    fragments: &[ConsolidatedFragment],
    group: &FragmentGroup,
    policy: &GroupingPolicy,
    existing_created_at: &HashMap<Uuid, DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TripRecord {
    let keys: Vec<&str> = group.members().map(|i| fragments[i].key.as_str()).collect();
    let id = trip_id(&keys);

    let anchored: Vec<&BookingFragment> = group
        .anchored
        .iter()
        .map(|&i| &fragments[i].fragment)
        .collect();
    let (start_date, end_date) = date_range(&anchored);

    // Anchored members are already in start order; unanchored follow.
    let live: Vec<&BookingFragment> = group
        .members()
        .map(|i| &fragments[i].fragment)
        .filter(|f| !f.is_cancelled())
        .collect();

    let origin_city = live
        .iter()
        .find_map(|f| match &f.detail {
            FragmentDetail::TransportSegment(t) if f.start().is_some() => {
                t.departure_location.clone()
            }
            _ => None,
        })
        .or_else(|| {
            live.iter().find_map(|f| match &f.detail {
                FragmentDetail::TransportSegment(t) => t.departure_location.clone(),
                _ => None,
            })
        })
        .unwrap_or_else(|| policy.home_city.clone());

    let cities_visited = visited_cities(&live, policy);

    let mut flags = Vec::new();
    let total_cost: f64 = live.iter().filter_map(|f| f.cost).sum();
    let mut currencies: Vec<&str> = Vec::new();
    for f in live.iter().filter(|f| f.cost.is_some()) {
        if let Some(c) = f.currency.as_deref() {
            if !currencies.contains(&c) {
                currencies.push(c);
            }
        }
    }
    if currencies.len() > 1 {
        flags.push(DataQualityFlag {
            kind: DataQualityKind::MixedCurrencies,
            fragment_id: None,
            email_id: None,
            detail: format!("costs in {}", currencies.join(", ")),
        });
    }

    for &i in &group.anchored {
        flags.extend(fragment_flags(&fragments[i]));
    }
    for &i in &group.unanchored {
        let member = &fragments[i];
        flags.push(DataQualityFlag {
            kind: DataQualityKind::UnanchoredFragmentAttached,
            fragment_id: Some(member.id()),
            email_id: Some(member.fragment.email_id.clone()),
            detail: format!(
                "{} without start time attached by proximity",
                member.fragment.kind()
            ),
        });
        flags.extend(fragment_flags(member));
    }
    for flag in &flags {
        warn!(
            trip_id = %id,
            flag = %flag.kind,
            email_id = flag.email_id.as_deref().unwrap_or(""),
            detail = %flag.detail,
            "Data quality issue"
        );
    }

    let name = trip_name(&live, &cities_visited, start_date);
    let trip = Trip {
        id,
        name,
        start_date,
        end_date,
        origin_city,
        cities_visited,
        total_cost,
        currency: currencies.first().map(|c| c.to_string()),
        data_quality_flags: flags,
        created_at: existing_created_at.get(&id).copied().unwrap_or(now),
    };

    let members = group
        .members()
        .map(|i| {
            let member = &fragments[i];
            TripFragment {
                id: member.id(),
                trip_id: id,
                fragment: member.fragment.clone(),
                evidence_email_ids: member.evidence_email_ids.clone(),
            }
        })
        .collect();

    TripRecord {
        trip,
        fragments: members,
    }
}

/// Min start and max end date; cancelled fragments only count when nothing else is left.
fn date_range(anchored: &[&BookingFragment]) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let live: Vec<&BookingFragment> = anchored
        .iter()
        .copied()
        .filter(|f| !f.is_cancelled())
        .collect();
    let basis = if live.is_empty() { anchored.to_vec() } else { live };
    let start = basis.iter().filter_map(|f| f.start()).min().map(|d| d.date());
    let end = basis
        .iter()
        .filter_map(|f| f.last_instant())
        .max()
        .map(|d| d.date());
    (start, end)
}

fn fragment_cities(fragment: &BookingFragment) -> Vec<&str> {
    match &fragment.detail {
        FragmentDetail::TransportSegment(t) => {
            t.arrival_location.as_deref().into_iter().collect()
        }
        FragmentDetail::Accommodation(a) => a.city.as_deref().into_iter().collect(),
        FragmentDetail::Activity(a) => a.city.as_deref().into_iter().collect(),
        FragmentDetail::Cruise(c) => c
            .itinerary
            .iter()
            .map(String::as_str)
            .chain(c.arrival_port.as_deref())
            .collect(),
    }
}

fn visited_cities(live: &[&BookingFragment], policy: &GroupingPolicy) -> Vec<String> {
    let mut cities: Vec<String> = Vec::new();
    for fragment in live {
        for city in fragment_cities(fragment) {
            let city = city.trim();
            if city.is_empty() || policy.is_home(city) {
                continue;
            }
            if !cities.iter().any(|c| same_city(c, city)) {
                cities.push(city.to_string());
            }
        }
    }
    cities
}

fn same_city(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

fn trip_name(live: &[&BookingFragment], cities: &[String], start: Option<NaiveDate>) -> String {
    let longest_stay = live
        .iter()
        .filter_map(|f| match &f.detail {
            FragmentDetail::Accommodation(a) => {
                let city = a.city.as_deref()?;
                let nights = match (a.check_in, a.check_out) {
                    (Some(i), Some(o)) => o - i,
                    _ => Duration::zero(),
                };
                Some((city, nights))
            }
            _ => None,
        })
        .filter(|(city, _)| cities.iter().any(|c| same_city(c, city)))
        // max_by_key keeps the last maximum; reverse so the earliest stay wins ties.
        .rev()
        .max_by_key(|(_, nights)| *nights)
        .map(|(city, _)| city.trim().to_string());

    match (longest_stay.or_else(|| cities.first().cloned()), start) {
        (Some(city), _) => format!("Trip to {}", city),
        (None, Some(date)) => format!("Trip on {}", date),
        (None, None) => "Trip".to_string(),
    }
}

/// Data-quality flags for one fragment. Cancelled fragments raise none.
fn fragment_flags(member: &ConsolidatedFragment) -> Vec<DataQualityFlag> {
    let fragment = &member.fragment;
    if fragment.is_cancelled() {
        return Vec::new();
    }
    let flag = |kind: DataQualityKind, detail: String| DataQualityFlag {
        kind,
        fragment_id: Some(member.id()),
        email_id: Some(fragment.email_id.clone()),
        detail,
    };
    let label = fragment
        .operator_name()
        .map(|n| format!("{} {}", fragment.kind(), n))
        .unwrap_or_else(|| fragment.kind().to_string());

    let mut flags = Vec::new();
    match &fragment.detail {
        FragmentDetail::TransportSegment(t) => {
            let missing = [
                (t.departure.is_none(), DataQualityKind::MissingDepartureTime, "departure time"),
                (t.arrival.is_none(), DataQualityKind::MissingArrivalTime, "arrival time"),
                (
                    t.departure_location.is_none() && t.departure_code.is_none(),
                    DataQualityKind::MissingDepartureLocation,
                    "departure location",
                ),
                (
                    t.arrival_location.is_none() && t.arrival_code.is_none(),
                    DataQualityKind::MissingArrivalLocation,
                    "arrival location",
                ),
            ];
            for (absent, kind, what) in missing {
                if absent {
                    flags.push(flag(kind, format!("{} has no {}", label, what)));
                }
            }
            if let (Some(dep), Some(arr)) = (t.departure, t.arrival) {
                if arr < dep {
                    flags.push(flag(
                        DataQualityKind::ArrivalBeforeDeparture,
                        format!("{} arrives {} before departing {}", label, arr, dep),
                    ));
                }
            }
        }
        FragmentDetail::Cruise(c) => {
            let missing = [
                (c.departure.is_none(), DataQualityKind::MissingDepartureTime, "departure time"),
                (c.arrival.is_none(), DataQualityKind::MissingArrivalTime, "arrival time"),
            ];
            for (absent, kind, what) in missing {
                if absent {
                    flags.push(flag(kind, format!("{} has no {}", label, what)));
                }
            }
            if let (Some(dep), Some(arr)) = (c.departure, c.arrival) {
                if arr < dep {
                    flags.push(flag(
                        DataQualityKind::ArrivalBeforeDeparture,
                        format!("{} arrives {} before departing {}", label, arr, dep),
                    ));
                }
            }
        }
        FragmentDetail::Accommodation(a) => {
            if let (Some(check_in), Some(check_out)) = (a.check_in, a.check_out) {
                if check_out < check_in {
                    flags.push(flag(
                        DataQualityKind::CheckOutBeforeCheckIn,
                        format!(
                            "{} checks out {} before checking in {}",
                            label, check_out, check_in
                        ),
                    ));
                }
            }
        }
        FragmentDetail::Activity(_) => {}
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveDateTime};
    use tripline_core::{AccommodationFragment, BookingStatus, TransportFragment};

    fn at(day: u32, hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 6, day)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn member(key: &str, cost: Option<f64>, currency: Option<&str>, detail: FragmentDetail) -> ConsolidatedFragment {
        ConsolidatedFragment {
            key: key.into(),
            fragment: BookingFragment {
                email_id: format!("email-{}", key),
                index: 0,
                status: BookingStatus::Confirmed,
                confirmation_number: None,
                booking_platform: None,
                cost,
                currency: currency.map(str::to_string),
                detail,
            },
            evidence_email_ids: vec![format!("email-{}", key)],
            first_seen: None,
        }
    }

    fn stay(key: &str, city: &str, check_in: NaiveDateTime, check_out: NaiveDateTime) -> ConsolidatedFragment {
        member(
            key,
            None,
            None,
            FragmentDetail::Accommodation(AccommodationFragment {
                property_name: None,
                address: None,
                city: Some(city.into()),
                country: None,
                check_in: Some(check_in),
                check_out: Some(check_out),
            }),
        )
    }

    fn leg(key: &str, from: &str, to: &str, dep: NaiveDateTime, arr: NaiveDateTime, cost: f64, currency: &str) -> ConsolidatedFragment {
        member(
            key,
            Some(cost),
            Some(currency),
            FragmentDetail::TransportSegment(TransportFragment {
                segment_type: Some("flight".into()),
                carrier_name: None,
                segment_number: None,
                departure_location: Some(from.into()),
                departure_code: None,
                arrival_location: Some(to.into()),
                arrival_code: None,
                departure: Some(dep),
                arrival: Some(arr),
                distance_km: None,
            }),
        )
    }

    fn group(n: usize) -> FragmentGroup {
        FragmentGroup {
            anchored: (0..n).collect(),
            unanchored: vec![],
        }
    }

    #[test]
    fn test_name_uses_longest_stay() {
        let fragments = vec![
            leg("a", "Zurich", "Bergen", at(1, 8), at(1, 10), 200.0, "CHF"),
            stay("b", "Bergen", at(1, 14), at(2, 10)),
            stay("c", "Oslo", at(2, 14), at(6, 10)),
        ];
        let record = derive_trip(&fragments, &group(3), &GroupingPolicy::default(), &HashMap::new(), Utc::now());
        assert_eq!(record.trip.name, "Trip to Oslo");
        assert_eq!(record.trip.cities_visited, vec!["Bergen", "Oslo"]);
        assert_eq!(record.trip.origin_city, "Zurich");
    }

    #[test]
    fn test_cost_and_currency() {
        let fragments = vec![
            leg("a", "Zurich", "Oslo", at(1, 8), at(1, 10), 200.0, "CHF"),
            leg("b", "Oslo", "Zurich", at(3, 8), at(3, 10), 150.0, "NOK"),
        ];
        let record = derive_trip(&fragments, &group(2), &GroupingPolicy::default(), &HashMap::new(), Utc::now());
        assert_eq!(record.trip.total_cost, 350.0);
        assert_eq!(record.trip.currency.as_deref(), Some("CHF"));
        assert!(record.trip.has_flag(DataQualityKind::MixedCurrencies));
        // Home is never a visited city.
        assert_eq!(record.trip.cities_visited, vec!["Oslo"]);
    }

    #[test]
    fn test_cancelled_fragment_excluded_from_cost_and_cities() {
        let mut fragments = vec![
            leg("a", "Zurich", "Oslo", at(1, 8), at(1, 10), 200.0, "CHF"),
            leg("b", "Oslo", "Tromso", at(2, 8), at(2, 10), 90.0, "CHF"),
        ];
        fragments[1].fragment.status = BookingStatus::Cancelled;
        let record = derive_trip(&fragments, &group(2), &GroupingPolicy::default(), &HashMap::new(), Utc::now());
        assert_eq!(record.trip.total_cost, 200.0);
        assert_eq!(record.trip.cities_visited, vec!["Oslo"]);
        assert_eq!(record.fragments.len(), 2);
        assert_eq!(record.trip.end_date, NaiveDate::from_ymd_opt(2025, 6, 1));
    }

    #[test]
    fn test_contradictions_flagged() {
        let fragments = vec![
            leg("a", "Zurich", "Oslo", at(1, 10), at(1, 8), 0.0, "CHF"),
            stay("b", "Oslo", at(4, 14), at(2, 10)),
        ];
        let record = derive_trip(&fragments, &group(2), &GroupingPolicy::default(), &HashMap::new(), Utc::now());
        assert!(record.trip.has_flag(DataQualityKind::ArrivalBeforeDeparture));
        assert!(record.trip.has_flag(DataQualityKind::CheckOutBeforeCheckIn));
    }

    #[test]
    fn test_id_and_created_at_are_stable() {
        let fragments = vec![stay("b", "Oslo", at(1, 14), at(3, 10)), stay("a", "Oslo", at(3, 14), at(4, 10))];
        let id = trip_id(&["a", "b"]);
        assert_eq!(id, trip_id(&["b", "a"]));

        let earlier = Utc::now() - Duration::days(3);
        let existing = HashMap::from([(id, earlier)]);
        let record = derive_trip(&fragments, &group(2), &GroupingPolicy::default(), &existing, Utc::now());
        assert_eq!(record.trip.id, id);
        assert_eq!(record.trip.created_at, earlier);
    }

    #[test]
    fn test_no_city_names_by_date() {
        let fragments = vec![leg("a", "Zurich", "ZRH", at(1, 8), at(1, 10), 0.0, "CHF")];
        let record = derive_trip(&fragments, &group(1), &GroupingPolicy::default(), &HashMap::new(), Utc::now());
        assert_eq!(record.trip.name, "Trip on 2025-06-01");
    }
}
