//! Trip aggregate and its data-quality flags.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::booking::{BookingFragment, BookingStatus, FragmentKind};

/// Non-fatal problem found while aggregating a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityKind {
    MissingDepartureTime,
    MissingArrivalTime,
    MissingDepartureLocation,
    MissingArrivalLocation,
    ArrivalBeforeDeparture,
    CheckOutBeforeCheckIn,
    /// Fragment without a start time placed next to anchored neighbours.
    UnanchoredFragmentAttached,
    MixedCurrencies,
}

impl DataQualityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            DataQualityKind::MissingDepartureTime => "missing_departure_time",
            DataQualityKind::MissingArrivalTime => "missing_arrival_time",
            DataQualityKind::MissingDepartureLocation => "missing_departure_location",
            DataQualityKind::MissingArrivalLocation => "missing_arrival_location",
            DataQualityKind::ArrivalBeforeDeparture => "arrival_before_departure",
            DataQualityKind::CheckOutBeforeCheckIn => "check_out_before_check_in",
            DataQualityKind::UnanchoredFragmentAttached => "unanchored_fragment_attached",
            DataQualityKind::MixedCurrencies => "mixed_currencies",
        }
    }
}

impl fmt::Display for DataQualityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataQualityFlag {
    pub kind: DataQualityKind,
    /// Fragment the flag concerns; `None` for trip-wide flags.
    pub fragment_id: Option<Uuid>,
    pub email_id: Option<String>,
    pub detail: String,
}

/// Aggregate built from grouped fragments. Never edited by a pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trip {
    pub id: Uuid,
    pub name: String,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub origin_city: String,
    pub cities_visited: Vec<String>,
    pub total_cost: f64,
    pub currency: Option<String>,
    pub data_quality_flags: Vec<DataQualityFlag>,
    pub created_at: DateTime<Utc>,
}

impl Trip {
    pub fn has_flag(&self, kind: DataQualityKind) -> bool {
        self.data_quality_flags.iter().any(|f| f.kind == kind)
    }
}

/// A consolidated fragment owned by a trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripFragment {
    /// Deterministic id derived from the fragment's consolidation key.
    pub id: Uuid,
    pub trip_id: Uuid,
    pub fragment: BookingFragment,
    /// Every email that evidenced this fragment, in evidence order.
    pub evidence_email_ids: Vec<String>,
}

impl TripFragment {
    pub fn kind(&self) -> FragmentKind {
        self.fragment.kind()
    }

    pub fn status(&self) -> BookingStatus {
        self.fragment.status
    }
}

/// Trip together with its fragments, the unit persisted by a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripRecord {
    pub trip: Trip,
    pub fragments: Vec<TripFragment>,
}

impl TripRecord {
    /// Distinct emails linked to this trip, sorted.
    pub fn email_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .fragments
            .iter()
            .flat_map(|f| f.evidence_email_ids.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Portion of the trip set an aggregation pass replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AggregationScope {
    #[default]
    All,
    /// Trips overlapping `start..=end`, rebuilt whole.
    DateRange { start: NaiveDate, end: NaiveDate },
}

impl AggregationScope {
    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        match (self, date) {
            (AggregationScope::All, _) => true,
            (AggregationScope::DateRange { start, end }, Some(d)) => d >= *start && d <= *end,
            (AggregationScope::DateRange { .. }, None) => false,
        }
    }

    /// Whether a span starting at `start` and ending at `end` (or `start`
    /// when open) touches the scope. Undated spans only match `All`.
    pub fn overlaps(&self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> bool {
        match (self, start) {
            (AggregationScope::All, _) => true,
            (AggregationScope::DateRange { start: from, end: to }, Some(s)) => {
                s <= *to && end.unwrap_or(s).max(s) >= *from
            }
            (AggregationScope::DateRange { .. }, None) => false,
        }
    }
}

/// Rows removed and written by one replacement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaceSummary {
    pub deleted: u64,
    pub inserted: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_contains() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 6, day).unwrap();
        let scope = AggregationScope::DateRange {
            start: d(1),
            end: d(30),
        };
        assert!(scope.contains(Some(d(1))));
        assert!(scope.contains(Some(d(30))));
        assert!(!scope.contains(None));
        assert!(AggregationScope::All.contains(None));
    }

    #[test]
    fn test_scope_overlaps_spans_crossing_the_edges() {
        let d = |m, day| NaiveDate::from_ymd_opt(2025, m, day).unwrap();
        let scope = AggregationScope::DateRange {
            start: d(7, 1),
            end: d(7, 31),
        };
        assert!(scope.overlaps(Some(d(6, 29)), Some(d(7, 2))));
        assert!(scope.overlaps(Some(d(7, 30)), Some(d(8, 2))));
        assert!(scope.overlaps(Some(d(7, 31)), None));
        assert!(!scope.overlaps(Some(d(6, 1)), Some(d(6, 30))));
        assert!(!scope.overlaps(Some(d(8, 1)), Some(d(8, 3))));
        assert!(!scope.overlaps(None, Some(d(7, 10))));
        assert!(AggregationScope::All.overlaps(None, None));
    }

    #[test]
    fn test_flag_names() {
        let json = serde_json::to_string(&DataQualityKind::MissingArrivalTime).unwrap();
        assert_eq!(json, "\"missing_arrival_time\"");
        assert_eq!(
            DataQualityKind::CheckOutBeforeCheckIn.to_string(),
            "check_out_before_check_in"
        );
    }
}
