//! Partitioning of consolidated fragments into candidate trips.
//!
//! Anchored fragments (known start) are walked in start order. A new trip
//! opens when
//!
//! - the previous trip ended with a segment arriving home and the next
//!   fragment starts after that arrival,
//! - the gap since the latest instant of the open trip exceeds the idle gap,
//! - or the gap exceeds the continuity gap and the next transport segment
//!   departs somewhere other than where the previous one arrived.
//!
//! Unanchored fragments never open a trip; they join the trip holding
//! another fragment from the same email, else the nearest trip no more than
//! the idle gap away. Anything else is reported unplaced.

use chrono::NaiveDateTime;
use tracing::trace;

use tripline_core::{BookingFragment, FragmentDetail};

use crate::fragments::ConsolidatedFragment;
use crate::policy::GroupingPolicy;

/// Fragments of one candidate trip, as indices into the consolidated set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentGroup {
    /// Anchored members in start order.
    pub anchored: Vec<usize>,
    /// Members attached without a start time.
    pub unanchored: Vec<usize>,
}

impl FragmentGroup {
    pub fn members(&self) -> impl Iterator<Item = usize> + '_ {
        self.anchored.iter().chain(self.unanchored.iter()).copied()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grouping {
    pub groups: Vec<FragmentGroup>,
    /// Unanchored fragments with no trip to join.
    pub unplaced: Vec<usize>,
}

/// Where a transport segment arrives or departs.
#[derive(Debug, Clone)]
struct Place {
    location: Option<String>,
    code: Option<String>,
}

impl Place {
    fn new(location: Option<&str>, code: Option<&str>) -> Option<Self> {
        if location.is_none() && code.is_none() {
            return None;
        }
        Some(Self {
            location: location.map(|l| l.trim().to_lowercase()),
            code: code.map(|c| c.trim().to_lowercase()),
        })
    }

    fn is_home(&self, policy: &GroupingPolicy) -> bool {
        self.location.as_deref().is_some_and(|l| policy.is_home(l))
            || self.code.as_deref().is_some_and(|c| policy.is_home(c))
    }

    fn same_as(&self, other: &Place, policy: &GroupingPolicy) -> bool {
        if let (Some(a), Some(b)) = (&self.code, &other.code) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.location, &other.location) {
            return a == b || a.contains(b.as_str()) || b.contains(a.as_str());
        }
        self.is_home(policy) && other.is_home(policy)
    }
}

fn arrival_place(fragment: &BookingFragment) -> Option<Place> {
    match &fragment.detail {
        FragmentDetail::TransportSegment(t) => {
            Place::new(t.arrival_location.as_deref(), t.arrival_code.as_deref())
        }
        _ => None,
    }
}

fn departure_place(fragment: &BookingFragment) -> Option<Place> {
    match &fragment.detail {
        FragmentDetail::TransportSegment(t) => {
            Place::new(t.departure_location.as_deref(), t.departure_code.as_deref())
        }
        _ => None,
    }
}

struct OpenGroup {
    group: FragmentGroup,
    first_start: NaiveDateTime,
    last_end: NaiveDateTime,
    last_arrival: Option<Place>,
    /// Set when a segment arrived home; fragments starting later open a new trip.
    home_at: Option<NaiveDateTime>,
}

impl OpenGroup {
    fn start(idx: usize, fragment: &BookingFragment, start: NaiveDateTime, policy: &GroupingPolicy) -> Self {
        let mut open = Self {
            group: FragmentGroup::default(),
            first_start: start,
            last_end: start,
            last_arrival: None,
            home_at: None,
        };
        open.push(idx, fragment, start, policy);
        open
    }

    fn push(&mut self, idx: usize, fragment: &BookingFragment, start: NaiveDateTime, policy: &GroupingPolicy) {
        self.group.anchored.push(idx);
        self.last_end = self.last_end.max(fragment.last_instant().unwrap_or(start));
        if fragment.is_cancelled() {
            return;
        }
        if let Some(arrival) = arrival_place(fragment) {
            if policy.split_on_home_return && arrival.is_home(policy) {
                self.home_at = Some(fragment.end().unwrap_or(start));
            }
            self.last_arrival = Some(arrival);
        }
    }

    fn opens_new_trip(&self, fragment: &BookingFragment, start: NaiveDateTime, policy: &GroupingPolicy) -> bool {
        if self.home_at.is_some_and(|home| start >= home) {
            return true;
        }
        let gap = start - self.last_end;
        if gap > policy.idle_gap {
            return true;
        }
        if gap > policy.continuity_gap && !fragment.is_cancelled() {
            if let (Some(arrived), Some(departs)) = (&self.last_arrival, departure_place(fragment)) {
                return !arrived.same_as(&departs, policy);
            }
        }
        false
    }
}

/// Partition `fragments` into candidate trips.
pub fn group_fragments(fragments: &[ConsolidatedFragment], policy: &GroupingPolicy) -> Grouping {
    let mut anchored: Vec<(NaiveDateTime, usize)> = fragments
        .iter()
        .enumerate()
        .filter_map(|(i, f)| f.fragment.start().map(|s| (s, i)))
        .collect();
    anchored.sort_by(|(sa, ia), (sb, ib)| {
        sa.cmp(sb)
            .then_with(|| fragments[*ia].key.cmp(&fragments[*ib].key))
    });

    let mut closed: Vec<OpenGroup> = Vec::new();
    let mut open: Option<OpenGroup> = None;
    for (start, idx) in anchored {
        let fragment = &fragments[idx].fragment;
        let opens = open
            .as_ref()
            .map_or(true, |current| current.opens_new_trip(fragment, start, policy));
        if opens {
            closed.extend(open.take());
            trace!(key = %fragments[idx].key, start = %start, "Opening candidate trip");
            open = Some(OpenGroup::start(idx, fragment, start, policy));
        } else if let Some(current) = open.as_mut() {
            current.push(idx, fragment, start, policy);
        }
    }
    closed.extend(open);

    let mut unplaced = Vec::new();
    for (idx, f) in fragments.iter().enumerate() {
        if f.fragment.start().is_some() {
            continue;
        }
        match attach_target(&closed, fragments, f, policy) {
            Some(target) => closed[target].group.unanchored.push(idx),
            None => unplaced.push(idx),
        }
    }

    Grouping {
        groups: closed.into_iter().map(|g| g.group).collect(),
        unplaced,
    }
}

/// Trip an unanchored fragment joins: the first sharing an email with it,
/// else the nearest one within the idle gap.
fn attach_target(
    groups: &[OpenGroup],
    fragments: &[ConsolidatedFragment],
    candidate: &ConsolidatedFragment,
    policy: &GroupingPolicy,
) -> Option<usize> {
    let shares_email = |g: &OpenGroup| {
        g.group.anchored.iter().any(|&m| {
            fragments[m]
                .evidence_email_ids
                .iter()
                .any(|id| candidate.evidence_email_ids.contains(id))
        })
    };
    if let Some(pos) = groups.iter().position(shares_email) {
        return Some(pos);
    }

    let reference = candidate
        .fragment
        .end()
        .or_else(|| candidate.first_seen.map(|t| t.naive_utc()))?;
    let (distance, target) = groups
        .iter()
        .enumerate()
        .map(|(i, g)| {
            let distance = if reference < g.first_start {
                g.first_start - reference
            } else if reference > g.last_end {
                reference - g.last_end
            } else {
                chrono::Duration::zero()
            };
            (distance, i)
        })
        .min()?;
    (distance <= policy.idle_gap).then_some(target)
}
