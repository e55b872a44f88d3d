//! # tripline-trips
//!
//! Trip aggregation engine for tripline.
//!
//! This crate provides:
//! - Eligibility screening of completed booking extractions
//! - Fragment materialization and cross-email consolidation
//! - A tunable grouping policy and the grouping walk
//! - Trip derivations (dates, cities, cost, name, data-quality flags)
//! - [`TripAggregator`], the whole-set aggregation pass
//!
//! ## Example
//!
//! ```ignore
//! use tripline_trips::{GroupingPolicy, TripAggregator};
//! use tripline_core::AggregationScope;
//!
//! let aggregator = TripAggregator::new(&repos, GroupingPolicy::from_env());
//! let report = aggregator.run_pass(AggregationScope::All).await?;
//! println!("{} trips", report.trip_count());
//! ```

pub mod derive;
pub mod eligibility;
pub mod engine;
pub mod fragments;
pub mod grouping;
pub mod policy;

pub use derive::{derive_trip, trip_id};
pub use eligibility::{screen, Eligibility};
pub use engine::{AggregationReport, TripAggregator};
pub use fragments::{
    consolidate, consolidation_key, materialize, ConsolidatedFragment, EmailBooking,
    TRIPLINE_NAMESPACE,
};
pub use grouping::{group_fragments, FragmentGroup, Grouping};
pub use policy::GroupingPolicy;
