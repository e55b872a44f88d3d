//! # tripline-jobs
//!
//! Batch processing for the tripline pipeline.
//!
//! This crate provides:
//! - Stage handlers for classification, content extraction, booking
//!   extraction and trip detection
//! - A restartable slice runner with claim-based concurrency control
//! - Stop handles and progress events via broadcast channels
//! - Run reports with per-provider token and cost totals
//! - The `tripline` command-line driver
//!
//! ## Example
//!
//! ```ignore
//! use tripline_db::MemoryStore;
//! use tripline_jobs::Pipeline;
//! use tripline_core::Stage;
//!
//! let store = MemoryStore::new();
//! let pipeline = Pipeline::from_env(store.repositories())?;
//! pipeline.ingest(&records).await?;
//!
//! let mut events = pipeline.events();
//! let report = pipeline.run(&Stage::ALL).await?;
//! println!("{}", serde_json::to_string_pretty(&report)?);
//! ```

pub mod config;
pub mod handler;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod stages;

// Re-export core types
pub use tripline_core::*;

pub use config::RunnerConfig;
pub use handler::{CallRecord, EmailOutcome, SliceOutcome, StageHandler, StageResult};
pub use pipeline::{Pipeline, ResetTarget};
pub use report::{RunReport, StageReport, StatusReport, UsageSummary};
pub use runner::{BatchRunner, RunnerEvent, RunnerHandle};
pub use stages::{BookingHandler, ClassificationHandler, ContentHandler, TripDetectionHandler};
