//! # tripline-core
//!
//! Core types, traits, and abstractions for tripline.
//!
//! This crate provides the email and pipeline-state models, the canonical
//! booking schema, the trip aggregate and the repository and provider traits
//! that the other tripline crates depend on.

pub mod booking;
pub mod defaults;
pub mod error;
pub mod inference;
pub mod logging;
pub mod models;
pub mod temporal;
pub mod traits;
pub mod trip;

// Re-export commonly used types at crate root
pub use booking::*;
pub use error::{CallErrorKind, Error, ProviderCallError, Result};
pub use inference::*;
pub use models::*;
pub use temporal::{parse_booking_date, parse_booking_datetime, parse_email_date};
pub use traits::*;
pub use trip::*;
