//! # tripline-extract
//!
//! Turns emails into model prompts and model output into canonical data.
//!
//! - [`prompt`]: classification and booking-extraction prompts, plus the
//!   JSON Schema of the booking outcome
//! - [`normalize`]: tolerant parsing of model responses into
//!   [`ClassificationOutcome`]s and [`BookingOutcome`]s, recording every repair
//! - [`content`]: readable body text from Gmail payloads, MIME messages and
//!   bare HTML

pub mod content;
pub mod normalize;
pub mod prompt;

pub use content::{extract_content, ContentSource, EmailContent};
pub use normalize::{
    extract_json_payload, normalize_booking, normalize_booking_value, normalize_classification,
    BookingOutcome, ClassificationOutcome, Coercion, CoercionKind, NormalizeStatus,
};
pub use prompt::{booking_prompt, booking_response_schema, classification_prompt};
