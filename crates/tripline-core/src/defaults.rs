//! Centralized default constants for the tripline system.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// PIPELINE
// =============================================================================

/// Emails claimed per classification slice.
pub const CLASSIFICATION_SLICE_SIZE: usize = 20;

/// Emails listed in one classification prompt.
pub const CLASSIFICATION_PROMPT_BATCH: usize = 20;

/// Emails claimed per content-extraction slice.
pub const CONTENT_SLICE_SIZE: usize = 10;

/// Emails claimed per booking-extraction slice.
pub const BOOKING_SLICE_SIZE: usize = 10;

/// Emails claimed per trip-detection slice.
pub const TRIP_DETECTION_SLICE_SIZE: usize = 10;

/// Maximum in-flight AI calls within one slice.
pub const PIPELINE_MAX_PARALLEL: usize = 4;

/// Upper bound on slices per stage in a single run.
pub const PIPELINE_MAX_SLICES: usize = 1_000;

/// Runner event broadcast channel capacity.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// PROMPTS
// =============================================================================

/// Subject characters kept per email in a classification prompt.
pub const SUBJECT_MAX_CHARS: usize = 100;

/// Sender characters kept per email in a classification prompt.
pub const SENDER_MAX_CHARS: usize = 50;

/// Body characters kept in a booking-extraction prompt.
pub const BODY_MAX_CHARS: usize = 30_000;

/// Characters of a failed response kept in diagnostic error text.
pub const RESPONSE_EXCERPT_CHARS: usize = 500;

// =============================================================================
// INFERENCE
// =============================================================================

/// Shared system prompt for every vendor.
pub const SYSTEM_PROMPT: &str = "You are a helpful assistant for travel booking analysis.";

/// Sampling temperature for extraction calls.
pub const GEN_TEMPERATURE: f32 = 0.1;

/// Output token cap for vendors that require one.
pub const GEN_MAX_OUTPUT_TOKENS: u32 = 4096;

/// Timeout for a hosted generation request in seconds.
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Timeout for a local (Ollama) generation request in seconds.
pub const LOCAL_GEN_TIMEOUT_SECS: u64 = 300;

/// Generations slower than this are logged as slow.
pub const SLOW_GENERATION_MS: u64 = 30_000;

/// Characters per token when a vendor reports no usage.
pub const CHARS_PER_TOKEN: usize = 4;

/// Attempts against one chain entry before advancing.
pub const FALLBACK_ATTEMPTS_PER_ENTRY: u32 = 2;

/// Delay between attempts on the same entry in milliseconds.
pub const FALLBACK_RETRY_DELAY_MS: u64 = 500;

/// Distinct providers a chain may try for one request.
pub const FALLBACK_MAX_PROVIDERS: usize = 3;

/// Default fallback order.
pub const FALLBACK_CHAIN: &str = "gemini:fast,openai:fast,claude:fast";

// =============================================================================
// TRIP AGGREGATION
// =============================================================================

/// Days without travel activity that close a trip.
pub const TRIP_IDLE_GAP_DAYS: i64 = 2;

/// Hours of gap after which a geographic discontinuity opens a new trip.
pub const TRIP_CONTINUITY_GAP_HOURS: i64 = 24;

/// Home city used as the default trip origin.
pub const HOME_CITY: &str = "Zurich";

/// Location substrings treated as the home area.
pub const HOME_CITY_ALIASES: &[&str] = &[
    "zurich",
    "zürich",
    "zuerich",
    "zrh",
    "kloten",
    "winterthur",
    "opfikon",
    "wallisellen",
];

/// Confirmation-number substrings that mark a booking as a test booking.
pub const TEST_BOOKING_MARKERS: &[&str] = &["test", "demo", "sample", "example"];
