//! Structured logging schema and field name constants for tripline.
//!
//! All crates use these constants for consistent structured logging fields
//! so log aggregation can query by the same names across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Run aborted, persistence or connectivity failure |
//! | WARN  | Recoverable issue: fallback advance, coercion, data-quality flag |
//! | INFO  | Run lifecycle, stage and aggregation completions |
//! | DEBUG | Decision points, claimed slices, config choices |
//! | TRACE | Per-fragment and per-email iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "extract", "trips", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "fallback", "normalizer", "runner", "pool", "aggregator"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "generate", "claim", "reset", "aggregate"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// External email identifier.
pub const EMAIL_ID: &str = "email_id";

/// Pipeline stage name.
pub const STAGE: &str = "stage";

/// Trip UUID.
pub const TRIP_ID: &str = "trip_id";

/// Provider name ("gemini", "openai", "claude", "deepseek").
pub const PROVIDER: &str = "provider";

/// Logical model tier ("fast", "powerful").
pub const TIER: &str = "tier";

/// Concrete model identifier.
pub const MODEL: &str = "model";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of emails claimed or processed in a slice.
pub const BATCH_SIZE: &str = "batch_size";

/// Number of results produced.
pub const RESULT_COUNT: &str = "result_count";

/// Input tokens reported or estimated for a call.
pub const INPUT_TOKENS: &str = "input_tokens";

/// Output tokens reported or estimated for a call.
pub const OUTPUT_TOKENS: &str = "output_tokens";

/// Estimated call cost in USD.
pub const COST_USD: &str = "cost_usd";

/// Attempt number within a fallback chain entry.
pub const ATTEMPT: &str = "attempt";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message text.
pub const ERROR_MSG: &str = "error";

/// Every field name above, for log schema checks.
pub const ALL_FIELDS: &[&str] = &[
    SUBSYSTEM,
    COMPONENT,
    OPERATION,
    EMAIL_ID,
    STAGE,
    TRIP_ID,
    PROVIDER,
    TIER,
    MODEL,
    DURATION_MS,
    BATCH_SIZE,
    RESULT_COUNT,
    INPUT_TOKENS,
    OUTPUT_TOKENS,
    COST_USD,
    ATTEMPT,
    ERROR_MSG,
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_unique_snake_case() {
        let unique: HashSet<_> = ALL_FIELDS.iter().collect();
        assert_eq!(unique.len(), ALL_FIELDS.len());
        for field in ALL_FIELDS {
            assert!(field
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_'));
        }
    }
}
