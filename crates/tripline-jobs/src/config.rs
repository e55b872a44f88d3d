//! Runner configuration.

use std::time::Duration;

use tripline_core::{defaults, Result, Stage};
use tripline_inference::{parse_chain, ChainEntry, FallbackPolicy};

/// Configuration for the batch runner.
#[derive(Debug, Clone, PartialEq)]
pub struct RunnerConfig {
    /// Emails claimed per classification slice.
    pub classification_slice_size: usize,
    /// Emails listed in one classification prompt.
    pub classification_prompt_batch: usize,
    /// Emails claimed per content, booking and trip-detection slice.
    pub batch_size: usize,
    /// Maximum in-flight AI calls within one slice.
    pub max_parallel: usize,
    /// Upper bound on slices per stage in a single run.
    pub max_slices: usize,
    /// Comma-separated `provider:tier` fallback order.
    pub fallback_chain: String,
    /// Timeout of a single provider call.
    pub call_timeout: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            classification_slice_size: defaults::CLASSIFICATION_SLICE_SIZE,
            classification_prompt_batch: defaults::CLASSIFICATION_PROMPT_BATCH,
            batch_size: defaults::BOOKING_SLICE_SIZE,
            max_parallel: defaults::PIPELINE_MAX_PARALLEL,
            max_slices: defaults::PIPELINE_MAX_SLICES,
            fallback_chain: defaults::FALLBACK_CHAIN.to_string(),
            call_timeout: Duration::from_secs(defaults::GEN_TIMEOUT_SECS),
        }
    }
}

impl RunnerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PIPELINE_BATCH_SIZE` | `10` | Emails per content, booking and trip-detection slice |
    /// | `CLASSIFICATION_BATCH_SIZE` | `20` | Emails per classification slice and prompt |
    /// | `PIPELINE_MAX_PARALLEL` | `4` | Max concurrent AI calls within a slice |
    /// | `PIPELINE_MAX_SLICES` | `1000` | Max slices per stage in one run |
    /// | `AI_FALLBACK_CHAIN` | `gemini:fast,openai:fast,claude:fast` | Provider fallback order |
    /// | `AI_CALL_TIMEOUT_SECS` | `120` | Timeout of one provider call |
    pub fn from_env() -> Self {
        let base = Self::default();

        let batch_size = std::env::var("PIPELINE_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.batch_size)
            .max(1);

        let classification_batch = std::env::var("CLASSIFICATION_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .map(|v| v.max(1));

        let max_parallel = std::env::var("PIPELINE_MAX_PARALLEL")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.max_parallel)
            .max(1);

        let max_slices = std::env::var("PIPELINE_MAX_SLICES")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(base.max_slices)
            .max(1);

        let fallback_chain = std::env::var("AI_FALLBACK_CHAIN")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(base.fallback_chain);

        let call_timeout = std::env::var("AI_CALL_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(base.call_timeout);

        Self {
            classification_slice_size: classification_batch
                .unwrap_or(base.classification_slice_size),
            classification_prompt_batch: classification_batch
                .unwrap_or(base.classification_prompt_batch),
            batch_size,
            max_parallel,
            max_slices,
            fallback_chain,
            call_timeout,
        }
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    pub fn with_classification_batch(mut self, size: usize) -> Self {
        self.classification_slice_size = size.max(1);
        self.classification_prompt_batch = size.max(1);
        self
    }

    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_max_slices(mut self, max: usize) -> Self {
        self.max_slices = max.max(1);
        self
    }

    /// Slice size used when claiming for `stage`.
    pub fn slice_size(&self, stage: Stage) -> usize {
        match stage {
            Stage::Classification => self.classification_slice_size,
            _ => self.batch_size,
        }
    }

    /// Parsed fallback chain entries.
    pub fn chain_entries(&self) -> Result<Vec<ChainEntry>> {
        parse_chain(&self.fallback_chain)
    }

    /// Fallback policy carrying the configured call timeout.
    pub fn fallback_policy(&self) -> FallbackPolicy {
        FallbackPolicy::default().with_call_timeout(self.call_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.slice_size(Stage::Classification), 20);
        assert_eq!(config.slice_size(Stage::BookingExtraction), 10);
        assert_eq!(config.slice_size(Stage::TripDetection), 10);
        assert_eq!(config.max_parallel, 4);
        assert_eq!(config.chain_entries().unwrap().len(), 3);
    }

    #[test]
    fn test_builders_clamp_to_one() {
        let config = RunnerConfig::default()
            .with_batch_size(0)
            .with_max_parallel(0)
            .with_classification_batch(5);
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_parallel, 1);
        assert_eq!(config.classification_prompt_batch, 5);
    }
}
