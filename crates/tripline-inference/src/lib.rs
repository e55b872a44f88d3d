//! # tripline-inference
//!
//! AI provider abstraction for tripline.
//!
//! This crate provides:
//! - Vendor providers behind [`AiProvider`]: Gemini, OpenAI, Claude, and
//!   DeepSeek on a local Ollama server
//! - Per-vendor settings with tiered model mapping and placeholder-key
//!   detection
//! - Exact-match pricing tables with documented per-vendor defaults
//! - HTTP failure classification into transient and permanent errors
//! - An ordered fallback chain with bounded retries and call timeouts
//!
//! # Feature Flags
//!
//! - `mock`: expose the scripted [`mock::MockProvider`] to other crates' tests
//!
//! # Example
//!
//! ```rust,no_run
//! use tripline_inference::{parse_chain, FallbackChain, FallbackPolicy, ProviderRegistry};
//!
//! #[tokio::main]
//! async fn main() {
//!     let registry = ProviderRegistry::from_env();
//!     let entries = parse_chain("gemini:fast,openai:fast,claude:fast").unwrap();
//!     let chain = FallbackChain::from_registry(&registry, &entries, FallbackPolicy::default())
//!         .unwrap();
//!     let served = chain.generate("Classify these emails").await.unwrap();
//!     println!("served by {}:{}", served.provider, served.tier);
//! }
//! ```

pub mod claude;
pub mod config;
pub mod deepseek;
pub mod error;
pub mod fallback;
pub mod gemini;
mod http;
pub mod openai;
pub mod pricing;
pub mod provider;
pub mod registry;
pub mod thinking;

// Scripted provider for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core types
pub use tripline_core::*;

pub use claude::{ClaudeBackend, ClaudeConfig};
pub use config::{is_placeholder, ModelMapping, ModelPricing, ProviderSettings};
pub use deepseek::{DeepSeekBackend, DeepSeekConfig};
pub use error::HttpErrorCode;
pub use fallback::{
    parse_chain, AttemptRecord, ChainEntry, FallbackChain, FallbackPolicy, ServedGeneration,
};
pub use gemini::{GeminiBackend, GeminiConfig};
pub use openai::{OpenAIBackend, OpenAIConfig};
pub use pricing::PricingTable;
pub use provider::Provider;
pub use registry::ProviderRegistry;
pub use thinking::strip_thinking;
