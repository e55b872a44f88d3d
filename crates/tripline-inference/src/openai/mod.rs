//! OpenAI chat completions provider.
//!
//! Works with the OpenAI cloud API and any endpoint that speaks the same
//! `/chat/completions` protocol (set `OPENAI_BASE_URL`).
//!
//! # Example
//!
//! ```rust,no_run
//! use tripline_inference::openai::{OpenAIBackend, OpenAIConfig};
//! use tripline_inference::AiProvider;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = OpenAIConfig {
//!         api_key: "sk-...".to_string(),
//!         ..OpenAIConfig::default()
//!     };
//!     let backend = OpenAIBackend::new(config).unwrap();
//!     let output = backend.generate_content("Classify these emails").await.unwrap();
//!     println!("{} ({} tokens)", output.content, output.usage.total_tokens);
//! }
//! ```

mod backend;
mod types;

pub use backend::{OpenAIBackend, OpenAIConfig, DEFAULT_OPENAI_URL};
pub use types::*;
