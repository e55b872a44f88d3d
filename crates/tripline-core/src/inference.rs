//! Provider-neutral inference types shared by the provider abstraction and
//! its callers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// AI vendor behind a provider variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    OpenAi,
    Claude,
    DeepSeek,
}

impl ProviderKind {
    pub const ALL: [ProviderKind; 4] = [
        ProviderKind::Gemini,
        ProviderKind::OpenAi,
        ProviderKind::Claude,
        ProviderKind::DeepSeek,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "gemini",
            ProviderKind::OpenAi => "openai",
            ProviderKind::Claude => "claude",
            ProviderKind::DeepSeek => "deepseek",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderKind::Gemini),
            "openai" | "gpt" => Ok(ProviderKind::OpenAi),
            "claude" | "anthropic" => Ok(ProviderKind::Claude),
            "deepseek" | "ollama" => Ok(ProviderKind::DeepSeek),
            _ => Err(Error::InvalidInput(format!("unknown provider '{}'", s))),
        }
    }
}

/// Logical capability level mapped to a concrete model per provider.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    #[default]
    Fast,
    Powerful,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Fast => "fast",
            Tier::Powerful => "powerful",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Tier::Fast),
            "powerful" => Ok(Tier::Powerful),
            _ => Err(Error::InvalidInput(format!("unknown tier '{}'", s))),
        }
    }
}

/// Identity of the model behind a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub provider: ProviderKind,
    pub model: String,
    pub version: Option<String>,
}

/// Token counts for one call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
    /// True when counts were derived from text length.
    pub estimated: bool,
}

impl TokenUsage {
    pub fn reported(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated: false,
        }
    }

    /// Length-derived estimate at `chars_per_token` characters per token.
    pub fn estimate(prompt: &str, output: &str, chars_per_token: usize) -> Self {
        let per = chars_per_token.max(1) as u64;
        let input_tokens = prompt.chars().count() as u64 / per;
        let output_tokens = output.chars().count() as u64 / per;
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
            estimated: true,
        }
    }
}

/// Text produced by a provider plus its usage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    pub content: String,
    pub usage: TokenUsage,
}

/// Where a per-token price came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingSource {
    /// Exact model identifier found in the pricing table.
    Exact,
    /// Provider's documented default.
    Default,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input_cost_usd: f64,
    pub output_cost_usd: f64,
    pub total_cost_usd: f64,
    pub pricing_source: PricingSource,
}

impl CostBreakdown {
    pub fn zero(pricing_source: PricingSource) -> Self {
        Self {
            input_cost_usd: 0.0,
            output_cost_usd: 0.0,
            total_cost_usd: 0.0,
            pricing_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_aliases() {
        assert_eq!("Anthropic".parse::<ProviderKind>().unwrap(), ProviderKind::Claude);
        assert_eq!("ollama".parse::<ProviderKind>().unwrap(), ProviderKind::DeepSeek);
        assert!("mistral".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn test_usage_estimate() {
        let usage = TokenUsage::estimate("abcdefgh", "abcd", 4);
        assert_eq!(usage.input_tokens, 2);
        assert_eq!(usage.output_tokens, 1);
        assert_eq!(usage.total_tokens, 3);
        assert!(usage.estimated);
    }
}
