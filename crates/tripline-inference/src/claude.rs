//! Anthropic Claude provider (Messages API).

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tripline_core::defaults::{
    CHARS_PER_TOKEN, GEN_MAX_OUTPUT_TOKENS, GEN_TEMPERATURE, GEN_TIMEOUT_SECS, SLOW_GENERATION_MS,
    SYSTEM_PROMPT,
};
use tripline_core::{
    AiProvider, CostBreakdown, GenerationOutput, ModelInfo, ProviderKind, Result, Tier, TokenUsage,
};

use crate::config::{default_model, ModelPricing, ProviderSettings};
use crate::error::malformed_response;
use crate::http::{build_client, post_json};
use crate::pricing::PricingTable;

pub const DEFAULT_CLAUDE_URL: &str = "https://api.anthropic.com/v1";

/// Value sent in the `anthropic-version` header.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone)]
pub struct ClaudeConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub tier: Tier,
    pub max_tokens: u32,
    pub timeout_seconds: u64,
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl Default for ClaudeConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CLAUDE_URL.to_string(),
            api_key: String::new(),
            model: default_model(ProviderKind::Claude, Tier::Fast).to_string(),
            tier: Tier::Fast,
            max_tokens: GEN_MAX_OUTPUT_TOKENS,
            timeout_seconds: GEN_TIMEOUT_SECS,
            pricing: BTreeMap::new(),
        }
    }
}

impl ClaudeConfig {
    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        let kind = ProviderKind::Claude;
        Ok(Self {
            base_url: settings.base_url_or(DEFAULT_CLAUDE_URL).to_string(),
            api_key: settings.require_api_key(kind)?.to_string(),
            model: settings.model_for(kind, tier),
            tier,
            max_tokens: GEN_MAX_OUTPUT_TOKENS,
            timeout_seconds: settings.timeout(kind).as_secs(),
            pricing: settings.pricing.clone(),
        })
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    system: &'a str,
    messages: Vec<Message<'a>>,
}

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

/// Only `text` blocks carry answer text.
#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}

pub struct ClaudeBackend {
    client: Client,
    config: ClaudeConfig,
    pricing: PricingTable,
}

impl ClaudeBackend {
    pub fn new(config: ClaudeConfig) -> Result<Self> {
        let client = build_client(
            ProviderKind::Claude,
            Duration::from_secs(config.timeout_seconds),
        )?;
        let pricing = PricingTable::for_provider(ProviderKind::Claude, &config.pricing);
        info!(
            subsystem = "inference",
            component = "claude",
            model = %config.model,
            tier = %config.tier,
            "Initializing Claude provider"
        );
        Ok(Self {
            client,
            config,
            pricing,
        })
    }

    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        Self::new(ClaudeConfig::from_settings(settings, tier)?)
    }
}

#[async_trait]
impl AiProvider for ClaudeBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Claude
    }

    fn tier(&self) -> Tier {
        self.config.tier
    }

    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "claude", op = "generate", model = %self.config.model, prompt_len = prompt.len()))]
    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput> {
        let start = Instant::now();
        let request = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            temperature: GEN_TEMPERATURE,
            system: SYSTEM_PROMPT,
            messages: vec![Message {
                role: "user",
                content: prompt,
            }],
        };

        let url = format!("{}/messages", self.config.base_url.trim_end_matches('/'));
        let req = self
            .client
            .post(url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION);
        let result: MessagesResponse = post_json(ProviderKind::Claude, req, &request).await?;

        let content: String = result
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect();
        if content.is_empty() {
            return Err(malformed_response(
                ProviderKind::Claude,
                format!(
                    "no text content (stop reason {})",
                    result.stop_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        let usage = result
            .usage
            .map(|u| TokenUsage::reported(u.input_tokens, u.output_tokens))
            .unwrap_or_else(|| TokenUsage::estimate(prompt, &content, CHARS_PER_TOKEN));

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            input_tokens = usage.input_tokens,
            output_tokens = usage.output_tokens,
            duration_ms = elapsed,
            "Generation complete"
        );
        if elapsed > SLOW_GENERATION_MS {
            warn!(duration_ms = elapsed, slow = true, "Slow generation operation");
        }

        Ok(GenerationOutput { content, usage })
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        self.pricing
            .estimate(&self.config.model, input_tokens, output_tokens)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: ProviderKind::Claude,
            model: self.config.model.clone(),
            version: Some(ANTHROPIC_VERSION.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripline_core::PricingSource;

    #[test]
    fn test_unknown_model_uses_sonnet_pricing() {
        let backend = ClaudeBackend::new(ClaudeConfig {
            api_key: "sk-ant-test".into(),
            model: "claude-next".into(),
            ..Default::default()
        })
        .unwrap();
        let cost = backend.estimate_cost(1_000_000, 1_000_000);
        assert!((cost.total_cost_usd - 18.0).abs() < 1e-9);
        assert_eq!(cost.pricing_source, PricingSource::Default);
    }

    #[test]
    fn test_response_skips_non_text_blocks() {
        let json = r#"{
            "content": [{"type": "thinking", "thinking": "..."}, {"type": "text", "text": "{}"}],
            "usage": {"input_tokens": 5, "output_tokens": 1},
            "stop_reason": "end_turn"
        }"#;
        let response: MessagesResponse = serde_json::from_str(json).unwrap();
        let text: String = response
            .content
            .into_iter()
            .filter(|b| b.block_type == "text")
            .filter_map(|b| b.text)
            .collect();
        assert_eq!(text, "{}");
    }
}
