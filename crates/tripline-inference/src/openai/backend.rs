//! OpenAI provider implementation.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

use tripline_core::defaults::{
    CHARS_PER_TOKEN, GEN_TEMPERATURE, GEN_TIMEOUT_SECS, SLOW_GENERATION_MS, SYSTEM_PROMPT,
};
use tripline_core::{
    AiProvider, CostBreakdown, GenerationOutput, ModelInfo, ProviderKind, Result, Tier, TokenUsage,
};

use super::types::*;
use crate::config::{default_model, ModelPricing, ProviderSettings};
use crate::error::malformed_response;
use crate::http::{build_client, post_json};
use crate::pricing::PricingTable;

/// Default OpenAI API endpoint.
pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

/// Configuration for the OpenAI provider.
#[derive(Debug, Clone)]
pub struct OpenAIConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub tier: Tier,
    pub timeout_seconds: u64,
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OPENAI_URL.to_string(),
            api_key: String::new(),
            model: default_model(ProviderKind::OpenAi, Tier::Fast).to_string(),
            tier: Tier::Fast,
            timeout_seconds: GEN_TIMEOUT_SECS,
            pricing: BTreeMap::new(),
        }
    }
}

impl OpenAIConfig {
    /// Resolve the config for `tier` from loaded settings. Fails without a
    /// usable API key.
    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        let kind = ProviderKind::OpenAi;
        Ok(Self {
            base_url: settings.base_url_or(DEFAULT_OPENAI_URL).to_string(),
            api_key: settings.require_api_key(kind)?.to_string(),
            model: settings.model_for(kind, tier),
            tier,
            timeout_seconds: settings.timeout(kind).as_secs(),
            pricing: settings.pricing.clone(),
        })
    }
}

/// OpenAI chat completions provider.
pub struct OpenAIBackend {
    client: Client,
    config: OpenAIConfig,
    pricing: PricingTable,
}

impl OpenAIBackend {
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = build_client(
            ProviderKind::OpenAi,
            Duration::from_secs(config.timeout_seconds),
        )?;
        let pricing = PricingTable::for_provider(ProviderKind::OpenAi, &config.pricing);

        info!(
            subsystem = "inference",
            component = "openai",
            url = %config.base_url,
            model = %config.model,
            tier = %config.tier,
            "Initializing OpenAI provider"
        );

        Ok(Self {
            client,
            config,
            pricing,
        })
    }

    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        Self::new(OpenAIConfig::from_settings(settings, tier)?)
    }

    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }

    fn build_request(&self, endpoint: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint);
        self.client
            .post(url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
    }
}

#[async_trait]
impl AiProvider for OpenAIBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OpenAi
    }

    fn tier(&self) -> Tier {
        self.config.tier
    }

    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "openai", op = "generate", model = %self.config.model, prompt_len = prompt.len()))]
    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput> {
        let start = Instant::now();

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage::new("system", SYSTEM_PROMPT),
                ChatMessage::new("user", prompt),
            ],
            temperature: Some(GEN_TEMPERATURE),
            max_tokens: None,
            stream: false,
        };

        let result: ChatCompletionResponse = post_json(
            ProviderKind::OpenAi,
            self.build_request("/chat/completions"),
            &request,
        )
        .await?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| malformed_response(ProviderKind::OpenAi, "no choices in response"))?;

        let usage = match result.usage {
            Some(u) => TokenUsage::reported(u.prompt_tokens, u.completion_tokens),
            None => TokenUsage::estimate(prompt, &content, CHARS_PER_TOKEN),
        };

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
            provider: ProviderKind::OpenAi,
            model: self.config.model.clone(),
            version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripline_core::{Error, PricingSource};

    #[test]
    fn test_from_settings_requires_key() {
        let settings = ProviderSettings::default();
        let err = OpenAIConfig::from_settings(&settings, Tier::Fast).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_from_settings_resolves_tier_model() {
        let mut settings = ProviderSettings {
            api_key: Some("sk-test".into()),
            ..Default::default()
        };
        settings.model_mapping.powerful = Some("gpt-4.1".into());
        let config = OpenAIConfig::from_settings(&settings, Tier::Powerful).unwrap();
        assert_eq!(config.model, "gpt-4.1");
        assert_eq!(config.base_url, DEFAULT_OPENAI_URL);
        assert_eq!(config.tier, Tier::Powerful);
    }

    #[test]
    fn test_estimate_cost_known_model() {
        let backend = OpenAIBackend::new(OpenAIConfig {
            api_key: "sk-test".into(),
            ..Default::default()
        })
        .unwrap();
        let cost = backend.estimate_cost(1_000_000, 0);
        assert!((cost.total_cost_usd - 0.15).abs() < 1e-9);
        assert_eq!(cost.pricing_source, PricingSource::Exact);
        assert_eq!(backend.model_info().model, "gpt-4o-mini");
    }
}
