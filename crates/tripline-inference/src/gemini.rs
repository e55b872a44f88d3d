//! Google Gemini provider (`generateContent` REST API).

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

pub const DEFAULT_GEMINI_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub tier: Tier,
    pub timeout_seconds: u64,
    pub pricing: BTreeMap<String, ModelPricing>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_GEMINI_URL.to_string(),
            api_key: String::new(),
            model: default_model(ProviderKind::Gemini, Tier::Fast).to_string(),
            tier: Tier::Fast,
            timeout_seconds: GEN_TIMEOUT_SECS,
            pricing: BTreeMap::new(),
        }
    }
}

impl GeminiConfig {
    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        let kind = ProviderKind::Gemini;
        Ok(Self {
            base_url: settings.base_url_or(DEFAULT_GEMINI_URL).to_string(),
            api_key: settings.require_api_key(kind)?.to_string(),
            model: settings.model_for(kind, tier),
            tier,
            timeout_seconds: settings.timeout(kind).as_secs(),
            pricing: settings.pricing.clone(),
        })
    }
}

// =============================================================================
// WIRE TYPES
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    system_instruction: Content<'a>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Debug, Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
    model_version: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

// =============================================================================
// PROVIDER
// =============================================================================

pub struct GeminiBackend {
    client: Client,
    config: GeminiConfig,
    pricing: PricingTable,
}

impl GeminiBackend {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = build_client(
            ProviderKind::Gemini,
            Duration::from_secs(config.timeout_seconds),
        )?;
        let pricing = PricingTable::for_provider(ProviderKind::Gemini, &config.pricing);
        info!(
            subsystem = "inference",
            component = "gemini",
            model = %config.model,
            tier = %config.tier,
            "Initializing Gemini provider"
        );
        Ok(Self {
            client,
            config,
            pricing,
        })
    }

    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        Self::new(GeminiConfig::from_settings(settings, tier)?)
    }
}

#[async_trait]
impl AiProvider for GeminiBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn tier(&self) -> Tier {
        self.config.tier
    }

    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "gemini", op = "generate", model = %self.config.model, prompt_len = prompt.len()))]
    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput> {
        let start = Instant::now();
        let request = GenerateContentRequest {
            system_instruction: Content {
                role: None,
                parts: vec![RequestPart {
                    text: SYSTEM_PROMPT,
                }],
            },
            contents: vec![Content {
                role: Some("user"),
                parts: vec![RequestPart { text: prompt }],
            }],
            generation_config: GenerationConfig {
                temperature: GEN_TEMPERATURE,
                max_output_tokens: GEN_MAX_OUTPUT_TOKENS,
            },
        };

        let url = format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        );
        let req = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.config.api_key);
        let result: GenerateContentResponse = post_json(ProviderKind::Gemini, req, &request).await?;

        let candidate = result
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| malformed_response(ProviderKind::Gemini, "no candidates in response"))?;
        let content: String = candidate
            .content
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(malformed_response(
                ProviderKind::Gemini,
                format!(
                    "empty candidate (finish reason {})",
                    candidate.finish_reason.as_deref().unwrap_or("unknown")
                ),
            ));
        }

        let usage = match result.usage_metadata {
            Some(u) => TokenUsage::reported(u.prompt_token_count, u.candidates_token_count),
            None => TokenUsage::estimate(prompt, &content, CHARS_PER_TOKEN),
        };

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            response_len = content.len(),
            model_version = result.model_version.as_deref().unwrap_or(""),
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
            provider: ProviderKind::Gemini,
            model: self.config.model.clone(),
            version: None,
        }
    }
}
