//! DeepSeek models served by a local Ollama server.
//!
//! Uses the `/api/chat` endpoint. No API key is needed and every call is
//! free; reasoning blocks are stripped from the answer.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use tripline_core::defaults::{
    CHARS_PER_TOKEN, GEN_TEMPERATURE, LOCAL_GEN_TIMEOUT_SECS, SLOW_GENERATION_MS, SYSTEM_PROMPT,
};
use tripline_core::{
    AiProvider, CostBreakdown, Error, GenerationOutput, ModelInfo, PricingSource, ProviderKind,
    Result, Tier, TokenUsage,
};

use crate::config::{default_model, ProviderSettings};
use crate::error::{request_error, status_error};
use crate::http::{build_client, post_json};
use crate::thinking::strip_thinking;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Timeout for the `/api/tags` reachability probe.
const PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct DeepSeekConfig {
    pub base_url: String,
    pub model: String,
    pub tier: Tier,
    pub timeout_seconds: u64,
}

impl Default for DeepSeekConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_OLLAMA_URL.to_string(),
            model: default_model(ProviderKind::DeepSeek, Tier::Fast).to_string(),
            tier: Tier::Fast,
            timeout_seconds: LOCAL_GEN_TIMEOUT_SECS,
        }
    }
}

impl DeepSeekConfig {
    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        let kind = ProviderKind::DeepSeek;
        let base_url = settings.base_url_or(DEFAULT_OLLAMA_URL).to_string();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            return Err(Error::Config(format!(
                "deepseek base_url must be an http(s) URL, got '{}'",
                base_url
            )));
        }
        Ok(Self {
            base_url,
            model: settings.model_for(kind, tier),
            tier,
            timeout_seconds: settings.timeout(kind).as_secs(),
        })
    }
}

/// Chat API message for `/api/chat`.
#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

/// Request payload for the Ollama `/api/chat` endpoint.
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: ChatOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ChatMessage,
    #[serde(default)]
    prompt_eval_count: u64,
    #[serde(default)]
    eval_count: u64,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagModel>,
}

#[derive(Deserialize)]
struct TagModel {
    name: String,
}

pub struct DeepSeekBackend {
    client: Client,
    config: DeepSeekConfig,
}

impl DeepSeekBackend {
    pub fn new(config: DeepSeekConfig) -> Result<Self> {
        let client = build_client(
            ProviderKind::DeepSeek,
            Duration::from_secs(config.timeout_seconds),
        )?;
        info!(
            subsystem = "inference",
            component = "deepseek",
            url = %config.base_url,
            model = %config.model,
            tier = %config.tier,
            "Initializing DeepSeek provider"
        );
        Ok(Self { client, config })
    }

    pub fn from_settings(settings: &ProviderSettings, tier: Tier) -> Result<Self> {
        Self::new(DeepSeekConfig::from_settings(settings, tier)?)
    }

    /// Probe the Ollama server and report whether the configured model is
    /// pulled.
    #[instrument(skip(self), fields(subsystem = "inference", component = "deepseek", op = "health_check"))]
    pub async fn health_check(&self) -> Result<bool> {
        let kind = ProviderKind::DeepSeek;
        let response = self
            .client
            .get(format!("{}/api/tags", self.config.base_url))
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| request_error(kind, e))?;
        let status = response.status();
        let text = response.text().await.map_err(|e| request_error(kind, e))?;
        if !status.is_success() {
            return Err(status_error(kind, status.as_u16(), &text));
        }
        let tags: TagsResponse = serde_json::from_str(&text)?;
        let available = tags.models.iter().any(|m| m.name == self.config.model);
        if !available {
            warn!(model = %self.config.model, "Model not pulled on Ollama server");
        }
        Ok(available)
    }
}

#[async_trait]
impl AiProvider for DeepSeekBackend {
    fn kind(&self) -> ProviderKind {
        ProviderKind::DeepSeek
    }

    fn tier(&self) -> Tier {
        self.config.tier
    }

    #[instrument(skip(self, prompt), fields(subsystem = "inference", component = "deepseek", op = "generate", model = %self.config.model, prompt_len = prompt.len()))]
    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput> {
        let start = Instant::now();
        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.to_string(),
                },
            ],
            stream: false,
            options: ChatOptions {
                temperature: GEN_TEMPERATURE,
            },
        };

        let req = self
            .client
            .post(format!("{}/api/chat", self.config.base_url));
        let result: ChatResponse = post_json(ProviderKind::DeepSeek, req, &request).await?;

        let content = strip_thinking(&result.message.content);

        // Ollama omits counts on cache hits; estimate each missing side.
        let estimated = TokenUsage::estimate(prompt, &content, CHARS_PER_TOKEN);
        let usage = if result.prompt_eval_count == 0 || result.eval_count == 0 {
            let input = if result.prompt_eval_count == 0 {
                estimated.input_tokens
            } else {
                result.prompt_eval_count
            };
            let output = if result.eval_count == 0 {
                estimated.output_tokens
            } else {
                result.eval_count
            };
            TokenUsage {
                estimated: true,
                ..TokenUsage::reported(input, output)
            }
        } else {
            TokenUsage::reported(result.prompt_eval_count, result.eval_count)
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

    fn estimate_cost(&self, _input_tokens: u64, _output_tokens: u64) -> CostBreakdown {
        CostBreakdown::zero(PricingSource::Exact)
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: ProviderKind::DeepSeek,
            model: self.config.model.clone(),
            version: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings_needs_no_key() {
        let config = DeepSeekConfig::from_settings(&ProviderSettings::default(), Tier::Powerful)
            .unwrap();
        assert_eq!(config.base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(config.model, "deepseek-r1:14b");
        assert_eq!(config.timeout_seconds, LOCAL_GEN_TIMEOUT_SECS);
    }

    #[test]
    fn test_invalid_base_url_rejected() {
        let settings = ProviderSettings {
            base_url: Some("localhost:11434".into()),
            ..Default::default()
        };
        assert!(matches!(
            DeepSeekConfig::from_settings(&settings, Tier::Fast),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_cost_is_always_zero() {
        let backend = DeepSeekBackend::new(DeepSeekConfig::default()).unwrap();
        assert_eq!(backend.estimate_cost(10_000, 10_000).total_cost_usd, 0.0);
    }
}
