//! Closed set of provider variants behind one [`AiProvider`] interface.

use std::sync::Arc;

use async_trait::async_trait;

use tripline_core::{
    AiProvider, CostBreakdown, GenerationOutput, ModelInfo, ProviderKind, Result, Tier,
};

use crate::claude::ClaudeBackend;
use crate::config::ProviderSettings;
use crate::deepseek::DeepSeekBackend;
use crate::gemini::GeminiBackend;
use crate::openai::OpenAIBackend;

/// A constructed provider.
///
/// The four vendor variants cover production use. `Custom` wraps any other
/// implementation, such as a scripted provider in tests.
#[derive(Clone)]
pub enum Provider {
    Gemini(Arc<GeminiBackend>),
    OpenAi(Arc<OpenAIBackend>),
    Claude(Arc<ClaudeBackend>),
    DeepSeek(Arc<DeepSeekBackend>),
    Custom(Arc<dyn AiProvider>),
}

impl Provider {
    /// Construct the vendor provider for `kind` at `tier`.
    ///
    /// Fails with [`tripline_core::Error::Config`] when the vendor's
    /// credentials are missing or placeholders.
    pub fn build(kind: ProviderKind, tier: Tier, settings: &ProviderSettings) -> Result<Self> {
        Ok(match kind {
            ProviderKind::Gemini => {
                Provider::Gemini(Arc::new(GeminiBackend::from_settings(settings, tier)?))
            }
            ProviderKind::OpenAi => {
                Provider::OpenAi(Arc::new(OpenAIBackend::from_settings(settings, tier)?))
            }
            ProviderKind::Claude => {
                Provider::Claude(Arc::new(ClaudeBackend::from_settings(settings, tier)?))
            }
            ProviderKind::DeepSeek => {
                Provider::DeepSeek(Arc::new(DeepSeekBackend::from_settings(settings, tier)?))
            }
        })
    }

    pub fn custom(provider: impl AiProvider + 'static) -> Self {
        Provider::Custom(Arc::new(provider))
    }

    fn inner(&self) -> &dyn AiProvider {
        match self {
            Provider::Gemini(p) => p.as_ref(),
            Provider::OpenAi(p) => p.as_ref(),
            Provider::Claude(p) => p.as_ref(),
            Provider::DeepSeek(p) => p.as_ref(),
            Provider::Custom(p) => p.as_ref(),
        }
    }

    /// `vendor:tier/model`, for logs and reports.
    pub fn label(&self) -> String {
        format!("{}:{}/{}", self.kind(), self.tier(), self.model_info().model)
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Provider").field(&self.label()).finish()
    }
}

#[async_trait]
impl AiProvider for Provider {
    fn kind(&self) -> ProviderKind {
        self.inner().kind()
    }

    fn tier(&self) -> Tier {
        self.inner().tier()
    }

    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput> {
        self.inner().generate_content(prompt).await
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        self.inner().estimate_cost(input_tokens, output_tokens)
    }

    fn model_info(&self) -> ModelInfo {
        self.inner().model_info()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripline_core::Error;

    #[test]
    fn test_build_without_key_is_config_error() {
        let err = Provider::build(ProviderKind::Gemini, Tier::Fast, &ProviderSettings::default())
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_build_deepseek_and_label() {
        let provider =
            Provider::build(ProviderKind::DeepSeek, Tier::Fast, &ProviderSettings::default())
                .unwrap();
        assert_eq!(provider.kind(), ProviderKind::DeepSeek);
        assert_eq!(provider.label(), "deepseek:fast/deepseek-r1:7b");
    }

    #[test]
    fn test_build_claude_powerful_tier() {
        let settings = ProviderSettings {
            api_key: Some("sk-ant-abc123".into()),
            ..Default::default()
        };
        let provider = Provider::build(ProviderKind::Claude, Tier::Powerful, &settings).unwrap();
        assert_eq!(provider.tier(), Tier::Powerful);
        assert_eq!(provider.model_info().model, "claude-sonnet-4-20250514");
    }
}
