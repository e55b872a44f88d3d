//! Scripted provider for deterministic testing.
//!
//! Outcomes are consumed in order; once the script is empty the responder
//! (if any) decides, then the default response.
//!
//! ## Usage
//!
//! ```rust
//! use tripline_inference::mock::MockProvider;
//! use tripline_inference::{AiProvider, ProviderKind};
//!
//! # async fn demo() {
//! let provider = MockProvider::new(ProviderKind::OpenAi)
//!     .then_transient("rate limited")
//!     .then_respond(r#"[{"id": 1, "category": "flight"}]"#);
//!
//! assert!(provider.generate_content("prompt").await.is_err());
//! assert!(provider.generate_content("prompt").await.is_ok());
//! assert_eq!(provider.call_count(), 2);
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use tripline_core::defaults::CHARS_PER_TOKEN;
use tripline_core::{
    AiProvider, CostBreakdown, Error, GenerationOutput, ModelInfo, PricingSource, ProviderCallError,
    ProviderKind, Result, Tier, TokenUsage,
};

/// What one call produces.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Respond(String),
    /// Rate-limit-like failure that advances a fallback chain.
    Transient(String),
    /// Auth-like failure that aborts a fallback chain.
    Permanent(String),
    /// Never completes; exercises call timeouts.
    Hang,
}

type Responder = Arc<dyn Fn(&str) -> MockOutcome + Send + Sync>;

#[derive(Debug, Clone)]
pub struct MockCall {
    pub prompt: String,
}

#[derive(Clone)]
pub struct MockProvider {
    kind: ProviderKind,
    tier: Tier,
    model: String,
    price_per_1m: (f64, f64),
    default_response: Option<String>,
    responder: Option<Responder>,
    script: Arc<Mutex<VecDeque<MockOutcome>>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl MockProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            tier: Tier::Fast,
            model: format!("mock-{}", kind),
            price_per_1m: (0.0, 0.0),
            default_response: None,
            responder: None,
            script: Arc::new(Mutex::new(VecDeque::new())),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Price per million input and output tokens.
    pub fn with_pricing(mut self, input_per_1m: f64, output_per_1m: f64) -> Self {
        self.price_per_1m = (input_per_1m, output_per_1m);
        self
    }

    /// Response used once the script and responder are exhausted.
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = Some(response.into());
        self
    }

    /// Compute each unscripted outcome from the prompt.
    pub fn with_responder(
        mut self,
        responder: impl Fn(&str) -> MockOutcome + Send + Sync + 'static,
    ) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    pub fn then(self, outcome: MockOutcome) -> Self {
        lock(&self.script).push_back(outcome);
        self
    }

    pub fn then_respond(self, content: impl Into<String>) -> Self {
        self.then(MockOutcome::Respond(content.into()))
    }

    pub fn then_transient(self, message: impl Into<String>) -> Self {
        self.then(MockOutcome::Transient(message.into()))
    }

    pub fn then_permanent(self, message: impl Into<String>) -> Self {
        self.then(MockOutcome::Permanent(message.into()))
    }

    pub fn then_hang(self) -> Self {
        self.then(MockOutcome::Hang)
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.call_log).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.call_log).len()
    }

    fn next_outcome(&self, prompt: &str) -> MockOutcome {
        if let Some(outcome) = lock(&self.script).pop_front() {
            return outcome;
        }
        if let Some(responder) = &self.responder {
            return responder(prompt);
        }
        match &self.default_response {
            Some(r) => MockOutcome::Respond(r.clone()),
            None => MockOutcome::Permanent("mock script exhausted".to_string()),
        }
    }
}

#[async_trait]
impl AiProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    fn tier(&self) -> Tier {
        self.tier
    }

    async fn generate_content(&self, prompt: &str) -> Result<GenerationOutput> {
        lock(&self.call_log).push(MockCall {
            prompt: prompt.to_string(),
        });
        match self.next_outcome(prompt) {
            MockOutcome::Respond(content) => Ok(GenerationOutput {
                usage: TokenUsage::estimate(prompt, &content, CHARS_PER_TOKEN),
                content,
            }),
            MockOutcome::Transient(message) => Err(Error::ProviderCall(
                ProviderCallError::transient(self.kind.to_string(), message).with_status(429),
            )),
            MockOutcome::Permanent(message) => Err(Error::ProviderCall(
                ProviderCallError::permanent(self.kind.to_string(), message).with_status(401),
            )),
            MockOutcome::Hang => std::future::pending().await,
        }
    }

    fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let input_cost_usd = input_tokens as f64 / 1_000_000.0 * self.price_per_1m.0;
        let output_cost_usd = output_tokens as f64 / 1_000_000.0 * self.price_per_1m.1;
        CostBreakdown {
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
            pricing_source: PricingSource::Exact,
        }
    }

    fn model_info(&self) -> ModelInfo {
        ModelInfo {
            provider: self.kind,
            model: self.model.clone(),
            version: Some("mock".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_then_default() {
        let provider = MockProvider::new(ProviderKind::Gemini)
            .then_respond("first")
            .with_default_response("fallback");
        assert_eq!(provider.generate_content("a").await.unwrap().content, "first");
        assert_eq!(provider.generate_content("b").await.unwrap().content, "fallback");
        assert_eq!(provider.calls()[1].prompt, "b");
    }

    #[tokio::test]
    async fn test_error_kinds() {
        let provider = MockProvider::new(ProviderKind::Claude)
            .then_transient("busy")
            .then_permanent("bad key");
        assert!(provider.generate_content("x").await.unwrap_err().is_transient());
        let err = provider.generate_content("x").await.unwrap_err();
        assert!(matches!(err, Error::ProviderCall(ref e) if !e.is_transient()));
    }

    #[tokio::test]
    async fn test_responder_sees_prompt() {
        let provider = MockProvider::new(ProviderKind::OpenAi)
            .with_responder(|prompt| MockOutcome::Respond(prompt.to_uppercase()));
        assert_eq!(provider.generate_content("abc").await.unwrap().content, "ABC");
    }
}
