//! Ordered provider fallback.
//!
//! A [`FallbackChain`] tries its `(provider, tier)` entries in order for one
//! logical request:
//!
//! - success returns immediately with the serving provider recorded;
//! - a transient failure (rate limit, timeout, 5xx) is retried on the same
//!   entry up to `attempts_per_entry` times, then the chain advances;
//! - a permanent failure (auth, invalid request) aborts without advancing;
//! - after `max_providers` distinct vendors the chain is exhausted.
//!
//! Every call is wrapped in `call_timeout`; expiry counts as transient.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info, warn};

use tripline_core::defaults::{
    FALLBACK_ATTEMPTS_PER_ENTRY, FALLBACK_MAX_PROVIDERS, FALLBACK_RETRY_DELAY_MS, GEN_TIMEOUT_SECS,
};
use tripline_core::{
    AiProvider, CostBreakdown, Error, GenerationOutput, ProviderCallError, ProviderKind, Result,
    Tier,
};

use crate::provider::Provider;
use crate::registry::ProviderRegistry;

/// One `(provider, tier)` position in a chain, written `gemini:fast`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ChainEntry {
    pub provider: ProviderKind,
    pub tier: Tier,
}

impl ChainEntry {
    pub fn new(provider: ProviderKind, tier: Tier) -> Self {
        Self { provider, tier }
    }
}

impl fmt::Display for ChainEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.tier)
    }
}

impl FromStr for ChainEntry {
    type Err = Error;

    /// `provider[:tier]`; the tier defaults to `fast`.
    fn from_str(s: &str) -> Result<Self> {
        let (provider, tier) = match s.trim().split_once(':') {
            Some((p, t)) => (p.parse::<ProviderKind>()?, t.parse::<Tier>()?),
            None => (s.parse::<ProviderKind>()?, Tier::default()),
        };
        Ok(Self { provider, tier })
    }
}

/// Parse a comma-separated chain such as `gemini:fast,openai:fast`.
pub fn parse_chain(spec: &str) -> Result<Vec<ChainEntry>> {
    let entries: Vec<ChainEntry> = spec
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_>>()?;
    if entries.is_empty() {
        return Err(Error::InvalidInput("fallback chain is empty".to_string()));
    }
    Ok(entries)
}

/// Retry and bounding rules for a chain.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    pub attempts_per_entry: u32,
    pub retry_delay: Duration,
    /// Distinct vendors tried before the chain is exhausted.
    pub max_providers: usize,
    pub call_timeout: Duration,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self {
            attempts_per_entry: FALLBACK_ATTEMPTS_PER_ENTRY,
            retry_delay: Duration::from_millis(FALLBACK_RETRY_DELAY_MS),
            max_providers: FALLBACK_MAX_PROVIDERS,
            call_timeout: Duration::from_secs(GEN_TIMEOUT_SECS),
        }
    }
}

impl FallbackPolicy {
    pub fn with_attempts_per_entry(mut self, attempts: u32) -> Self {
        self.attempts_per_entry = attempts.max(1);
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_providers(mut self, max: usize) -> Self {
        self.max_providers = max.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }
}

/// One call made while serving a request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    pub provider: ProviderKind,
    pub tier: Tier,
    pub model: String,
    /// 1-based attempt number on this entry.
    pub attempt: u32,
    pub duration_ms: u64,
    /// `None` when the attempt succeeded.
    pub error: Option<String>,
}

/// A successful generation and how it was obtained.
#[derive(Debug, Clone)]
pub struct ServedGeneration {
    pub output: GenerationOutput,
    pub provider: ProviderKind,
    pub tier: Tier,
    pub model: String,
    pub attempts: Vec<AttemptRecord>,
    pub cost: CostBreakdown,
}

impl ServedGeneration {
    /// True when an entry other than the first served the request.
    pub fn fell_back(&self) -> bool {
        self.attempts
            .first()
            .is_some_and(|a| a.provider != self.provider || a.tier != self.tier)
    }
}

/// Ordered providers plus the policy for moving between them.
#[derive(Debug, Clone)]
pub struct FallbackChain {
    providers: Vec<Provider>,
    policy: FallbackPolicy,
    skipped: Vec<(ChainEntry, String)>,
}

impl FallbackChain {
    pub fn new(providers: Vec<Provider>) -> Self {
        Self {
            providers,
            policy: FallbackPolicy::default(),
            skipped: Vec::new(),
        }
    }

    pub fn with_policy(mut self, policy: FallbackPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Construct every entry from `registry`.
    ///
    /// Entries that fail with a configuration error are skipped and kept in
    /// [`FallbackChain::skipped`]; any other construction error is returned.
    pub fn from_registry(
        registry: &ProviderRegistry,
        entries: &[ChainEntry],
        policy: FallbackPolicy,
    ) -> Result<Self> {
        let mut providers = Vec::with_capacity(entries.len());
        let mut skipped = Vec::new();
        for entry in entries {
            match registry.build(entry.provider, entry.tier) {
                Ok(p) => providers.push(p),
                Err(Error::Config(reason)) => {
                    warn!(
                        subsystem = "inference",
                        component = "fallback",
                        provider = %entry.provider,
                        tier = %entry.tier,
                        reason = %reason,
                        "Skipping unconfigured chain entry"
                    );
                    skipped.push((*entry, reason));
                }
                Err(e) => return Err(e),
            }
        }
        info!(
            subsystem = "inference",
            component = "fallback",
            active = providers.len(),
            skipped = skipped.len(),
            chain = %providers.iter().map(Provider::label).collect::<Vec<_>>().join(","),
            "Fallback chain ready"
        );
        Ok(Self {
            providers,
            policy,
            skipped,
        })
    }

    pub fn providers(&self) -> &[Provider] {
        &self.providers
    }

    pub fn skipped(&self) -> &[(ChainEntry, String)] {
        &self.skipped
    }

    pub fn policy(&self) -> &FallbackPolicy {
        &self.policy
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    async fn call(&self, provider: &Provider, prompt: &str) -> Result<GenerationOutput> {
        match tokio::time::timeout(self.policy.call_timeout, provider.generate_content(prompt))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::ProviderCall(ProviderCallError::transient(
                provider.kind().to_string(),
                format!(
                    "call timed out after {}s",
                    self.policy.call_timeout.as_secs_f64()
                ),
            ))),
        }
    }

    /// Serve `prompt` from the first entry that succeeds.
    pub async fn generate(&self, prompt: &str) -> Result<ServedGeneration> {
        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut vendors: Vec<ProviderKind> = Vec::new();
        let mut last_error: Option<Error> = None;

        for provider in &self.providers {
            let kind = provider.kind();
            let tier = provider.tier();
            let model = provider.model_info().model;

            if !vendors.contains(&kind) {
                if vendors.len() >= self.policy.max_providers {
                    debug!(
                        max_providers = self.policy.max_providers,
                        "Distinct provider limit reached"
                    );
                    break;
                }
                vendors.push(kind);
            }

            for attempt in 1..=self.policy.attempts_per_entry.max(1) {
                let start = Instant::now();
                let result = self.call(provider, prompt).await;
                let duration_ms = start.elapsed().as_millis() as u64;

                match result {
                    Ok(output) => {
                        attempts.push(AttemptRecord {
                            provider: kind,
                            tier,
                            model: model.clone(),
                            attempt,
                            duration_ms,
                            error: None,
                        });
                        let cost = provider
                            .estimate_cost(output.usage.input_tokens, output.usage.output_tokens);
                        debug!(
                            provider = %kind,
                            tier = %tier,
                            model = %model,
                            attempt,
                            input_tokens = output.usage.input_tokens,
                            output_tokens = output.usage.output_tokens,
                            cost_usd = cost.total_cost_usd,
                            "Request served"
                        );
                        return Ok(ServedGeneration {
                            output,
                            provider: kind,
                            tier,
                            model,
                            attempts,
                            cost,
                        });
                    }
                    Err(e) => {
                        attempts.push(AttemptRecord {
                            provider: kind,
                            tier,
                            model: model.clone(),
                            attempt,
                            duration_ms,
                            error: Some(e.to_string()),
                        });
                        if !e.is_transient() {
                            warn!(
                                provider = %kind,
                                tier = %tier,
                                error = %e,
                                "Permanent provider failure, not falling back"
                            );
                            return Err(e);
                        }
                        warn!(
                            provider = %kind,
                            tier = %tier,
                            attempt,
                            error = %e,
                            "Transient provider failure"
                        );
                        last_error = Some(e);
                        if attempt < self.policy.attempts_per_entry {
                            tokio::time::sleep(self.policy.retry_delay).await;
                        }
                    }
                }
            }
            warn!(provider = %kind, tier = %tier, "Advancing fallback chain");
        }

        Err(Error::ProviderChainExhausted(
            last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "no providers available".to_string()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProvider;

    fn fast_policy() -> FallbackPolicy {
        FallbackPolicy::default()
            .with_retry_delay(Duration::from_millis(1))
            .with_call_timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_parse_chain() {
        let chain = parse_chain("gemini:fast, openai:powerful,claude").unwrap();
        assert_eq!(
            chain,
            vec![
                ChainEntry::new(ProviderKind::Gemini, Tier::Fast),
                ChainEntry::new(ProviderKind::OpenAi, Tier::Powerful),
                ChainEntry::new(ProviderKind::Claude, Tier::Fast),
            ]
        );
        assert!(parse_chain("").is_err());
        assert!(parse_chain("gemini:turbo").is_err());
        assert_eq!(chain[1].to_string(), "openai:powerful");
    }

    #[tokio::test]
    async fn test_transient_twice_then_next_provider_serves() {
        let primary = MockProvider::new(ProviderKind::OpenAi)
            .then_transient("rate limited")
            .then_transient("rate limited");
        let secondary = MockProvider::new(ProviderKind::Claude).then_respond("[]");
        let chain = FallbackChain::new(vec![
            Provider::custom(primary.clone()),
            Provider::custom(secondary.clone()),
        ])
        .with_policy(fast_policy());

        let served = chain.generate("classify").await.unwrap();
        assert_eq!(served.provider, ProviderKind::Claude);
        assert_eq!(served.output.content, "[]");
        assert_eq!(served.attempts.len(), 3);
        assert!(served.fell_back());
        assert_eq!(primary.call_count(), 2);
        assert_eq!(secondary.calls()[0].prompt, "classify");
    }

    #[tokio::test]
    async fn test_permanent_error_aborts_chain() {
        let primary = MockProvider::new(ProviderKind::Gemini).then_permanent("invalid key");
        let secondary = MockProvider::new(ProviderKind::OpenAi).then_respond("ok");
        let chain = FallbackChain::new(vec![
            Provider::custom(primary),
            Provider::custom(secondary.clone()),
        ])
        .with_policy(fast_policy());

        let err = chain.generate("p").await.unwrap_err();
        assert!(matches!(err, Error::ProviderCall(ref e) if !e.is_transient()));
        assert_eq!(secondary.call_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_counts_as_transient() {
        let slow = MockProvider::new(ProviderKind::Gemini).then_hang().then_hang();
        let fast = MockProvider::new(ProviderKind::OpenAi).then_respond("done");
        let chain = FallbackChain::new(vec![Provider::custom(slow), Provider::custom(fast)])
            .with_policy(fast_policy().with_call_timeout(Duration::from_secs(2)));

        let served = chain.generate("p").await.unwrap();
        assert_eq!(served.provider, ProviderKind::OpenAi);
        assert!(served.attempts[0]
            .error
            .as_deref()
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test]
    async fn test_exhaustion_reports_last_error() {
        let a = MockProvider::new(ProviderKind::Gemini).with_responder(|_| {
            crate::mock::MockOutcome::Transient("quota exceeded".into())
        });
        let b = MockProvider::new(ProviderKind::OpenAi)
            .with_responder(|_| crate::mock::MockOutcome::Transient("server error".into()));
        let chain = FallbackChain::new(vec![Provider::custom(a), Provider::custom(b)])
            .with_policy(fast_policy());

        let err = chain.generate("p").await.unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("All providers failed. Last error:"));
        assert!(message.contains("server error"));
    }

    #[tokio::test]
    async fn test_distinct_provider_cap() {
        let providers: Vec<Provider> = [ProviderKind::Gemini, ProviderKind::OpenAi, ProviderKind::Claude]
            .into_iter()
            .map(|k| {
                Provider::custom(
                    MockProvider::new(k)
                        .with_responder(|_| crate::mock::MockOutcome::Transient("busy".into())),
                )
            })
            .collect();
        let last = MockProvider::new(ProviderKind::DeepSeek).then_respond("never");
        let mut all = providers;
        all.push(Provider::custom(last.clone()));

        let chain = FallbackChain::new(all).with_policy(fast_policy().with_max_providers(3));
        assert!(matches!(
            chain.generate("p").await,
            Err(Error::ProviderChainExhausted(_))
        ));
        assert_eq!(last.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_chain_is_exhausted() {
        let chain = FallbackChain::new(Vec::new());
        let err = chain.generate("p").await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "All providers failed. Last error: no providers available"
        );
    }

    #[test]
    fn test_from_registry_skips_unconfigured() {
        let registry = ProviderRegistry::default()
            .with_settings(
                ProviderKind::OpenAi,
                crate::config::ProviderSettings {
                    api_key: Some("YOUR_OPENAI_API_KEY_HERE".into()),
                    ..Default::default()
                },
            )
            .with_settings(
                ProviderKind::Claude,
                crate::config::ProviderSettings {
                    api_key: Some("sk-ant-real-looking".into()),
                    ..Default::default()
                },
            );
        let entries = parse_chain("openai:fast,claude:fast").unwrap();
        let chain = FallbackChain::from_registry(&registry, &entries, fast_policy()).unwrap();
        assert_eq!(chain.providers().len(), 1);
        assert_eq!(chain.providers()[0].kind(), ProviderKind::Claude);
        assert_eq!(chain.skipped().len(), 1);
        assert_eq!(chain.skipped()[0].0.provider, ProviderKind::OpenAi);
    }
}
