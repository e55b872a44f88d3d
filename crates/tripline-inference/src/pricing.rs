//! Per-model token pricing.
//!
//! Lookup is by exact model identifier. Configured entries override the
//! built-in table; an unknown identifier falls back to the vendor's default
//! price and the result is marked [`PricingSource::Default`].

use std::collections::BTreeMap;

use tripline_core::{CostBreakdown, PricingSource, ProviderKind};

use crate::config::ModelPricing;

const fn price(input_per_1m: f64, output_per_1m: f64) -> ModelPricing {
    ModelPricing {
        input_per_1m,
        output_per_1m,
    }
}

// ===== GEMINI =====
const GEMINI_PRICES: &[(&str, ModelPricing)] = &[
    ("gemini-2.5-flash", price(0.075, 0.30)),
    ("gemini-2.0-flash", price(0.075, 0.30)),
    ("gemini-1.5-flash", price(0.075, 0.30)),
    ("gemini-2.5-pro", price(1.25, 10.0)),
    ("gemini-1.5-pro", price(1.25, 5.0)),
];
const GEMINI_DEFAULT: ModelPricing = price(0.075, 0.30);

// ===== OPENAI =====
const OPENAI_PRICES: &[(&str, ModelPricing)] = &[
    ("gpt-4o-mini", price(0.15, 0.60)),
    ("gpt-4o", price(2.50, 10.0)),
    ("gpt-4-turbo", price(10.0, 30.0)),
    ("gpt-4", price(30.0, 60.0)),
    ("gpt-3.5-turbo", price(0.50, 1.50)),
];
/// Unknown OpenAI models are priced as gpt-4.
const OPENAI_DEFAULT: ModelPricing = price(30.0, 60.0);

// ===== CLAUDE =====
const CLAUDE_PRICES: &[(&str, ModelPricing)] = &[
    ("claude-3-5-haiku-20241022", price(0.80, 4.0)),
    ("claude-3-haiku-20240307", price(0.25, 1.25)),
    ("claude-3-5-sonnet-20241022", price(3.0, 15.0)),
    ("claude-sonnet-4-20250514", price(3.0, 15.0)),
    ("claude-3-opus-20240229", price(15.0, 75.0)),
];
const CLAUDE_DEFAULT: ModelPricing = price(3.0, 15.0);

/// Local models cost nothing.
const LOCAL_DEFAULT: ModelPricing = price(0.0, 0.0);

/// Pricing table for one vendor.
#[derive(Debug, Clone)]
pub struct PricingTable {
    entries: BTreeMap<String, ModelPricing>,
    default: ModelPricing,
}

impl PricingTable {
    /// Built-in prices for `kind` with `configured` entries layered on top.
    pub fn for_provider(kind: ProviderKind, configured: &BTreeMap<String, ModelPricing>) -> Self {
        let (builtin, default): (&[(&str, ModelPricing)], ModelPricing) = match kind {
            ProviderKind::Gemini => (GEMINI_PRICES, GEMINI_DEFAULT),
            ProviderKind::OpenAi => (OPENAI_PRICES, OPENAI_DEFAULT),
            ProviderKind::Claude => (CLAUDE_PRICES, CLAUDE_DEFAULT),
            ProviderKind::DeepSeek => (&[], LOCAL_DEFAULT),
        };
        let mut entries: BTreeMap<String, ModelPricing> = builtin
            .iter()
            .map(|(model, p)| (model.to_string(), *p))
            .collect();
        entries.extend(configured.iter().map(|(k, v)| (k.clone(), *v)));
        Self { entries, default }
    }

    pub fn lookup(&self, model: &str) -> (ModelPricing, PricingSource) {
        match self.entries.get(model) {
            Some(p) => (*p, PricingSource::Exact),
            None => (self.default, PricingSource::Default),
        }
    }

    /// Cost in USD of `input_tokens` and `output_tokens` on `model`.
    pub fn estimate(&self, model: &str, input_tokens: u64, output_tokens: u64) -> CostBreakdown {
        let (p, pricing_source) = self.lookup(model);
        let input_cost_usd = input_tokens as f64 / 1_000_000.0 * p.input_per_1m;
        let output_cost_usd = output_tokens as f64 / 1_000_000.0 * p.output_per_1m;
        CostBreakdown {
            input_cost_usd,
            output_cost_usd,
            total_cost_usd: input_cost_usd + output_cost_usd,
            pricing_source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_exact_match_gemini_flash() {
        let table = PricingTable::for_provider(ProviderKind::Gemini, &BTreeMap::new());
        let cost = table.estimate("gemini-2.5-flash", 1_000_000, 1_000_000);
        assert!(approx(cost.input_cost_usd, 0.075));
        assert!(approx(cost.output_cost_usd, 0.30));
        assert!(approx(cost.total_cost_usd, 0.375));
        assert_eq!(cost.pricing_source, PricingSource::Exact);
    }

    #[test]
    fn test_unknown_openai_model_uses_gpt4_default() {
        let table = PricingTable::for_provider(ProviderKind::OpenAi, &BTreeMap::new());
        let cost = table.estimate("gpt-9-preview", 1000, 500);
        assert!(approx(cost.input_cost_usd, 0.03));
        assert!(approx(cost.output_cost_usd, 0.03));
        assert_eq!(cost.pricing_source, PricingSource::Default);
    }

    #[test]
    fn test_configured_entry_overrides_builtin() {
        let mut configured = BTreeMap::new();
        configured.insert("gpt-4o-mini".to_string(), price(1.0, 2.0));
        let table = PricingTable::for_provider(ProviderKind::OpenAi, &configured);
        let (p, source) = table.lookup("gpt-4o-mini");
        assert_eq!(p, price(1.0, 2.0));
        assert_eq!(source, PricingSource::Exact);
    }

    #[test]
    fn test_local_provider_is_free() {
        let table = PricingTable::for_provider(ProviderKind::DeepSeek, &BTreeMap::new());
        let cost = table.estimate("deepseek-r1:7b", 50_000, 50_000);
        assert_eq!(cost.total_cost_usd, 0.0);
    }

    #[test]
    fn test_zero_tokens_zero_cost() {
        let table = PricingTable::for_provider(ProviderKind::Claude, &BTreeMap::new());
        assert_eq!(table.estimate("claude-x", 0, 0).total_cost_usd, 0.0);
    }
}
