//! Run report printed by the `tripline` binary.

use std::collections::BTreeMap;

use serde::Serialize;

use tripline_core::{Stage, StatusCounts};

use crate::handler::CallRecord;

/// Per-stage counters of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageReport {
    pub stage: Stage,
    pub slices: usize,
    pub claimed: usize,
    pub completed: usize,
    pub failed: usize,
    /// Rows returned to `pending` before the first claim.
    pub recovered: u64,
    /// Claimed rows handed back without an outcome.
    pub released: u64,
}

impl StageReport {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            slices: 0,
            claimed: 0,
            completed: 0,
            failed: 0,
            recovered: 0,
            released: 0,
        }
    }
}

/// Token and cost totals for one `provider:tier`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub calls: usize,
    /// Calls served after an earlier chain entry failed.
    pub fallbacks: usize,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Calls whose token counts were estimated from text length.
    pub estimated_calls: usize,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunReport {
    pub stages: Vec<StageReport>,
    /// Keyed by `provider:tier`.
    pub usage: BTreeMap<String, UsageSummary>,
    /// The run ended on a stop request.
    pub stopped: bool,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn record_call(&mut self, call: &CallRecord) {
        let entry = self
            .usage
            .entry(format!("{}:{}", call.provider, call.tier))
            .or_default();
        entry.calls += 1;
        entry.input_tokens += call.input_tokens;
        entry.output_tokens += call.output_tokens;
        entry.cost_usd += call.cost_usd;
        if call.fell_back {
            entry.fallbacks += 1;
        }
        if call.estimated {
            entry.estimated_calls += 1;
        }
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn total_cost_usd(&self) -> f64 {
        self.usage.values().map(|u| u.cost_usd).sum()
    }
}

/// Status counts of every stage, as printed by `tripline report`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusReport {
    pub emails: u64,
    pub stages: BTreeMap<Stage, StatusCounts>,
    pub trips: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tripline_core::{ProviderKind, Tier};

    fn call(provider: ProviderKind, cost: f64, fell_back: bool) -> CallRecord {
        CallRecord {
            provider,
            tier: Tier::Fast,
            model: "m".into(),
            input_tokens: 100,
            output_tokens: 20,
            estimated: false,
            cost_usd: cost,
            fell_back,
        }
    }

    #[test]
    fn test_usage_grouped_by_provider_and_tier() {
        let mut report = RunReport::default();
        report.record_call(&call(ProviderKind::Gemini, 0.01, false));
        report.record_call(&call(ProviderKind::Gemini, 0.01, false));
        report.record_call(&call(ProviderKind::OpenAi, 0.05, true));

        let gemini = &report.usage["gemini:fast"];
        assert_eq!(gemini.calls, 2);
        assert_eq!(gemini.input_tokens, 200);
        assert_eq!(report.usage["openai:fast"].fallbacks, 1);
        assert!((report.total_cost_usd() - 0.07).abs() < 1e-9);
    }
}
