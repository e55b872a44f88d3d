//! Stage handlers: what the runner calls for each claimed slice.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::OwnedRwLockReadGuard;

use tripline_core::{ClaimedEmail, ProviderKind, Result, Stage, StageOutput, Tier};
use tripline_inference::ServedGeneration;

/// What happened to one claimed email.
#[derive(Debug, Clone, PartialEq)]
pub enum StageResult {
    /// Output to persist; the stage becomes `completed`.
    Completed(StageOutput),
    /// Diagnostic text to persist; the stage becomes `failed`.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct EmailOutcome {
    pub email_id: String,
    pub result: StageResult,
}

impl EmailOutcome {
    pub fn completed(email_id: impl Into<String>, output: StageOutput) -> Self {
        Self {
            email_id: email_id.into(),
            result: StageResult::Completed(output),
        }
    }

    pub fn failed(email_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            email_id: email_id.into(),
            result: StageResult::Failed(error.into()),
        }
    }
}

/// One served AI call, for the run report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallRecord {
    pub provider: ProviderKind,
    pub tier: Tier,
    pub model: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub estimated: bool,
    pub cost_usd: f64,
    pub fell_back: bool,
}

impl From<&ServedGeneration> for CallRecord {
    fn from(served: &ServedGeneration) -> Self {
        Self {
            provider: served.provider,
            tier: served.tier,
            model: served.model.clone(),
            input_tokens: served.output.usage.input_tokens,
            output_tokens: served.output.usage.output_tokens,
            estimated: served.output.usage.estimated,
            cost_usd: served.cost.total_cost_usd,
            fell_back: served.fell_back(),
        }
    }
}

/// Results of one slice.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SliceOutcome {
    pub outcomes: Vec<EmailOutcome>,
    pub calls: Vec<CallRecord>,
}

impl SliceOutcome {
    /// Every email of `slice` failed with the same reason.
    pub fn all_failed(slice: &[ClaimedEmail], error: &str) -> Self {
        Self {
            outcomes: slice
                .iter()
                .map(|c| EmailOutcome::failed(c.email.id.clone(), error))
                .collect(),
            calls: Vec::new(),
        }
    }

    pub fn merge(&mut self, other: SliceOutcome) {
        self.outcomes.extend(other.outcomes);
        self.calls.extend(other.calls);
    }
}

/// Processing logic of one pipeline stage.
///
/// Handlers never persist stage status; the runner does. An `Err` from
/// [`StageHandler::process_slice`] means the whole slice could not be
/// processed; per-email problems are [`StageResult::Failed`] outcomes.
#[async_trait]
pub trait StageHandler: Send + Sync {
    /// The stage this handler processes.
    fn stage(&self) -> Stage;

    /// Called once per run before the first claim. Returns rows recovered.
    async fn before_stage(&self) -> Result<u64> {
        Ok(0)
    }

    /// Process one claimed slice with at most `max_parallel` calls in flight.
    async fn process_slice(&self, slice: &[ClaimedEmail], max_parallel: usize)
        -> Result<SliceOutcome>;

    /// Guard held while the runner persists this stage's outcomes.
    async fn write_guard(&self) -> Option<OwnedRwLockReadGuard<()>> {
        None
    }
}
