//! Pipeline assembly: repositories, fallback chain, aggregator and runner.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use tripline_core::{
    AggregationScope, EmailRecord, Error, ImportSummary, Repositories, Result, Stage,
};
use tripline_inference::{FallbackChain, ProviderRegistry};
use tripline_trips::{AggregationReport, GroupingPolicy, TripAggregator};

use crate::config::RunnerConfig;
use crate::report::{RunReport, StatusReport};
use crate::runner::{BatchRunner, RunnerEvent, RunnerHandle};
use crate::stages::{BookingHandler, ClassificationHandler, ContentHandler, TripDetectionHandler};

/// Which rows of a stage a reset returns to `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResetTarget {
    /// Explicit email ids.
    Ids(Vec<String>),
    /// Every `failed` row.
    Failed,
    /// Every row left `processing` by an interrupted run.
    Stuck,
}

/// The four-stage pipeline over one set of repositories.
#[derive(Clone)]
pub struct Pipeline {
    repos: Repositories,
    chain: Arc<FallbackChain>,
    aggregator: TripAggregator,
    runner: BatchRunner,
}

impl Pipeline {
    pub fn new(
        repos: Repositories,
        chain: FallbackChain,
        config: RunnerConfig,
        policy: GroupingPolicy,
    ) -> Self {
        let chain = Arc::new(chain);
        let aggregator = TripAggregator::new(&repos, policy);
        let runner = BatchRunner::new(repos.state.clone(), config.clone())
            .with_handler(ClassificationHandler::new(
                chain.clone(),
                config.classification_prompt_batch,
            ))
            .with_handler(ContentHandler::new())
            .with_handler(BookingHandler::new(chain.clone(), aggregator.clone()))
            .with_handler(TripDetectionHandler::new(
                repos.state.clone(),
                aggregator.clone(),
            ));
        Self {
            repos,
            chain,
            aggregator,
            runner,
        }
    }

    /// Build from `AI_FALLBACK_CHAIN`, provider settings, runner and grouping
    /// environment variables.
    pub fn from_env(repos: Repositories) -> Result<Self> {
        let config = RunnerConfig::from_env();
        let registry = ProviderRegistry::from_env();
        let chain =
            FallbackChain::from_registry(&registry, &config.chain_entries()?, config.fallback_policy())?;
        for (entry, reason) in chain.skipped() {
            warn!(
                subsystem = "jobs",
                component = "pipeline",
                provider = %entry.provider,
                tier = %entry.tier,
                reason = %reason,
                "Chain entry unavailable"
            );
        }
        Ok(Self::new(repos, chain, config, GroupingPolicy::from_env()))
    }

    pub fn repositories(&self) -> &Repositories {
        &self.repos
    }

    pub fn aggregator(&self) -> &TripAggregator {
        &self.aggregator
    }

    pub fn runner(&self) -> &BatchRunner {
        &self.runner
    }

    pub fn handle(&self) -> RunnerHandle {
        self.runner.handle()
    }

    pub fn events(&self) -> tokio::sync::broadcast::Receiver<RunnerEvent> {
        self.runner.events()
    }

    /// Import records; ids already present are skipped.
    pub async fn ingest(&self, records: &[EmailRecord]) -> Result<ImportSummary> {
        let summary = self.repos.emails.insert_many(records).await?;
        info!(
            subsystem = "jobs",
            component = "pipeline",
            inserted = summary.inserted,
            skipped = summary.skipped,
            "Imported emails"
        );
        Ok(summary)
    }

    /// Run `stages` in pipeline order.
    ///
    /// AI stages need at least one configured chain entry.
    pub async fn run(&self, stages: &[Stage]) -> Result<RunReport> {
        let needs_ai = stages
            .iter()
            .any(|s| matches!(s, Stage::Classification | Stage::BookingExtraction));
        if needs_ai && self.chain.is_empty() {
            let reasons: Vec<String> = self
                .chain
                .skipped()
                .iter()
                .map(|(entry, reason)| format!("{}:{}: {}", entry.provider, entry.tier, reason))
                .collect();
            return Err(Error::Config(format!(
                "no AI provider configured ({})",
                reasons.join("; ")
            )));
        }
        self.runner.run(stages).await
    }

    /// Return rows of one stage to `pending`. Only that stage's fields are
    /// cleared; other stages are untouched.
    #[instrument(
        skip(self, target),
        fields(subsystem = "jobs", component = "pipeline", op = "reset", %stage)
    )]
    pub async fn reset(&self, stage: Stage, target: ResetTarget) -> Result<u64> {
        // Clearing booking results changes the fragment set.
        let _guard = match stage {
            Stage::BookingExtraction => Some(self.aggregator.shared().await),
            _ => None,
        };
        let reset = match target {
            ResetTarget::Ids(ids) => self.repos.state.reset(stage, &ids).await?,
            ResetTarget::Failed => self.repos.state.reset_failed(stage).await?,
            ResetTarget::Stuck => self.repos.state.recover_stuck(stage).await?,
        };
        info!(reset, "Stage reset");
        Ok(reset)
    }

    /// Run one aggregation pass outside the trip-detection stage.
    pub async fn aggregate(&self, scope: AggregationScope) -> Result<AggregationReport> {
        self.aggregator.run_pass(scope).await
    }

    pub async fn status_report(&self) -> Result<StatusReport> {
        let mut stages = BTreeMap::new();
        for stage in Stage::ALL {
            stages.insert(stage, self.repos.state.status_counts(stage).await?);
        }
        Ok(StatusReport {
            emails: self.repos.emails.count().await?,
            stages,
            trips: self.repos.trips.list_trips().await?.len(),
        })
    }
}
