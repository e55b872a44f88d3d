//! Trip-detection stage: one aggregation pass per slice.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use tripline_core::{
    AggregationScope, ClaimedEmail, PipelineStateRepository, Result, Stage, StageOutput,
};
use tripline_trips::TripAggregator;

use crate::handler::{EmailOutcome, SliceOutcome, StageHandler};

pub struct TripDetectionHandler {
    state: Arc<dyn PipelineStateRepository>,
    aggregator: TripAggregator,
    scope: AggregationScope,
}

impl TripDetectionHandler {
    pub fn new(state: Arc<dyn PipelineStateRepository>, aggregator: TripAggregator) -> Self {
        Self {
            state,
            aggregator,
            scope: AggregationScope::All,
        }
    }

    pub fn with_scope(mut self, scope: AggregationScope) -> Self {
        self.scope = scope;
        self
    }
}

#[async_trait]
impl StageHandler for TripDetectionHandler {
    fn stage(&self) -> Stage {
        Stage::TripDetection
    }

    /// Rows left in `processing` by an interrupted run go back to `pending`.
    async fn before_stage(&self) -> Result<u64> {
        let _guard = self.aggregator.exclusive().await;
        let recovered = self.state.recover_stuck(Stage::TripDetection).await?;
        if recovered > 0 {
            info!(
                subsystem = "jobs",
                component = "trip_detection",
                recovered,
                "Recovered interrupted trip detection rows"
            );
        }
        Ok(recovered)
    }

    async fn process_slice(
        &self,
        slice: &[ClaimedEmail],
        _max_parallel: usize,
    ) -> Result<SliceOutcome> {
        let report = {
            let guard = self.aggregator.exclusive().await;
            self.aggregator.run_pass_locked(self.scope, &guard).await?
        };

        let outcomes = slice
            .iter()
            .map(|claimed| {
                let id = claimed.email.id.clone();
                match report.excluded.get(&id) {
                    Some(reason) => EmailOutcome::failed(id, reason.clone()),
                    None => EmailOutcome::completed(id, StageOutput::TripDetection),
                }
            })
            .collect();
        Ok(SliceOutcome {
            outcomes,
            calls: Vec::new(),
        })
    }
}
