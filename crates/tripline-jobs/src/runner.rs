//! Batch runner: claims slices per stage, dispatches them to handlers and
//! persists the outcomes.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::broadcast;
use tracing::{debug, error, info, instrument, warn};

use tripline_core::defaults::EVENT_CHANNEL_CAPACITY;
use tripline_core::{Error, PipelineStateRepository, Result, Stage};

use crate::config::RunnerConfig;
use crate::handler::{SliceOutcome, StageHandler, StageResult};
use crate::report::{RunReport, StageReport};

/// Event emitted by the batch runner.
#[derive(Debug, Clone)]
pub enum RunnerEvent {
    /// A stage is about to claim its first slice.
    StageStarted { stage: Stage },
    /// One slice was processed and persisted.
    SliceCompleted {
        stage: Stage,
        slice: usize,
        completed: usize,
        failed: usize,
    },
    /// A stage ran out of eligible emails or reached its slice limit.
    StageCompleted { stage: Stage, report: StageReport },
    /// The run stopped on request before finishing `stage`.
    RunStopped { stage: Stage },
}

/// Stop handle for in-flight runs.
///
/// A stop takes effect at the next slice boundary; the slice in progress is
/// still persisted.
#[derive(Debug, Clone, Default)]
pub struct RunnerHandle {
    cancelled: Arc<AtomicBool>,
}

impl RunnerHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Runs pipeline stages in slices against a pipeline state repository.
///
/// Runners are cheap to clone. Several runs may execute at the same time,
/// in this process or others, because every slice is claimed atomically.
#[derive(Clone)]
pub struct BatchRunner {
    state: Arc<dyn PipelineStateRepository>,
    config: RunnerConfig,
    handlers: BTreeMap<Stage, Arc<dyn StageHandler>>,
    event_tx: broadcast::Sender<RunnerEvent>,
    handle: RunnerHandle,
}

impl BatchRunner {
    pub fn new(state: Arc<dyn PipelineStateRepository>, config: RunnerConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            state,
            config,
            handlers: BTreeMap::new(),
            event_tx,
            handle: RunnerHandle::default(),
        }
    }

    /// Register the handler for its stage, replacing any earlier one.
    pub fn with_handler<H: StageHandler + 'static>(mut self, handler: H) -> Self {
        let stage = handler.stage();
        self.handlers.insert(stage, Arc::new(handler));
        debug!(%stage, "Registered stage handler");
        self
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Handle that stops this runner and its clones.
    pub fn handle(&self) -> RunnerHandle {
        self.handle.clone()
    }

    pub fn events(&self) -> broadcast::Receiver<RunnerEvent> {
        self.event_tx.subscribe()
    }

    /// Run `stages` in pipeline order.
    ///
    /// Per-email failures are recorded and never abort the run. A
    /// persistence failure aborts it with the error; emails claimed by the
    /// failing slice are released on a best-effort basis.
    pub async fn run(&self, stages: &[Stage]) -> Result<RunReport> {
        let start = Instant::now();
        let mut ordered = stages.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut report = RunReport::default();
        for stage in ordered {
            let handler = self.handlers.get(&stage).cloned().ok_or_else(|| {
                Error::Config(format!("no handler registered for stage {}", stage))
            })?;
            let stage_report = self.run_stage(stage, handler.as_ref(), &mut report).await?;
            report.stages.push(stage_report);
            if report.stopped {
                break;
            }
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            subsystem = "jobs",
            component = "runner",
            stages = report.stages.len(),
            stopped = report.stopped,
            cost_usd = report.total_cost_usd(),
            duration_ms = report.duration_ms,
            "Run finished"
        );
        Ok(report)
    }

    #[instrument(
        skip(self, handler, report),
        fields(subsystem = "jobs", component = "runner", op = "run_stage", %stage)
    )]
    async fn run_stage(
        &self,
        stage: Stage,
        handler: &dyn StageHandler,
        report: &mut RunReport,
    ) -> Result<StageReport> {
        let start = Instant::now();
        let mut stage_report = StageReport::new(stage);
        let _ = self.event_tx.send(RunnerEvent::StageStarted { stage });

        stage_report.recovered = handler.before_stage().await?;

        let slice_size = self.config.slice_size(stage);
        for slice_index in 0..self.config.max_slices {
            if self.handle.is_cancelled() {
                info!(stage = %stage, slices = stage_report.slices, "Run stopped on request");
                report.stopped = true;
                let _ = self.event_tx.send(RunnerEvent::RunStopped { stage });
                return Ok(stage_report);
            }

            let claimed = self.state.claim(stage, slice_size).await?;
            if claimed.is_empty() {
                break;
            }
            stage_report.slices += 1;
            stage_report.claimed += claimed.len();
            let claimed_ids: Vec<String> = claimed.iter().map(|c| c.email.id.clone()).collect();
            debug!(stage = %stage, slice = slice_index, claimed = claimed.len(), "Claimed slice");

            let outcome = match handler
                .process_slice(&claimed, self.config.max_parallel)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) if e.is_infrastructure() => {
                    error!(stage = %stage, error = %e, "Slice aborted");
                    self.release_best_effort(stage, &claimed_ids).await;
                    return Err(e);
                }
                Err(e) => {
                    warn!(stage = %stage, error = %e, "Slice failed");
                    SliceOutcome::all_failed(&claimed, &e.to_string())
                }
            };

            for call in &outcome.calls {
                report.record_call(call);
            }

            let (completed, failed, handled) =
                match self.persist(stage, handler, &claimed_ids, outcome).await {
                    Ok(counts) => counts,
                    Err(e) => {
                        error!(stage = %stage, error = %e, "Failed to persist slice outcomes");
                        self.release_best_effort(stage, &claimed_ids).await;
                        return Err(e);
                    }
                };
            stage_report.completed += completed;
            stage_report.failed += failed;

            let unhandled: Vec<String> = claimed_ids
                .into_iter()
                .filter(|id| !handled.contains(id))
                .collect();
            if !unhandled.is_empty() {
                warn!(stage = %stage, count = unhandled.len(), "Releasing emails without outcome");
                stage_report.released += self.state.release(stage, &unhandled).await?;
            }

            let _ = self.event_tx.send(RunnerEvent::SliceCompleted {
                stage,
                slice: slice_index,
                completed,
                failed,
            });
        }

        info!(
            stage = %stage,
            slices = stage_report.slices,
            completed = stage_report.completed,
            failed = stage_report.failed,
            recovered = stage_report.recovered,
            duration_ms = start.elapsed().as_millis() as u64,
            "Stage completed"
        );
        let _ = self.event_tx.send(RunnerEvent::StageCompleted {
            stage,
            report: stage_report.clone(),
        });
        Ok(stage_report)
    }

    /// Persist outcomes of one slice. Returns completed and failed counts plus
    /// the ids that received an outcome.
    async fn persist(
        &self,
        stage: Stage,
        handler: &dyn StageHandler,
        claimed_ids: &[String],
        outcome: SliceOutcome,
    ) -> Result<(usize, usize, HashSet<String>)> {
        let claimed: HashSet<&str> = claimed_ids.iter().map(String::as_str).collect();
        let mut handled = HashSet::new();
        let mut completed = 0;
        let mut failed = 0;

        let _guard = handler.write_guard().await;
        for email in outcome.outcomes {
            if !claimed.contains(email.email_id.as_str()) || handled.contains(&email.email_id) {
                warn!(stage = %stage, email_id = %email.email_id, "Ignoring outcome for unclaimed email");
                continue;
            }
            let written = match email.result {
                StageResult::Completed(output) => {
                    if output.stage() != stage {
                        warn!(
                            stage = %stage,
                            email_id = %email.email_id,
                            output_stage = %output.stage(),
                            "Ignoring output for another stage"
                        );
                        continue;
                    }
                    self.state
                        .complete(&email.email_id, output)
                        .await
                        .map(|_| true)
                }
                StageResult::Failed(reason) => {
                    warn!(stage = %stage, email_id = %email.email_id, error = %reason, "Email failed");
                    self.state
                        .fail(stage, &email.email_id, &reason)
                        .await
                        .map(|_| false)
                }
            };
            match written {
                Ok(true) => completed += 1,
                Ok(false) => failed += 1,
                Err(e) if e.is_infrastructure() => return Err(e),
                Err(e) => {
                    // Row left `processing` state underneath us, e.g. a reset.
                    warn!(stage = %stage, email_id = %email.email_id, error = %e, "Outcome not recorded");
                }
            }
            handled.insert(email.email_id);
        }
        Ok((completed, failed, handled))
    }

    async fn release_best_effort(&self, stage: Stage, ids: &[String]) {
        if let Err(e) = self.state.release(stage, ids).await {
            warn!(stage = %stage, error = %e, "Failed to release claimed emails");
        }
    }
}
