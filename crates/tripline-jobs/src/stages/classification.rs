//! Classification stage: batched category assignment.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use tripline_core::{ClaimedEmail, Email, Result, Stage, StageOutput};
use tripline_extract::{classification_prompt, normalize_classification, ClassificationOutcome};
use tripline_inference::FallbackChain;

use crate::handler::{CallRecord, EmailOutcome, SliceOutcome, StageHandler};

pub struct ClassificationHandler {
    chain: Arc<FallbackChain>,
    prompt_batch: usize,
}

impl ClassificationHandler {
    pub fn new(chain: Arc<FallbackChain>, prompt_batch: usize) -> Self {
        Self {
            chain,
            prompt_batch: prompt_batch.max(1),
        }
    }

    async fn classify(&self, emails: Vec<Email>) -> SliceOutcome {
        let prompt = classification_prompt(&emails);
        let served = match self.chain.generate(&prompt).await {
            Ok(served) => served,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "classification",
                    batch_size = emails.len(),
                    error = %e,
                    "Classification call failed"
                );
                let reason = e.to_string();
                return SliceOutcome {
                    outcomes: emails
                        .iter()
                        .map(|email| EmailOutcome::failed(email.id.clone(), reason.clone()))
                        .collect(),
                    calls: Vec::new(),
                };
            }
        };

        let results = normalize_classification(&served.output.content, emails.len());
        debug!(
            subsystem = "jobs",
            component = "classification",
            batch_size = emails.len(),
            failed = results.iter().filter(|r| r.is_failed()).count(),
            provider = %served.provider,
            "Classified batch"
        );
        let outcomes = emails
            .iter()
            .zip(results)
            .map(|(email, result)| match result {
                ClassificationOutcome::Classified(category) => {
                    EmailOutcome::completed(email.id.clone(), StageOutput::Classification(category))
                }
                ClassificationOutcome::Failed(reason) => {
                    EmailOutcome::failed(email.id.clone(), reason)
                }
            })
            .collect();
        SliceOutcome {
            outcomes,
            calls: vec![CallRecord::from(&served)],
        }
    }
}

#[async_trait]
impl StageHandler for ClassificationHandler {
    fn stage(&self) -> Stage {
        Stage::Classification
    }

    async fn process_slice(
        &self,
        slice: &[ClaimedEmail],
        max_parallel: usize,
    ) -> Result<SliceOutcome> {
        let batches: Vec<Vec<Email>> = slice
            .chunks(self.prompt_batch)
            .map(|chunk| chunk.iter().map(|c| c.email.clone()).collect())
            .collect();

        let mut outcome = SliceOutcome::default();
        let mut results = stream::iter(batches)
            .map(|batch| self.classify(batch))
            .buffer_unordered(max_parallel.max(1));
        while let Some(batch) = results.next().await {
            outcome.merge(batch);
        }
        Ok(outcome)
    }
}
