//! Booking-extraction stage: one AI call per travel email.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::OwnedRwLockReadGuard;
use tracing::{debug, warn};

use tripline_core::defaults::RESPONSE_EXCERPT_CHARS;
use tripline_core::{ClaimedEmail, Result, Stage, StageOutput};
use tripline_extract::normalize::excerpt;
use tripline_extract::{booking_prompt, extract_content, normalize_booking};
use tripline_inference::FallbackChain;
use tripline_trips::TripAggregator;

use crate::handler::{CallRecord, EmailOutcome, SliceOutcome, StageHandler};

pub struct BookingHandler {
    chain: Arc<FallbackChain>,
    aggregator: TripAggregator,
}

impl BookingHandler {
    pub fn new(chain: Arc<FallbackChain>, aggregator: TripAggregator) -> Self {
        Self { chain, aggregator }
    }

    /// Body for the prompt: stored content, else content extracted now, else
    /// the subject line.
    fn body(claimed: &ClaimedEmail) -> String {
        if let Some(text) = claimed.state.content_text.as_deref() {
            if !text.trim().is_empty() {
                return text.to_string();
            }
        }
        claimed
            .email
            .raw_content
            .as_deref()
            .and_then(|raw| extract_content(raw).ok())
            .map(|content| content.text)
            .unwrap_or_else(|| claimed.email.subject.clone())
    }

    async fn process(&self, claimed: &ClaimedEmail) -> (EmailOutcome, Option<CallRecord>) {
        let email = &claimed.email;
        let prompt = booking_prompt(email, &Self::body(claimed));

        let served = match self.chain.generate(&prompt).await {
            Ok(served) => served,
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "booking",
                    email_id = %email.id,
                    error = %e,
                    "Booking extraction call failed"
                );
                return (EmailOutcome::failed(email.id.clone(), e.to_string()), None);
            }
        };
        let call = CallRecord::from(&served);

        let normalized = normalize_booking(&served.output.content);
        let coercions = normalized.coercions().len();
        let outcome = match normalized.into_extracted().and_then(|b| b.to_json()) {
            Ok(info) => {
                debug!(
                    subsystem = "jobs",
                    component = "booking",
                    email_id = %email.id,
                    coercions,
                    provider = %served.provider,
                    "Booking extracted"
                );
                EmailOutcome::completed(email.id.clone(), StageOutput::Booking(info))
            }
            Err(e) => {
                let reason = e.to_string();
                let response = excerpt(&served.output.content, RESPONSE_EXCERPT_CHARS);
                let reason = if reason.contains(&response) {
                    reason
                } else {
                    format!("{}; response: {}", reason, response)
                };
                warn!(
                    subsystem = "jobs",
                    component = "booking",
                    email_id = %email.id,
                    provider = %served.provider,
                    "Booking response rejected"
                );
                EmailOutcome::failed(email.id.clone(), reason)
            }
        };
        (outcome, Some(call))
    }
}

#[async_trait]
impl StageHandler for BookingHandler {
    fn stage(&self) -> Stage {
        Stage::BookingExtraction
    }

    async fn process_slice(
        &self,
        slice: &[ClaimedEmail],
        max_parallel: usize,
    ) -> Result<SliceOutcome> {
        let mut outcome = SliceOutcome::default();
        let pending: Vec<_> = slice.iter().map(|claimed| self.process(claimed)).collect();
        let mut results = stream::iter(pending).buffer_unordered(max_parallel.max(1));
        while let Some((email, call)) = results.next().await {
            outcome.outcomes.push(email);
            outcome.calls.extend(call);
        }
        Ok(outcome)
    }

    /// Completed bookings change the fragment set; never during a pass.
    async fn write_guard(&self) -> Option<OwnedRwLockReadGuard<()>> {
        Some(self.aggregator.shared().await)
    }
}
