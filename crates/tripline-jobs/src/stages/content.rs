//! Content stage: readable body text from the raw message.

use async_trait::async_trait;
use tracing::trace;

use tripline_core::{ClaimedEmail, Result, Stage, StageOutput};
use tripline_extract::extract_content;

use crate::handler::{EmailOutcome, SliceOutcome, StageHandler};

#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHandler;

impl ContentHandler {
    pub fn new() -> Self {
        Self
    }

    fn process(claimed: &ClaimedEmail) -> EmailOutcome {
        let email = &claimed.email;
        let Some(raw) = email.raw_content.as_deref() else {
            return EmailOutcome::failed(email.id.clone(), "email has no raw content");
        };
        match extract_content(raw) {
            Ok(content) => {
                trace!(
                    email_id = %email.id,
                    source = %content.source,
                    chars = content.text.len(),
                    "Extracted content"
                );
                EmailOutcome::completed(email.id.clone(), StageOutput::Content(content.text))
            }
            Err(e) => EmailOutcome::failed(email.id.clone(), e.to_string()),
        }
    }
}

#[async_trait]
impl StageHandler for ContentHandler {
    fn stage(&self) -> Stage {
        Stage::ContentExtraction
    }

    async fn process_slice(
        &self,
        slice: &[ClaimedEmail],
        _max_parallel: usize,
    ) -> Result<SliceOutcome> {
        Ok(SliceOutcome {
            outcomes: slice.iter().map(Self::process).collect(),
            calls: Vec::new(),
        })
    }
}
