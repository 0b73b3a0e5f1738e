//! Structured run logging utilities.
//!
//! Provides consistent, structured logging for pipeline runs with tracing
//! spans and contextual information.

use tracing::{error, info, warn, Span};
use vinvite_models::ContentId;

/// Run logger for structured logging with consistent formatting.
///
/// Every line carries the photo's content ID and the run generation so
/// interleaved runs (a cancelled one finishing late, say) can be told apart.
#[derive(Debug, Clone)]
pub struct RunLogger {
    content_id: String,
    run: u64,
}

impl RunLogger {
    pub fn new(content_id: &ContentId, run: u64) -> Self {
        Self {
            content_id: content_id.to_string(),
            run,
        }
    }

    pub fn log_start(&self, entry: &str) {
        info!(content_id = %self.content_id, run = self.run, "Run started: {}", entry);
    }

    pub fn log_stage(&self, stage: &str, attempt: u32, max_attempts: u32) {
        info!(
            content_id = %self.content_id,
            run = self.run,
            stage,
            attempt,
            max_attempts,
            "Stage attempt"
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(content_id = %self.content_id, run = self.run, "Run progress: {}", message);
    }

    pub fn log_warning(&self, message: &str) {
        warn!(content_id = %self.content_id, run = self.run, "Run warning: {}", message);
    }

    pub fn log_error(&self, message: &str) {
        error!(content_id = %self.content_id, run = self.run, "Run error: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(content_id = %self.content_id, run = self.run, "Run completed: {}", message);
    }

    pub fn content_id(&self) -> &str {
        &self.content_id
    }

    pub fn run(&self) -> u64 {
        self.run
    }

    /// Create a tracing span for this run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!("pipeline_run", content_id = %self.content_id, run = self.run)
    }
}
