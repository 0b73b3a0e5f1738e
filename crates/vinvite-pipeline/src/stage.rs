//! Pipeline stages and the uniform stage runner.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use tokio_util::sync::CancellationToken;

use vinvite_models::{DevToggles, PipelineState};

use crate::config::{PipelineConfig, StageLimits};
use crate::error::{PipelineError, PipelineResult};
use crate::logging::RunLogger;
use crate::metrics::names;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extraction,
    Generation,
    Evaluation,
    BackgroundRemoval,
}

/// Static description of a stage for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSpec {
    pub stage: Stage,
    pub name: &'static str,
    pub timeout: Duration,
    pub attempts: u32,
    pub state: PipelineState,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Extraction,
        Stage::Generation,
        Stage::Evaluation,
        Stage::BackgroundRemoval,
    ];

    /// Stages from generation onwards.
    pub const FROM_GENERATION: [Stage; 3] = [
        Stage::Generation,
        Stage::Evaluation,
        Stage::BackgroundRemoval,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Extraction => "extraction",
            Stage::Generation => "generation",
            Stage::Evaluation => "evaluation",
            Stage::BackgroundRemoval => "bg_removing",
        }
    }

    pub fn state(&self) -> PipelineState {
        match self {
            Stage::Extraction => PipelineState::Extracting,
            Stage::Generation => PipelineState::Generating,
            Stage::Evaluation => PipelineState::Evaluating,
            Stage::BackgroundRemoval => PipelineState::BgRemoving,
        }
    }

    /// Step text shown while the stage runs.
    pub fn step(&self) -> &'static str {
        match self {
            Stage::Extraction => "Reading your photo",
            Stage::Generation => "Drawing your characters",
            Stage::Evaluation => "Checking the artwork",
            Stage::BackgroundRemoval => "Removing the background",
        }
    }

    /// A failure here keeps the current artifact and carries on to ready.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Stage::BackgroundRemoval)
    }

    /// Whether dev toggles skip this stage. Evaluation is never skipped.
    pub fn is_skipped_by(&self, toggles: &DevToggles) -> bool {
        match self {
            Stage::Extraction => toggles.skip_extraction,
            Stage::Generation => toggles.skip_image_generation,
            Stage::Evaluation => false,
            Stage::BackgroundRemoval => toggles.skip_background_removal,
        }
    }

    fn limits(&self, config: &PipelineConfig) -> StageLimits {
        match self {
            Stage::Extraction => config.extraction,
            Stage::Generation => config.generation,
            Stage::Evaluation => config.evaluation,
            Stage::BackgroundRemoval => config.background_removal,
        }
    }

    pub fn spec(&self, config: &PipelineConfig) -> StageSpec {
        let limits = self.limits(config);
        StageSpec {
            stage: *self,
            name: self.name(),
            timeout: limits.timeout,
            attempts: limits.attempts.max(1),
            state: self.state(),
        }
    }
}

/// Run one stage: each attempt races `spec.timeout` and the cancel token;
/// failed attempts wait `retry_base * attempt` before the next one.
///
/// `op` receives the 1-based attempt number and must produce an owned
/// future so a timed-out attempt can be dropped cleanly.
pub async fn run_stage<T, F, Fut>(
    spec: &StageSpec,
    retry_base: Duration,
    cancel: &CancellationToken,
    logger: &RunLogger,
    mut op: F,
) -> PipelineResult<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PipelineResult<T>>,
{
    let started = Instant::now();
    let mut last_error = String::new();

    for attempt in 1..=spec.attempts {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        logger.log_stage(spec.name, attempt, spec.attempts);
        counter!(names::STAGE_ATTEMPTS_TOTAL, "stage" => spec.name).increment(1);

        let bounded = tokio::time::timeout(spec.timeout, op(attempt));
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            outcome = bounded => outcome,
        };

        let error = match outcome {
            Ok(Ok(value)) => {
                histogram!(names::STAGE_DURATION_SECONDS, "stage" => spec.name)
                    .record(started.elapsed().as_secs_f64());
                return Ok(value);
            }
            Ok(Err(e)) if e.is_cancelled() => return Err(PipelineError::Cancelled),
            Ok(Err(e)) => e,
            Err(_) => PipelineError::Timeout {
                stage: spec.name,
                secs: spec.timeout.as_secs(),
            },
        };

        logger.log_warning(&format!(
            "{} attempt {}/{} failed: {}",
            spec.name, attempt, spec.attempts, error
        ));
        last_error = error.to_string();

        if attempt < spec.attempts {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
                _ = tokio::time::sleep(retry_base * attempt) => {}
            }
        }
    }

    counter!(names::STAGE_FAILURES_TOTAL, "stage" => spec.name).increment(1);
    Err(PipelineError::stage_failed(spec.name, spec.attempts, last_error))
}
