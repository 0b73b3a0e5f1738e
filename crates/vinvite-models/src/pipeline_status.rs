//! Image pipeline status snapshots.
//!
//! Observers of the pipeline receive a clone of [`PipelineStatus`] on every
//! transition, so the type is plain data with no handles inside.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data_url::ImageDataUrl;

/// Pipeline state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Nothing running
    #[default]
    Idle,
    /// Photo accepted, work about to start
    Uploaded,
    /// Decoding the photo and extracting character descriptions
    Extracting,
    /// Server-side character generation
    Generating,
    /// Scoring the generated image
    Evaluating,
    /// Removing the background from the current artifact
    BgRemoving,
    /// Artifact ready for composition
    Ready,
    /// A fatal stage failed after all attempts
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Idle => "idle",
            PipelineState::Uploaded => "uploaded",
            PipelineState::Extracting => "extracting",
            PipelineState::Generating => "generating",
            PipelineState::Evaluating => "evaluating",
            PipelineState::BgRemoving => "bg_removing",
            PipelineState::Ready => "ready",
            PipelineState::Failed => "failed",
        }
    }

    /// Nominal progress milestone reached when entering this state.
    pub fn milestone(&self) -> u8 {
        match self {
            PipelineState::Idle => 0,
            PipelineState::Uploaded => 5,
            PipelineState::Extracting => 20,
            PipelineState::Generating => 40,
            PipelineState::Evaluating => 60,
            PipelineState::BgRemoving => 80,
            PipelineState::Ready => 100,
            PipelineState::Failed => 0,
        }
    }

    /// Check if this is a terminal state (no more updates expected for the run).
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Ready | PipelineState::Failed)
    }

    /// A run is in flight.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            PipelineState::Idle | PipelineState::Ready | PipelineState::Failed
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of the image pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStatus {
    /// Current state
    pub state: PipelineState,
    /// Human-readable description of the current step
    pub step: String,
    /// Progress percentage (0-100), never decreases within a run
    pub progress: u8,
    /// Error message if a stage failed
    pub error: Option<String>,
    /// Current best artifact (final, intermediate or fallback)
    pub artifact: Option<ImageDataUrl>,
    /// Extraction finished (here or by an outer actor)
    pub extraction_complete: bool,
    /// Ready, and every stage completed without the fallback branch
    pub is_photo_processed: bool,
    /// When the status was last updated
    pub updated_at: Option<DateTime<Utc>>,
}

impl PipelineStatus {
    /// Fresh idle status.
    pub fn idle() -> Self {
        Self {
            step: "Waiting for photo".into(),
            ..Default::default()
        }
    }

    /// Move to a state, raising progress to its milestone.
    ///
    /// Progress is clamped so it never goes backwards.
    pub fn enter(&mut self, state: PipelineState, step: impl Into<String>) {
        self.state = state;
        self.step = step.into();
        self.progress = self.progress.max(state.milestone()).min(100);
        self.updated_at = Some(Utc::now());
    }

    /// Mark the run ready with a final artifact.
    pub fn complete(&mut self, artifact: ImageDataUrl, fully_processed: bool) {
        self.artifact = Some(artifact);
        self.is_photo_processed = fully_processed;
        self.enter(PipelineState::Ready, "Ready");
    }

    /// Mark the run failed. The current artifact (if any) stays as fallback.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.state = PipelineState::Failed;
        self.step = "Failed".into();
        self.error = Some(error.into());
        self.is_photo_processed = false;
        self.updated_at = Some(Utc::now());
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_ready(&self) -> bool {
        self.state == PipelineState::Ready
    }
}
