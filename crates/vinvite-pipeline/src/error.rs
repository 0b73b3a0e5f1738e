//! Pipeline error types.

use thiserror::Error;
use vinvite_client::ClientError;
use vinvite_media::MediaError;
use vinvite_models::ErrorKind;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Stage '{stage}' timed out after {secs} seconds")]
    Timeout { stage: &'static str, secs: u64 },

    #[error("Stage '{stage}' failed after {attempts} attempt(s): {message}")]
    StageFailed {
        stage: &'static str,
        attempts: u32,
        message: String,
    },

    #[error("Pipeline cancelled")]
    Cancelled,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Media(#[from] MediaError),
}

impl PipelineError {
    pub fn stage_failed(stage: &'static str, attempts: u32, message: impl Into<String>) -> Self {
        Self::StageFailed {
            stage,
            attempts,
            message: message.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            PipelineError::Cancelled => true,
            PipelineError::Client(e) => e.is_cancelled(),
            PipelineError::Media(e) => e.is_cancelled(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Cancelled => ErrorKind::Cancelled,
            PipelineError::Client(e) => e.kind(),
            PipelineError::Media(e) => e.kind(),
            PipelineError::Timeout { .. } | PipelineError::StageFailed { .. } => {
                ErrorKind::PipelineStage
            }
        }
    }
}
