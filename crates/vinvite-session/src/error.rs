//! Session error types.

use chrono::{DateTime, Utc};
use thiserror::Error;

use vinvite_client::ClientError;
use vinvite_media::MediaError;
use vinvite_models::{ErrorKind, Screen, ValidationError};
use vinvite_pipeline::PipelineError;
use vinvite_storage::StorageError;

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Action not available on the {actual} screen (expected {expected})")]
    WrongScreen { expected: Screen, actual: Screen },

    #[error("No photo selected")]
    NoPhoto,

    #[error("Generation limit reached until {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    #[error("Generation cancelled")]
    Cancelled,

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Media(#[from] MediaError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    pub fn wrong_screen(expected: Screen, actual: Screen) -> Self {
        Self::WrongScreen { expected, actual }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            SessionError::Cancelled => true,
            SessionError::Client(e) => e.is_cancelled(),
            SessionError::Media(e) => e.is_cancelled(),
            SessionError::Pipeline(e) => e.is_cancelled(),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Validation(e) => e.kind(),
            SessionError::WrongScreen { .. }
            | SessionError::NoPhoto
            | SessionError::RateLimited { .. } => ErrorKind::Validation,
            SessionError::Cancelled => ErrorKind::Cancelled,
            SessionError::Client(e) => e.kind(),
            SessionError::Media(e) => e.kind(),
            SessionError::Pipeline(e) => e.kind(),
            SessionError::Storage(_) | SessionError::Io(_) => ErrorKind::Integrity,
        }
    }

    /// Short text for the error banner.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Validation(e) => e.to_string(),
            SessionError::NoPhoto => "Please choose a photo first.".to_string(),
            SessionError::RateLimited { reset_at } => format!(
                "You've reached the weekly limit. Try again after {}.",
                reset_at.format("%b %-d")
            ),
            SessionError::Client(e) => e.user_message(),
            SessionError::Pipeline(PipelineError::Client(e)) => e.user_message(),
            SessionError::Media(_) | SessionError::Pipeline(_) => {
                "We couldn't prepare your picture. Please try another photo.".to_string()
            }
            SessionError::Io(_) | SessionError::Storage(_) => {
                "Something went wrong saving your invite.".to_string()
            }
            SessionError::Cancelled => "Cancelled".to_string(),
            SessionError::WrongScreen { .. } => "Please finish the current step first.".to_string(),
        }
    }
}
