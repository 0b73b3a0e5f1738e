//! Error types for background removal.

use thiserror::Error;
use vinvite_client::ClientError;
use vinvite_models::ErrorKind;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur during background removal.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode image: {0}")]
    Encode(String),

    #[error("Result has too little transparency ({ratio:.3} < {min:.3})")]
    NotTransparent { ratio: f64, min: f64 },

    #[error("Result size {actual:?} differs from input {expected:?}")]
    DimensionMismatch {
        expected: (u32, u32),
        actual: (u32, u32),
    },

    #[error("Model failed to load: {0}")]
    ModelLoad(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Server removal failed: {0}")]
    Server(#[from] ClientError),

    #[error("Background removal failed (client: {client}; server: {server})")]
    BackgroundRemovalFailed { client: String, server: String },
}

impl MediaError {
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn inference(message: impl Into<String>) -> Self {
        Self::Inference(message.into())
    }

    pub fn model_load(message: impl Into<String>) -> Self {
        Self::ModelLoad(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            MediaError::Cancelled => ErrorKind::Cancelled,
            MediaError::Server(e) => e.kind(),
            MediaError::Decode(_) => ErrorKind::Validation,
            _ => ErrorKind::PipelineStage,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            MediaError::Cancelled => true,
            MediaError::Server(e) => e.is_cancelled(),
            _ => false,
        }
    }
}
