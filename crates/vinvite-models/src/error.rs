//! Error taxonomy shared across crates.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure, independent of which component produced it.
///
/// Every crate-level error type maps onto one of these through a `kind()`
/// method so the session can decide what to surface and what to swallow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input at the boundary (file too big, wrong type, missing field)
    Validation,
    /// Connectivity failure or timeout
    Network,
    /// 5xx from the server
    ServerTransient,
    /// 4xx from the server
    ServerPermanent,
    /// Pipeline stage timed out or failed after its attempts
    PipelineStage,
    /// User-initiated abort
    Cancelled,
    /// Response with the wrong content type
    Integrity,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Network => "network",
            ErrorKind::ServerTransient => "server_transient",
            ErrorKind::ServerPermanent => "server_permanent",
            ErrorKind::PipelineStage => "pipeline_stage",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Integrity => "integrity",
        }
    }

    /// Retrying may help for these kinds.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Network | ErrorKind::ServerTransient)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Input rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Photo is too large ({size} bytes, max {max} bytes)")]
    PhotoTooLarge { size: usize, max: usize },

    #[error("Unsupported photo type: {0}")]
    UnsupportedMediaType(String),

    #[error("Photo is empty")]
    EmptyPhoto,

    #[error("Please fill in: {0}")]
    MissingField(String),

    #[error("Invalid image data URL: {0}")]
    InvalidDataUrl(String),
}

impl ValidationError {
    pub fn missing_field(name: impl Into<String>) -> Self {
        Self::MissingField(name.into())
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Validation
    }
}
