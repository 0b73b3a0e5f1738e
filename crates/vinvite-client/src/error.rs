//! API client error types.

use std::time::Duration;

use thiserror::Error;
use vinvite_models::ErrorKind;

pub type ClientResult<T> = Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Request cancelled")]
    Cancelled,

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("Misconfigured endpoint {endpoint}: expected {expected}, got '{content_type}'")]
    Misconfigured {
        endpoint: String,
        expected: String,
        content_type: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn misconfigured(
        endpoint: impl Into<String>,
        expected: impl Into<String>,
        content_type: impl Into<String>,
    ) -> Self {
        Self::Misconfigured {
            endpoint: endpoint.into(),
            expected: expected.into(),
            content_type: content_type.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::InvalidImage(_) => ErrorKind::Validation,
            ClientError::Network(_) | ClientError::Timeout(_) => ErrorKind::Network,
            ClientError::Server { .. } => ErrorKind::ServerTransient,
            ClientError::Rejected { .. } => ErrorKind::ServerPermanent,
            ClientError::Misconfigured { .. }
            | ClientError::InvalidResponse(_)
            | ClientError::Json(_)
            | ClientError::Config(_) => ErrorKind::Integrity,
        }
    }

    /// Another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    /// Short message suitable for an error banner.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Cancelled => "Cancelled".to_string(),
            ClientError::Network(_) | ClientError::Timeout(_) => {
                "Network error. Please check your connection and try again.".to_string()
            }
            ClientError::Server { .. } => {
                "The server is having trouble right now. Please try again.".to_string()
            }
            ClientError::Rejected { message, .. } => message.clone(),
            ClientError::Misconfigured { .. } => "Misconfigured endpoint".to_string(),
            ClientError::InvalidResponse(_) | ClientError::Json(_) => {
                "Unexpected response from the server.".to_string()
            }
            ClientError::InvalidImage(_) => "The image could not be read.".to_string(),
            ClientError::Config(_) => "Client is not configured correctly.".to_string(),
        }
    }
}
